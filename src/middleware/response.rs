//! Built-in response middleware.

use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, UPGRADE};

use crate::codec;
use crate::error::{Error, Result};
use crate::request::set_cookie_values;
use crate::response::Response;

/// The client never asks for an upgrade, so any 101 is a policy failure.
pub fn reject_upgrade(resp: &mut Response) -> Result<()> {
    if resp.status() != 101 {
        return Ok(());
    }
    let websocket = resp
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if websocket {
        Err(Error::WebSocketUpgrade)
    } else {
        Err(Error::SwitchingProtocols)
    }
}

/// Save `Set-Cookie` values of the final response.
pub fn store_cookies(resp: &mut Response) -> Result<()> {
    if let Some(store) = &resp.client().config().cookie_store {
        let values = set_cookie_values(resp.headers());
        if !values.is_empty() {
            store.set(resp.url(), &values);
        }
    }
    Ok(())
}

/// Undo `Content-Encoding`, dropping the headers that described the wire body.
pub fn decode_body(resp: &mut Response) -> Result<()> {
    let Some(encoding) = resp.content_encoding().map(str::to_string) else {
        return Ok(());
    };
    if resp.body().is_empty() {
        return Ok(());
    }
    let decoded = codec::decode_all(&encoding, resp.body().clone())?;
    resp.set_body(decoded);
    resp.headers_mut().remove(CONTENT_ENCODING);
    resp.headers_mut().remove(CONTENT_LENGTH);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::transport::TransportResponse;
    use crate::version::Protocol;
    use bytes::Bytes;
    use http::header::{HeaderMap, HeaderValue};
    use std::io::Write;
    use std::time::Duration;

    fn response(status: u16, headers: HeaderMap, body: Bytes) -> Response {
        let raw = TransportResponse {
            status,
            version: Protocol::Http1,
            headers,
            body,
            remote_addr: None,
            tls: None,
        };
        let url = url::Url::parse("https://example.com/").unwrap();
        Response::new(Client::new().unwrap(), raw, url, 0, Duration::ZERO, None, None)
    }

    #[test]
    fn test_upgrade_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        let mut resp = response(101, headers, Bytes::new());
        assert!(matches!(reject_upgrade(&mut resp), Err(Error::WebSocketUpgrade)));

        let mut resp = response(101, HeaderMap::new(), Bytes::new());
        assert!(matches!(reject_upgrade(&mut resp), Err(Error::SwitchingProtocols)));

        let mut resp = response(200, HeaderMap::new(), Bytes::new());
        assert!(reject_upgrade(&mut resp).is_ok());
    }

    #[test]
    fn test_decode_strips_encoding_headers() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"hello").unwrap();
        let gz = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(gz.len()));
        let mut resp = response(200, headers, Bytes::from(gz));
        decode_body(&mut resp).unwrap();
        assert_eq!(&resp.body()[..], b"hello");
        assert!(resp.headers().get(CONTENT_ENCODING).is_none());
        assert!(resp.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_corrupt_body_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let mut resp = response(200, headers, Bytes::from_static(b"not gzip"));
        assert!(matches!(decode_body(&mut resp), Err(Error::Decompression(_))));
    }
}
