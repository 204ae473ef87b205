//! HTTP response with the metadata the engine attaches to it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, LOCATION, SET_COOKIE};
use url::Url;

use crate::client::Client;
use crate::cookie::Cookie;
use crate::error::{Error, Result};
use crate::transport::tls_info::TlsInfo;
use crate::transport::TransportResponse;
use crate::version::Protocol;

pub struct Response {
    status: u16,
    headers: HeaderMap,
    url: Url,
    version: Protocol,
    body: Bytes,
    attempts: usize,
    elapsed: Duration,
    remote_addr: Option<SocketAddr>,
    tls: Option<Arc<TlsInfo>>,
    user_agent: Option<String>,
    client: Client,
}

impl Response {
    pub(crate) fn new(
        client: Client,
        raw: TransportResponse,
        url: Url,
        attempts: usize,
        elapsed: Duration,
        user_agent: Option<String>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            url,
            version: raw.version,
            body: raw.body,
            attempts,
            elapsed,
            remote_addr,
            tls: raw.tls,
            user_agent,
            client,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> Protocol {
        self.version
    }

    /// Retries made because of the status code.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Time from the start of request middleware to the final response.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Peer address, when the client captures it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Negotiated TLS parameters and the server's leaf certificate; `None`
    /// for plain HTTP.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_deref()
    }

    /// The User-Agent that was sent.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// The client that produced this response, for follow-up requests with
    /// the same configuration and connections.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
    }

    /// Cookies set by this response; unparsable ones are skipped.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v, &self.url).ok())
            .collect()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| Error::Decompression(format!("UTF-8 decode error: {}", e)))
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("version", &self.version)
            .field("attempts", &self.attempts)
            .field("body_len", &self.body.len())
            .finish()
    }
}
