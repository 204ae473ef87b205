//! HTTP/1.1 sub-transport on hyper's connection API.
//!
//! Requests go out in origin form with title-cased header names. Idle
//! connections are pooled per address. When a pooled connection turns out
//! to be dead the request goes out once more on a fresh dial, unless it may
//! already have reached the server and its method is not idempotent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, HOST};
use http::uri::PathAndQuery;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transport::cache::CloseIdle;
use crate::transport::connector::Connector;
use crate::transport::tls_info::TlsInfo;
use crate::transport::{PoolOptions, Target, TransportRequest, TransportResponse};
use crate::version::Protocol;

struct IdleConn {
    sender: SendRequest<Full<Bytes>>,
    remote: Option<SocketAddr>,
    tls: Option<Arc<TlsInfo>>,
    idle_since: Instant,
}

struct Conn {
    sender: SendRequest<Full<Bytes>>,
    remote: Option<SocketAddr>,
    tls: Option<Arc<TlsInfo>>,
    reused: bool,
}

/// HTTP/1.1 sub-transport for one address.
pub struct Http1Transport {
    connector: Arc<Connector>,
    target: Target,
    options: PoolOptions,
    idle: Mutex<Vec<IdleConn>>,
}

impl Http1Transport {
    pub fn new(connector: Arc<Connector>, target: Target, options: PoolOptions) -> Self {
        Self {
            connector,
            target,
            options,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Number of pooled idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn checkout(&self) -> Option<Conn> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop() {
            let expired = self
                .options
                .idle_timeout
                .is_some_and(|limit| conn.idle_since.elapsed() >= limit);
            if expired || conn.sender.is_closed() {
                continue;
            }
            return Some(Conn {
                sender: conn.sender,
                remote: conn.remote,
                tls: conn.tls,
                reused: true,
            });
        }
        None
    }

    fn checkin(&self, conn: Conn) {
        if !self.options.keep_alive || conn.sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.options.max_idle_per_host {
            idle.push(IdleConn {
                sender: conn.sender,
                remote: conn.remote,
                tls: conn.tls,
                idle_since: Instant::now(),
            });
        }
    }

    async fn open(&self) -> Result<Conn> {
        let stream = self.connector.connect(&self.target).await?;
        let remote = stream.peer_addr();
        let tls = stream.tls_info();
        let (sender, connection) = http1::Builder::new()
            .title_case_headers(true)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/1.1 handshake failed: {}", e)))?;
        let key = self.target.key.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("HTTP/1.1 connection to {} closed: {}", key, e);
            }
        });
        Ok(Conn {
            sender,
            remote,
            tls,
            reused: false,
        })
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        if let Some(conn) = self.checkout() {
            match self.send(conn, &req).await {
                Err(SendError::Stale(e)) => {
                    tracing::warn!("pooled connection to {} was stale: {}", self.target.key, e);
                }
                other => return other.map_err(SendError::into_error),
            }
        }
        let conn = self.open().await?;
        self.send(conn, &req).await.map_err(SendError::into_error)
    }

    async fn send(
        &self,
        mut conn: Conn,
        req: &TransportRequest,
    ) -> std::result::Result<TransportResponse, SendError> {
        let request = self.build_request(req).map_err(SendError::Other)?;

        // Nothing has been written while waiting for readiness.
        if let Err(e) = conn.sender.ready().await {
            return Err(classify(e, conn.reused, true));
        }
        let response = match conn.sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                let replayable = e.is_canceled() || is_idempotent(&req.method);
                return Err(classify(e, conn.reused, replayable));
            }
        };

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| {
                SendError::Other(Error::http_protocol(format!(
                    "Failed to read response body: {}",
                    e
                )))
            })?
            .to_bytes();

        let close = parts
            .headers
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        let remote = conn.remote;
        let tls = conn.tls.clone();
        if !close {
            self.checkin(conn);
        }

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            version: Protocol::Http1,
            headers: parts.headers,
            body,
            remote_addr: remote,
            tls,
        })
    }

    fn build_request(&self, req: &TransportRequest) -> Result<http::Request<Full<Bytes>>> {
        let path = req
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        let mut builder = http::Request::builder()
            .method(req.method.clone())
            .uri(path)
            .version(http::Version::HTTP_11);

        let headers = builder
            .headers_mut()
            .ok_or_else(|| Error::invalid_request("invalid request line"))?;
        headers.extend(req.headers.clone());
        if !headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&self.target.host_header())
                .map_err(|e| Error::invalid_request(format!("invalid host: {}", e)))?;
            headers.insert(HOST, host);
        }
        if !self.options.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        builder
            .body(Full::new(req.body.clone()))
            .map_err(|e| Error::invalid_request(format!("Failed to build request: {}", e)))
    }
}

impl CloseIdle for Http1Transport {
    fn close_idle(&self) {
        let drained = std::mem::take(&mut *self.idle.lock());
        if !drained.is_empty() {
            tracing::debug!(
                "closed {} idle HTTP/1.1 connections to {}",
                drained.len(),
                self.target.key
            );
        }
    }
}

enum SendError {
    /// A reused connection failed and the request can go out again on a
    /// fresh one without reaching the server twice.
    Stale(hyper::Error),
    Other(Error),
}

impl SendError {
    fn into_error(self) -> Error {
        match self {
            SendError::Stale(e) => Error::http_protocol(format!("HTTP/1.1 request failed: {}", e)),
            SendError::Other(e) => e,
        }
    }
}

/// The server may already have processed a request whose connection broke
/// after it was written; only methods that tolerate that are resent.
fn is_idempotent(method: &http::Method) -> bool {
    use http::Method;
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

fn classify(e: hyper::Error, reused: bool, replayable: bool) -> SendError {
    let broken = e.is_canceled() || e.is_closed() || e.is_incomplete_message();
    if reused && replayable && broken {
        return SendError::Stale(e);
    }
    SendError::Other(Error::http_protocol(format!("HTTP/1.1 request failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::TlsFingerprint;
    use crate::transport::connector::{BoringConnector, TlsOptions};
    use crate::transport::dialer::Dialer;
    use crate::transport::resolver::SystemResolver;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport(port: u16, options: PoolOptions) -> Http1Transport {
        let dialer = Dialer::new(Arc::new(SystemResolver));
        let tls = BoringConnector::new(TlsFingerprint::default(), &TlsOptions::default()).unwrap();
        let connector = Arc::new(Connector::new(dialer, tls));
        let uri: http::Uri = format!("http://127.0.0.1:{}/", port).parse().unwrap();
        Http1Transport::new(connector, Target::from_uri(&uri).unwrap(), options)
    }

    fn get(port: u16, path: &str) -> TransportRequest {
        TransportRequest {
            method: http::Method::GET,
            uri: format!("http://127.0.0.1:{}{}", port, path).parse().unwrap(),
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_origin_form_and_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut heads = Vec::new();
            for _ in 0..2 {
                let mut buf = vec![0u8; 4096];
                let n = sock.read(&mut buf).await.unwrap();
                heads.push(String::from_utf8_lossy(&buf[..n]).to_string());
                sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await
                    .unwrap();
            }
            heads
        });

        let transport = transport(port, PoolOptions::default());
        let first = transport.round_trip(get(port, "/a?x=1")).await.unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(&first.body[..], b"ok");
        assert_eq!(transport.idle_count(), 1);
        let second = transport.round_trip(get(port, "/b")).await.unwrap();
        assert_eq!(second.remote_addr, first.remote_addr);

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("GET /a?x=1 HTTP/1.1\r\n"));
        assert!(heads[0].contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
        assert!(heads[1].starts_with("GET /b HTTP/1.1\r\n"));

        transport.close_idle();
        assert_eq!(transport.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_post_on_dropped_pooled_connection_is_not_resent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepted.clone();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();

            // Read the whole POST, then hang up without answering.
            let mut seen = Vec::new();
            while !seen.windows(7).any(|w| w == b"payload") {
                let n = sock.read(&mut buf).await.unwrap();
                assert!(n > 0);
                seen.extend_from_slice(&buf[..n]);
            }
            drop(sock);

            let mut posts = 1;
            while let Ok(Ok((mut sock, _))) =
                tokio::time::timeout(std::time::Duration::from_millis(300), listener.accept()).await
            {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let n = sock.read(&mut buf).await.unwrap_or(0);
                if buf[..n].starts_with(b"POST") {
                    posts += 1;
                }
            }
            posts
        });

        let transport = transport(port, PoolOptions::default());
        transport.round_trip(get(port, "/warm")).await.unwrap();
        assert_eq!(transport.idle_count(), 1);

        let mut post = get(port, "/submit");
        post.method = http::Method::POST;
        post.body = Bytes::from_static(b"payload");
        let result = transport.round_trip(post).await;
        assert!(matches!(result, Err(Error::HttpProtocol(_))));

        assert_eq!(server.await.unwrap(), 1);
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idempotent_methods() {
        assert!(is_idempotent(&http::Method::GET));
        assert!(is_idempotent(&http::Method::PUT));
        assert!(!is_idempotent(&http::Method::POST));
        assert!(!is_idempotent(&http::Method::PATCH));
    }

    #[tokio::test]
    async fn test_disable_keep_alive_sends_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let options = PoolOptions {
            keep_alive: false,
            ..PoolOptions::default()
        };
        let transport = transport(port, options);
        let response = transport.round_trip(get(port, "/")).await.unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(transport.idle_count(), 0);
        assert!(server.await.unwrap().contains("Connection: close\r\n"));
    }
}
