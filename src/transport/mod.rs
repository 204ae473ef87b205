//! HTTP transport implementations.
//!
//! - stream path: TCP (optionally tunneled) + BoringSSL, then HTTP/1.1 via
//!   hyper or HTTP/2 via h2, chosen per address by ALPN
//! - datagram path: HTTP/3 via quiche, optionally over a SOCKS5 UDP relay
//!
//! A client owns exactly one [`Transport`].

pub mod cache;
pub mod connector;
pub mod dialer;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod resolver;
pub mod roundtripper;
pub mod session;
pub(crate) mod socks5;
pub mod tls_info;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::error::{Error, Result};
use crate::version::Protocol;
use cache::CacheKey;
use h3::QuicTransport;
use roundtripper::FingerprintRoundTripper;
use tls_info::TlsInfo;

/// Where a request goes: scheme, host and port, plus the cache key they form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    /// Host without IPv6 brackets.
    pub host: String,
    pub port: u16,
    pub key: CacheKey,
}

impl Target {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| Error::invalid_request(format!("missing scheme in {}", uri)))?
            .to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "https" => 443,
            "http" => 80,
            other => {
                return Err(Error::invalid_request(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_request(format!("missing host in {}", uri)))?;
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or(default_port);
        let key = if scheme == "https" {
            CacheKey::new(&host, port)
        } else {
            CacheKey::plain(&host, port)
        };
        Ok(Self {
            scheme,
            host,
            port,
            key,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    fn default_port(&self) -> u16 {
        if self.is_tls() {
            443
        } else {
            80
        }
    }

    /// Value for the `Host` header; the port is omitted when it is the default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// A fully buffered request as handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully buffered response as produced by a transport.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub version: Protocol,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
    /// Present for responses received over TLS or QUIC.
    pub tls: Option<Arc<TlsInfo>>,
}

/// HTTP/1.1 connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub keep_alive: bool,
    pub max_idle_per_host: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_idle_per_host: 8,
            idle_timeout: Some(Duration::from_secs(20)),
        }
    }
}

/// Which transport family a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP + TLS with HTTP/1.1 or HTTP/2.
    Tls,
    /// QUIC with HTTP/3.
    Quic,
}

/// The single active transport of a client.
pub enum Transport {
    Tls(FingerprintRoundTripper),
    Quic(QuicTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tls(_) => TransportKind::Tls,
            Self::Quic(_) => TransportKind::Quic,
        }
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        match self {
            Self::Tls(t) => t.round_trip(req).await,
            Self::Quic(t) => t.round_trip(req).await,
        }
    }

    /// Close idle connections and empty the address cache.
    pub fn close_idle_connections(&self) -> usize {
        let closed = match self {
            Self::Tls(t) => t.close_idle_connections(),
            Self::Quic(t) => t.close_idle_connections(),
        };
        tracing::debug!("closed {} cached connections", closed);
        closed
    }

    /// Number of addresses with a cached sub-transport.
    pub fn cached_connections(&self) -> usize {
        match self {
            Self::Tls(t) => t.cache().len(),
            Self::Quic(t) => t.cache().len(),
        }
    }

    /// Completed handshakes (TLS or QUIC).
    pub fn handshakes(&self) -> usize {
        match self {
            Self::Tls(t) => t.handshakes(),
            Self::Quic(t) => t.handshakes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let target = Target::from_uri(&"https://Example.COM/path".parse().unwrap()).unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.key.as_str(), "example.com:443");
        assert_eq!(target.host_header(), "example.com");
        assert!(target.is_tls());

        let plain = Target::from_uri(&"http://127.0.0.1:8080/".parse().unwrap()).unwrap();
        assert_eq!(plain.port, 8080);
        assert_eq!(plain.host_header(), "127.0.0.1:8080");
        assert!(!plain.is_tls());
    }

    #[test]
    fn test_target_ipv6() {
        let target = Target::from_uri(&"https://[::1]:8443/".parse().unwrap()).unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.key.as_str(), "[::1]:8443");
        assert_eq!(target.host_header(), "[::1]:8443");
    }

    #[test]
    fn test_scheme_is_part_of_the_key() {
        let tls = Target::from_uri(&"https://h.test:443/".parse().unwrap()).unwrap();
        let plain = Target::from_uri(&"http://h.test:443/".parse().unwrap()).unwrap();
        assert_eq!(tls.key.as_str(), plain.key.as_str());
        assert_ne!(tls.key, plain.key);
        assert!(!plain.key.is_tls());
    }

    #[test]
    fn test_target_rejects_unknown_scheme() {
        let err = Target::from_uri(&"ftp://example.com/".parse().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
