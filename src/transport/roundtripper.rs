//! Fingerprinting round tripper for the stream (TCP + TLS) path.
//!
//! The first request to an address dials, runs the customized handshake and
//! reads the ALPN result. The matching sub-transport is then built and cached
//! for that address, and the handshaked connection is parked so the
//! sub-transport picks it up instead of dialing again. Negotiation runs inside
//! the cache's single-flight init, so concurrent first requests share it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::fingerprint::http2::Http2Settings;
use crate::transport::cache::{CloseIdle, ConnectionCache};
use crate::transport::connector::{Connector, MaybeHttpsStream};
use crate::transport::h1::Http1Transport;
use crate::transport::h2::Http2Transport;
use crate::transport::{PoolOptions, Target, TransportRequest, TransportResponse};
use crate::version::Protocol;

/// Negotiation progress for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    NoEntry,
    Dialing,
    Handshaking,
    Negotiated(Protocol),
    Cached,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntry => f.write_str("no-entry"),
            Self::Dialing => f.write_str("dialing"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Negotiated(protocol) => write!(f, "negotiated {}", protocol.as_str()),
            Self::Cached => f.write_str("cached"),
        }
    }
}

/// The protocol engine serving one address.
pub enum SubTransport {
    Http1(Http1Transport),
    Http2(Http2Transport),
}

impl SubTransport {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Http1(_) => Protocol::Http1,
            Self::Http2(_) => Protocol::Http2,
        }
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        match self {
            Self::Http1(t) => t.round_trip(req).await,
            Self::Http2(t) => t.round_trip(req).await,
        }
    }
}

impl CloseIdle for SubTransport {
    fn close_idle(&self) {
        match self {
            Self::Http1(t) => t.close_idle(),
            Self::Http2(t) => t.close_idle(),
        }
    }
}

/// Settings for sub-transports built by the round tripper.
#[derive(Debug, Clone, Default)]
pub struct RoundTripperOptions {
    pub http2: Option<Http2Settings>,
    pub pool: PoolOptions,
    /// HTTP/2 with prior knowledge on plaintext targets.
    pub h2c: bool,
}

pub struct FingerprintRoundTripper {
    connector: Arc<Connector>,
    options: RoundTripperOptions,
    cache: ConnectionCache<SubTransport>,
    negotiations: AtomicUsize,
}

impl FingerprintRoundTripper {
    pub fn new(connector: Connector, options: RoundTripperOptions) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
            cache: ConnectionCache::new(),
            negotiations: AtomicUsize::new(0),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn cache(&self) -> &ConnectionCache<SubTransport> {
        &self.cache
    }

    /// Completed TLS handshakes across all addresses and sub-transports.
    pub fn handshakes(&self) -> usize {
        self.connector.tls().handshakes()
    }

    /// Cache entries created, including plaintext ones.
    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        let target = Target::from_uri(&req.uri)?;
        let (sub, created) = self
            .cache
            .get_or_try_init(&target.key, || self.negotiate(&target))
            .await?;
        if !created {
            tracing::debug!("{}: {}", target.key, NegotiationState::Cached);
        }
        sub.round_trip(req).await
    }

    async fn negotiate(&self, target: &Target) -> Result<SubTransport> {
        tracing::debug!("{}: {}", target.key, NegotiationState::NoEntry);
        self.negotiations.fetch_add(1, Ordering::SeqCst);

        if !target.is_tls() {
            let protocol = if self.options.h2c {
                Protocol::Http2
            } else {
                Protocol::Http1
            };
            return Ok(self.build(target, protocol));
        }

        tracing::debug!("{}: {}", target.key, NegotiationState::Dialing);
        let tcp = self
            .connector
            .dialer()
            .dial(&target.host, target.port)
            .await?;

        tracing::debug!("{}: {}", target.key, NegotiationState::Handshaking);
        let tls = self.connector.tls().handshake(&target.host, tcp).await?;
        let stream = MaybeHttpsStream::Https(tls);
        let protocol = stream.negotiated_protocol();
        tracing::debug!("{}: {}", target.key, NegotiationState::Negotiated(protocol));

        self.connector.park(target.key.clone(), stream);
        Ok(self.build(target, protocol))
    }

    fn build(&self, target: &Target, protocol: Protocol) -> SubTransport {
        tracing::debug!("building {} sub-transport for {}", protocol.as_str(), target.key);
        match protocol {
            Protocol::Http2 => SubTransport::Http2(Http2Transport::new(
                self.connector.clone(),
                target.clone(),
                self.options.http2.clone(),
            )),
            _ => SubTransport::Http1(Http1Transport::new(
                self.connector.clone(),
                target.clone(),
                self.options.pool.clone(),
            )),
        }
    }

    /// Release idle connections of every cached sub-transport and forget them.
    pub fn close_idle_connections(&self) -> usize {
        let closed = self.cache.close_idle();
        self.connector.pending().clear();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::TlsFingerprint;
    use crate::transport::connector::{BoringConnector, TlsOptions};
    use crate::transport::dialer::Dialer;
    use crate::transport::resolver::SystemResolver;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn round_tripper(options: RoundTripperOptions) -> FingerprintRoundTripper {
        let dialer = Dialer::new(Arc::new(SystemResolver));
        let tls = BoringConnector::new(TlsFingerprint::chrome_131(), &TlsOptions::default()).unwrap();
        FingerprintRoundTripper::new(Connector::new(dialer, tls), options)
    }

    fn get(uri: &str) -> TransportRequest {
        TransportRequest {
            method: http::Method::GET,
            uri: uri.parse().unwrap(),
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(NegotiationState::Dialing.to_string(), "dialing");
        assert_eq!(
            NegotiationState::Negotiated(Protocol::Http2).to_string(),
            "negotiated HTTP/2"
        );
    }

    #[tokio::test]
    async fn test_plaintext_skips_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let rt = round_tripper(RoundTripperOptions::default());
        let response = rt
            .round_trip(get(&format!("http://127.0.0.1:{}/", port)))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.version, Protocol::Http1);
        assert_eq!(rt.handshakes(), 0);
        assert_eq!(rt.cache().len(), 1);
        assert!(rt.connector().pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_dial_caches_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let rt = round_tripper(RoundTripperOptions::default());
        let result = rt.round_trip(get(&format!("https://127.0.0.1:{}/", port))).await;
        assert!(result.is_err());
        assert!(rt.cache().is_empty());
        assert_eq!(rt.negotiations(), 1);
    }
}
