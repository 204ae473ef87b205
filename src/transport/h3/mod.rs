//! HTTP/3 transport over quiche.
//!
//! One QUIC connection per address, established inside the connection
//! cache so concurrent first requests share a single handshake. Datagrams
//! go out directly or through a SOCKS5 UDP relay.

mod connection;
mod driver;
mod handle;
mod socket;

pub use driver::DriverCommand;
pub use handle::H3Handle;
pub use socket::DatagramSocket;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fingerprint::quic::QuicTemplate;
use crate::fingerprint::tls::TlsFingerprint;
use crate::proxy::ProxyEndpoint;
use crate::timeouts::Timeouts;
use crate::transport::cache::{CacheKey, CloseIdle, ConnectionCache};
use crate::transport::resolver::{first_addr, resolve_host, Resolve};
use crate::transport::tls_info::TlsInfo;
use crate::transport::{Target, TransportRequest, TransportResponse};
use crate::version::Protocol;

/// An established HTTP/3 connection to one address.
pub struct Http3Transport {
    key: CacheKey,
    remote: SocketAddr,
    tls: Arc<TlsInfo>,
    handle: Mutex<Option<H3Handle>>,
}

impl Http3Transport {
    fn new(key: CacheKey, remote: SocketAddr, tls: TlsInfo, handle: H3Handle) -> Self {
        Self {
            key,
            remote,
            tls: Arc::new(tls),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn tls_info(&self) -> &TlsInfo {
        &self.tls
    }

    /// False once idle-closed or once the driver exited.
    pub fn is_alive(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        let handle = self
            .handle
            .lock()
            .clone()
            .ok_or_else(|| Error::quic("HTTP/3 connection closed"))?;
        let response = handle.send_request(req).await?;

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for (name, value) in response.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::debug!("dropping invalid HTTP/3 header {:?}", name),
            }
        }
        Ok(TransportResponse {
            status: response.status,
            version: Protocol::Http3,
            headers,
            body: response.body,
            remote_addr: Some(self.remote),
            tls: Some(self.tls.clone()),
        })
    }
}

impl CloseIdle for Http3Transport {
    fn close_idle(&self) {
        // Dropping the last handle makes the driver send CONNECTION_CLOSE.
        if self.handle.lock().take().is_some() {
            tracing::debug!("closed HTTP/3 connection to {}", self.key);
        }
    }
}

/// Settings shared by every QUIC connection of a client.
#[derive(Clone)]
pub struct QuicOptions {
    pub template: QuicTemplate,
    pub tls: TlsFingerprint,
    pub root_certs: Vec<Vec<u8>>,
    pub verify: bool,
    pub timeouts: Timeouts,
    pub local_address: Option<IpAddr>,
}

/// HTTP/3 transport with a per-address connection cache.
pub struct QuicTransport {
    options: QuicOptions,
    resolver: Arc<dyn Resolve>,
    /// Only SOCKS5 endpoints can carry datagrams.
    proxy: Option<ProxyEndpoint>,
    cache: ConnectionCache<Http3Transport>,
    handshakes: AtomicUsize,
}

impl QuicTransport {
    pub fn new(
        options: QuicOptions,
        resolver: Arc<dyn Resolve>,
        proxy: Option<ProxyEndpoint>,
    ) -> Result<Self> {
        if let Some(proxy) = &proxy {
            if !proxy.carries_datagrams() {
                return Err(Error::proxy(format!(
                    "{} cannot carry QUIC datagrams",
                    proxy.address()
                )));
            }
        }
        Ok(Self {
            options,
            resolver,
            proxy,
            cache: ConnectionCache::new(),
            handshakes: AtomicUsize::new(0),
        })
    }

    pub fn template(&self) -> &QuicTemplate {
        &self.options.template
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &ConnectionCache<Http3Transport> {
        &self.cache
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        let target = Target::from_uri(&req.uri)?;
        if !target.is_tls() {
            return Err(Error::quic("HTTP/3 requires https"));
        }

        let conn = self.connection(&target).await?;
        if conn.is_alive() {
            return conn.round_trip(req).await;
        }

        tracing::debug!("HTTP/3 connection to {} is gone, reconnecting", target.key);
        self.cache.invalidate(&target.key, &conn);
        let conn = self.connection(&target).await?;
        conn.round_trip(req).await
    }

    async fn connection(&self, target: &Target) -> Result<Arc<Http3Transport>> {
        let (conn, created) = self
            .cache
            .get_or_try_init(&target.key, || self.connect(target))
            .await?;
        if !created {
            tracing::trace!("HTTP/3 cache hit for {}", target.key);
        }
        Ok(conn)
    }

    async fn connect(&self, target: &Target) -> Result<Http3Transport> {
        let addrs = resolve_host(self.resolver.as_ref(), &target.host, target.port).await?;
        let peer = first_addr(&addrs, &target.host)?;

        let socket = match &self.proxy {
            Some(proxy) => {
                DatagramSocket::socks5(proxy, peer, &self.resolver, self.options.timeouts.connect)
                    .await?
            }
            None => DatagramSocket::bind(peer, self.options.local_address).await?,
        };

        let config = self.options.template.quic_config(
            &self.options.tls,
            &self.options.root_certs,
            self.options.verify,
        )?;
        let h3_config = self.options.template.h3_config()?;

        tracing::debug!("QUIC handshake with {} ({})", target.key, peer);
        let (handle, tls) = connection::connect(connection::QuicDial {
            host: &target.host,
            peer,
            socket,
            config,
            h3_config,
            handshake_timeout: self.options.timeouts.handshake,
        })
        .await?;
        self.handshakes.fetch_add(1, Ordering::SeqCst);

        Ok(Http3Transport::new(target.key.clone(), peer, tls, handle))
    }

    /// Close every cached connection, then clear the cache.
    pub fn close_idle_connections(&self) -> usize {
        self.cache.close_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyScheme;
    use crate::transport::resolver::SystemResolver;

    fn options() -> QuicOptions {
        QuicOptions {
            template: QuicTemplate::chrome(),
            tls: TlsFingerprint::chrome_131(),
            root_certs: vec![],
            verify: true,
            timeouts: Timeouts::default(),
            local_address: None,
        }
    }

    #[test]
    fn test_rejects_stream_proxy() {
        let http_proxy = ProxyEndpoint {
            scheme: ProxyScheme::Http,
            host: "127.0.0.1".into(),
            port: 8080,
            auth: None,
        };
        let result = QuicTransport::new(options(), Arc::new(SystemResolver), Some(http_proxy));
        assert!(matches!(result, Err(Error::Proxy(_))));
    }

    #[tokio::test]
    async fn test_plain_http_is_refused() {
        let transport = QuicTransport::new(options(), Arc::new(SystemResolver), None).unwrap();
        let req = TransportRequest {
            method: http::Method::GET,
            uri: "http://127.0.0.1:1/".parse().unwrap(),
            headers: HeaderMap::new(),
            body: bytes::Bytes::new(),
        };
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(err.to_string().contains("HTTP/3 requires https"));
        assert!(transport.cache().is_empty());
    }
}
