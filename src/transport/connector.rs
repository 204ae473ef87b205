//! BoringSSL TLS connector.
//!
//! The `SslConnector` is built once per client from the resolved ClientHello
//! template. Every handshake reuses it; only the SNI and the offered session
//! differ per connection.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::raw::c_int;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use boring::ssl::{
    NameType, SslConnector, SslContextBuilder, SslMethod, SslSessionCacheMode, SslVerifyMode,
};
use boring::x509::X509;
use boring_sys::{CRYPTO_BUFFER, SSL};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::tls::{CertCompression, TlsFingerprint, ALPN_H2};
use crate::transport::cache::{CacheKey, PendingConnections};
use crate::transport::dialer::Dialer;
use crate::transport::session::SessionCache;
use crate::transport::tls_info::TlsInfo;
use crate::transport::Target;
use crate::version::Protocol;

/// Brotli certificate decompression callback (RFC 8879).
unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = brotli::Decompressor::new(compressed, 4096);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) if decompressed.len() == uncompressed_len => {
            store_crypto_buffer(out, &decompressed)
        }
        _ => 0,
    }
}

/// Zlib certificate decompression callback (RFC 8879).
unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) if decompressed.len() == uncompressed_len => {
            store_crypto_buffer(out, &decompressed)
        }
        _ => 0,
    }
}

unsafe fn store_crypto_buffer(out: *mut *mut CRYPTO_BUFFER, data: &[u8]) -> c_int {
    // CRYPTO_BUFFER_new copies `data`.
    let buffer = boring_sys::CRYPTO_BUFFER_new(data.as_ptr(), data.len(), std::ptr::null_mut());
    if buffer.is_null() {
        return 0;
    }
    *out = buffer;
    1
}

/// Apply the optional ClientHello extensions BoringSSL only exposes through FFI.
///
/// Shared by the TCP connector and the QUIC configuration.
pub(crate) fn configure_extensions(builder: &mut SslContextBuilder, fp: &TlsFingerprint) {
    let ctx = builder.as_ptr();
    unsafe {
        boring_sys::SSL_CTX_set_grease_enabled(ctx, fp.grease as c_int);
        boring_sys::SSL_CTX_set_permute_extensions(ctx, fp.permute_extensions as c_int);
        if fp.ocsp_stapling {
            boring_sys::SSL_CTX_enable_ocsp_stapling(ctx);
        }
        if fp.signed_cert_timestamps {
            boring_sys::SSL_CTX_enable_signed_cert_timestamps(ctx);
        }
        // Only decompression is registered; clients never send certificates compressed.
        let registered = match fp.cert_compression {
            CertCompression::Brotli => boring_sys::SSL_CTX_add_cert_compression_alg(
                ctx,
                boring_sys::TLSEXT_cert_compression_brotli as u16,
                None,
                Some(decompress_brotli_cert),
            ),
            CertCompression::Zlib => boring_sys::SSL_CTX_add_cert_compression_alg(
                ctx,
                boring_sys::TLSEXT_cert_compression_zlib as u16,
                None,
                Some(decompress_zlib_cert),
            ),
            CertCompression::None => 1,
        };
        if registered != 1 {
            tracing::warn!("failed to register certificate compression {:?}", fp.cert_compression);
        }
    }
}

/// Trust settings for the handshake.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Extra roots (DER or PEM) on top of the system store.
    pub root_certs: Vec<Vec<u8>>,
    pub verify: bool,
    /// Offer cached sessions when the template can resume.
    pub sessions: bool,
    pub handshake_timeout: Option<Duration>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            root_certs: Vec::new(),
            verify: true,
            sessions: false,
            handshake_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// BoringSSL connector carrying one ClientHello template.
#[derive(Clone)]
pub struct BoringConnector {
    connector: SslConnector,
    fingerprint: Arc<TlsFingerprint>,
    sessions: Option<SessionCache>,
    verify: bool,
    handshake_timeout: Option<Duration>,
    /// Completed handshakes, shared by clones.
    handshakes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for BoringConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoringConnector")
            .field("alpn", &self.fingerprint.alpn)
            .field("sessions", &self.sessions.is_some())
            .field("verify", &self.verify)
            .finish()
    }
}

impl BoringConnector {
    pub fn new(fp: TlsFingerprint, options: &TlsOptions) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;

        for cert_bytes in &options.root_certs {
            match X509::from_der(cert_bytes).or_else(|_| X509::from_pem(cert_bytes)) {
                Ok(cert) => {
                    if let Err(e) = builder.cert_store_mut().add_cert(cert) {
                        tracing::warn!("failed to add root certificate: {}", e);
                    }
                }
                Err(e) => tracing::warn!("ignoring unparsable root certificate: {}", e),
            }
        }
        if !options.verify {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let tls12 = fp.tls12_ciphers();
        if !tls12.is_empty() {
            builder
                .set_cipher_list(&tls12.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set cipher list: {}", e)))?;
        }
        if !fp.curves.is_empty() {
            builder
                .set_curves_list(&fp.curves.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set curves: {}", e)))?;
        }
        if !fp.sigalgs.is_empty() {
            builder
                .set_sigalgs_list(&fp.sigalgs.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set signature algorithms: {}", e)))?;
        }
        configure_extensions(&mut builder, &fp);

        builder
            .set_min_proto_version(Some(fp.min_version.to_ssl_version()))
            .map_err(|e| Error::tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(fp.max_version.to_ssl_version()))
            .map_err(|e| Error::tls(format!("Failed to set max TLS version: {}", e)))?;

        let alpn = fp.alpn_wire();
        if !alpn.is_empty() {
            builder
                .set_alpn_protos(&alpn)
                .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;
        }

        // A session cache is only attached when the template can use it.
        let sessions = if options.sessions && fp.supports_session_resumption() {
            let cache = SessionCache::new();
            let sink = cache.clone();
            builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
            builder.set_new_session_callback(move |ssl, session| {
                if let Some(host) = ssl.servername(NameType::HOST_NAME) {
                    sink.store(host, session);
                }
            });
            Some(cache)
        } else {
            builder.set_session_cache_mode(SslSessionCacheMode::OFF);
            None
        };

        Ok(Self {
            connector: builder.build(),
            fingerprint: Arc::new(fp),
            sessions,
            verify: options.verify,
            handshake_timeout: options.handshake_timeout,
            handshakes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn fingerprint(&self) -> &TlsFingerprint {
        &self.fingerprint
    }

    pub fn sessions(&self) -> Option<&SessionCache> {
        self.sessions.as_ref()
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Run the handshake over an established stream.
    pub async fn handshake(&self, host: &str, stream: TcpStream) -> Result<SslStream<TcpStream>> {
        let mut config = self
            .connector
            .configure()
            .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;
        if !self.verify {
            config.set_verify_hostname(false);
        }
        if let Some(session) = self.sessions.as_ref().and_then(|cache| cache.get(host)) {
            // The session came from this connector's context.
            unsafe {
                config
                    .set_session(&session)
                    .map_err(|e| Error::tls(format!("Failed to set session: {}", e)))?;
            }
            tracing::trace!("offering cached TLS session for {}", host);
        }

        let fut = tokio_boring::connect(config, host, stream);
        let result = match self.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::HandshakeTimeout(limit))?,
            None => fut.await,
        };
        let stream = result.map_err(|e| self.classify_handshake_error(e.to_string()))?;
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }

    fn classify_handshake_error(&self, message: String) -> Error {
        let lower = message.to_ascii_lowercase();
        if self.fingerprint.is_tls13_only() && (lower.contains("curve") || lower.contains("group"))
        {
            return Error::UnsupportedCurve(message);
        }
        Error::tls(format!("TLS handshake failed: {}", message))
    }
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(TcpStream),
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Protocol selected by ALPN; plain streams and missing ALPN mean HTTP/1.1.
    pub fn negotiated_protocol(&self) -> Protocol {
        match self {
            MaybeHttpsStream::Http(_) => Protocol::Http1,
            MaybeHttpsStream::Https(stream) => match stream.ssl().selected_alpn_protocol() {
                Some(proto) if proto == ALPN_H2.as_bytes() => Protocol::Http2,
                _ => Protocol::Http1,
            },
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            MaybeHttpsStream::Http(stream) => stream.peer_addr().ok(),
            MaybeHttpsStream::Https(stream) => stream.get_ref().peer_addr().ok(),
        }
    }

    pub fn tls_info(&self) -> Option<Arc<TlsInfo>> {
        match self {
            MaybeHttpsStream::Http(_) => None,
            MaybeHttpsStream::Https(stream) => Some(Arc::new(TlsInfo::from_ssl(stream.ssl()))),
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Dial plus handshake, with a slot for connections negotiated ahead of
/// their sub-transport.
pub struct Connector {
    dialer: Dialer,
    tls: BoringConnector,
    pending: PendingConnections<MaybeHttpsStream>,
}

impl Connector {
    pub fn new(dialer: Dialer, tls: BoringConnector) -> Self {
        Self {
            dialer,
            tls,
            pending: PendingConnections::new(),
        }
    }

    pub fn tls(&self) -> &BoringConnector {
        &self.tls
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    pub(crate) fn pending(&self) -> &PendingConnections<MaybeHttpsStream> {
        &self.pending
    }

    /// Raw dial (and handshake for TLS targets), never using the pending slot.
    pub async fn dial(&self, target: &Target) -> Result<MaybeHttpsStream> {
        let tcp = self.dialer.dial(&target.host, target.port).await?;
        if !target.is_tls() {
            return Ok(MaybeHttpsStream::Http(tcp));
        }
        let tls = self.tls.handshake(&target.host, tcp).await?;
        Ok(MaybeHttpsStream::Https(tls))
    }

    /// Connection for a sub-transport: the parked one if present, else a fresh dial.
    pub async fn connect(&self, target: &Target) -> Result<MaybeHttpsStream> {
        if let Some(stream) = self.pending.take(&target.key) {
            tracing::trace!("reusing negotiated connection for {}", target.key);
            return Ok(stream);
        }
        self.dial(target).await
    }

    pub(crate) fn park(&self, key: CacheKey, stream: MaybeHttpsStream) {
        self.pending.park(key, stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tls::TlsVersion;

    #[test]
    fn test_connector_builds_for_presets() {
        for fp in [
            TlsFingerprint::chrome_131(),
            TlsFingerprint::firefox_133(),
            TlsFingerprint::default(),
        ] {
            assert!(BoringConnector::new(fp, &TlsOptions::default()).is_ok());
        }
    }

    #[test]
    fn test_session_cache_requires_resumption_extension() {
        let options = TlsOptions {
            sessions: true,
            ..TlsOptions::default()
        };
        let connector = BoringConnector::new(TlsFingerprint::chrome_131(), &options).unwrap();
        assert!(connector.sessions().is_some());

        let no_tickets = TlsFingerprint {
            extensions: vec![0, 10, 11, 13, 16, 43, 45, 51],
            ..TlsFingerprint::chrome_131()
        };
        let connector = BoringConnector::new(no_tickets, &options).unwrap();
        assert!(connector.sessions().is_none());
    }

    #[test]
    fn test_unsupported_curve_classification() {
        let tls13 = TlsFingerprint {
            min_version: TlsVersion::Tls13,
            ..TlsFingerprint::chrome_131()
        };
        let connector = BoringConnector::new(tls13, &TlsOptions::default()).unwrap();
        let err = connector.classify_handshake_error("error:UNSUPPORTED_CURVE".into());
        assert!(err.is_retryable());

        let connector =
            BoringConnector::new(TlsFingerprint::chrome_131(), &TlsOptions::default()).unwrap();
        let err = connector.classify_handshake_error("error:UNSUPPORTED_CURVE".into());
        assert!(matches!(err, Error::Tls(_)));
    }
}
