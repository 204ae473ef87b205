//! Error types for the guise crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, sending or post-processing a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The request could not be built (bad method, header, raw text...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request body could not be read into memory for sending.
    #[error("Request body error: {0}")]
    Body(String),

    /// Error raised by a request or response middleware.
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// The configured user agent list is unusable.
    #[error("User agent error: {0}")]
    UserAgent(String),

    /// Server switched protocols although no upgrade was requested.
    #[error("Server switched protocols (101) without an upgrade request")]
    SwitchingProtocols,

    /// Server answered with a WebSocket upgrade.
    #[error("Server requested a WebSocket upgrade")]
    WebSocketUpgrade,

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Redirect limit exceeded.
    #[error("Redirect limit exceeded ({count} redirects)")]
    RedirectLimit { count: usize },

    /// Invalid redirect URL.
    #[error("Invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    /// Cookie parsing error.
    #[error("Cookie parse error: {0}")]
    CookieParse(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Name resolution failed.
    #[error("DNS error: {0}")]
    Dns(String),

    /// Proxy negotiation failed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Connect timeout (TCP and proxy tunnel).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// TLS or QUIC handshake did not complete in time.
    #[error("Handshake timeout after {0:?}")]
    HandshakeTimeout(Duration),

    /// Total request deadline exceeded.
    #[error("Total request deadline exceeded after {0:?}")]
    TotalTimeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A TLS 1.3-only template offered groups the server does not accept.
    /// The request may be retried with another template.
    #[error("TLS error: unsupported curve for TLS 1.3-only template ({0}), please retry the request")]
    UnsupportedCurve(String),

    /// QUIC/HTTP3 error.
    #[error("QUIC error: {0}")]
    Quic(String),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a middleware error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::Middleware(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a QUIC error.
    pub fn quic(message: impl Into<String>) -> Self {
        Self::Quic(message.into())
    }

    /// Whether the caller may reasonably retry the same request.
    ///
    /// The engine never retries these on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UnsupportedCurve(_))
    }

    /// Whether the failure happened below HTTP (dial, tunnel, handshake, I/O).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Dns(_)
                | Self::Proxy(_)
                | Self::ConnectTimeout(_)
                | Self::HandshakeTimeout(_)
                | Self::Connection(_)
                | Self::Tls(_)
                | Self::UnsupportedCurve(_)
                | Self::Quic(_)
                | Self::HttpProtocol(_)
        )
    }
}
