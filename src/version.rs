//! Negotiated HTTP protocol version.

use std::fmt;

/// Application protocol a sub-transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP/1.1 over plain TCP or TLS.
    Http1,
    /// HTTP/2 (ALPN "h2", or prior knowledge over plain TCP).
    Http2,
    /// HTTP/3 over QUIC.
    Http3,
}

impl Protocol {
    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
            Self::Http3 => "HTTP/3",
        }
    }

    /// Check if this version supports multiplexing.
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, Self::Http2 | Self::Http3)
    }

    /// Map to the `http` crate's version marker.
    pub fn to_http_version(self) -> http::Version {
        match self {
            Self::Http1 => http::Version::HTTP_11,
            Self::Http2 => http::Version::HTTP_2,
            Self::Http3 => http::Version::HTTP_3,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
