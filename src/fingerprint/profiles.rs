//! Browser fingerprint profiles.

use super::http2::Http2Settings;
use super::quic::QuicTemplate;
use super::tls::TlsFingerprint;
use super::{FingerprintSpec, TlsTemplate};

/// Browser fingerprint profile for impersonation.
///
/// Note: Chrome permutes TLS extension order since v110, so JA3 hashes of
/// a real Chrome change per connection. JA4 sorts extensions and stays stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Chrome 131 on Windows.
    #[default]
    Chrome131,
    /// Firefox 133 on Windows.
    Firefox133,
    /// No fingerprinting - BoringSSL and h2 defaults.
    None,
}

impl Profile {
    /// Get the User-Agent string for this profile.
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome131 => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
            }
            Self::Firefox133 => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0"
            }
            Self::None => concat!("guise/", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Get the TLS fingerprint for this profile.
    pub fn tls_fingerprint(&self) -> TlsFingerprint {
        match self {
            Self::Chrome131 => TlsFingerprint::chrome_131(),
            Self::Firefox133 => TlsFingerprint::firefox_133(),
            Self::None => TlsFingerprint::default(),
        }
    }

    pub fn http2_settings(&self) -> Option<Http2Settings> {
        match self {
            Self::Chrome131 => Some(Http2Settings::chrome()),
            Self::Firefox133 => Some(Http2Settings::firefox()),
            Self::None => None,
        }
    }

    pub fn quic_template(&self) -> Option<QuicTemplate> {
        match self {
            Self::Chrome131 => Some(QuicTemplate::chrome()),
            Self::Firefox133 => Some(QuicTemplate::firefox()),
            Self::None => None,
        }
    }

    /// Full fingerprint for this profile.
    pub fn spec(&self) -> FingerprintSpec {
        FingerprintSpec {
            tls: TlsTemplate::preset(*self),
            http2: self.http2_settings(),
            quic: self.quic_template(),
        }
    }
}
