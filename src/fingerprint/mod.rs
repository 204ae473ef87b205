//! TLS, HTTP/2 and QUIC fingerprinting configuration.

pub mod http2;
pub mod profiles;
pub mod quic;
pub mod tls;

pub use http2::{Http2Settings, PriorityFrame, PriorityParam};
pub use profiles::Profile;
pub use quic::QuicTemplate;
pub use tls::{CertCompression, TlsFingerprint, TlsVersion};

/// Source of the ClientHello template.
///
/// A verbatim template takes precedence over a named preset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsTemplate {
    preset: Option<Profile>,
    verbatim: Option<TlsFingerprint>,
}

impl TlsTemplate {
    pub fn preset(profile: Profile) -> Self {
        Self {
            preset: Some(profile),
            verbatim: None,
        }
    }

    pub fn verbatim(fingerprint: TlsFingerprint) -> Self {
        Self {
            preset: None,
            verbatim: Some(fingerprint),
        }
    }

    pub fn set_preset(&mut self, profile: Profile) {
        self.preset = Some(profile);
    }

    pub fn set_verbatim(&mut self, fingerprint: TlsFingerprint) {
        self.verbatim = Some(fingerprint);
    }

    pub fn profile(&self) -> Option<Profile> {
        self.preset
    }

    pub fn verbatim_fingerprint(&self) -> Option<&TlsFingerprint> {
        self.verbatim.as_ref()
    }

    /// The template that is actually sent.
    pub fn resolve(&self) -> TlsFingerprint {
        match (&self.verbatim, self.preset) {
            (Some(fp), _) => fp.clone(),
            (None, Some(profile)) => profile.tls_fingerprint(),
            (None, None) => TlsFingerprint::default(),
        }
    }
}

/// Immutable description of the fingerprint a client presents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintSpec {
    pub tls: TlsTemplate,
    pub http2: Option<Http2Settings>,
    pub quic: Option<QuicTemplate>,
}

impl FingerprintSpec {
    pub fn from_profile(profile: Profile) -> Self {
        profile.spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbatim_wins_over_preset() {
        let custom = TlsFingerprint {
            curves: vec!["X25519".into()],
            ..TlsFingerprint::default()
        };
        let mut template = TlsTemplate::preset(Profile::Chrome131);
        template.set_verbatim(custom.clone());
        assert_eq!(template.resolve(), custom);
    }

    #[test]
    fn test_preset_resolution() {
        let template = TlsTemplate::preset(Profile::Firefox133);
        assert_eq!(template.resolve(), TlsFingerprint::firefox_133());
        assert_eq!(TlsTemplate::default().resolve(), TlsFingerprint::default());
    }

    #[test]
    fn test_profile_spec() {
        let spec = FingerprintSpec::from_profile(Profile::Chrome131);
        assert_eq!(spec.http2, Some(Http2Settings::chrome()));
        assert_eq!(spec.quic, Some(QuicTemplate::chrome()));
        assert!(Profile::None.spec().http2.is_none());
    }
}
