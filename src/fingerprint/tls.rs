//! TLS ClientHello template (JA3/JA4 surface).
//!
//! BoringSSL builds the actual ClientHello; the template decides which
//! suites, groups, signature algorithms, ALPN tokens, versions and optional
//! extensions go into it.

use boring::ssl::SslVersion;

/// Chrome 131 cipher suites in exact order.
///
/// TLS 1.3 suites use their IANA names and are fixed by BoringSSL; the
/// TLS 1.2 suites use OpenSSL names so they can be passed to the cipher list.
pub const CHROME_131_CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Chrome 131 signature algorithms.
pub const CHROME_131_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "rsa_pss_rsae_sha256",
    "rsa_pkcs1_sha256",
    "ecdsa_secp384r1_sha384",
    "rsa_pss_rsae_sha384",
    "rsa_pkcs1_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha512",
];

/// Chrome 131 supported groups.
pub const CHROME_131_CURVES: &[&str] = &["X25519", "P-256", "P-384"];

/// Chrome 131 extension IDs in exact order.
pub const CHROME_131_EXTENSION_IDS: &[u16] =
    &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 21];

/// Firefox 133 cipher suites in exact order.
pub const FIREFOX_133_CIPHER_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_CHACHA20_POLY1305_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Firefox 133 signature algorithms.
pub const FIREFOX_133_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "ecdsa_secp384r1_sha384",
    "ecdsa_secp521r1_sha512",
    "rsa_pss_rsae_sha256",
    "rsa_pss_rsae_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha256",
    "rsa_pkcs1_sha384",
    "rsa_pkcs1_sha512",
    "ecdsa_sha1",
    "rsa_pkcs1_sha1",
];

/// Firefox 133 supported groups.
pub const FIREFOX_133_CURVES: &[&str] = &["X25519", "P-256", "P-384", "P-521"];

/// Firefox 133 extension IDs in exact order.
pub const FIREFOX_133_EXTENSION_IDS: &[u16] =
    &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 27];

/// ALPN token for HTTP/2.
pub const ALPN_H2: &str = "h2";
/// ALPN token for HTTP/1.1.
pub const ALPN_HTTP1: &str = "http/1.1";

/// TLS extension carrying session tickets.
const EXT_SESSION_TICKET: u16 = 35;
/// TLS extension carrying pre-shared keys (TLS 1.3 resumption).
const EXT_PRE_SHARED_KEY: u16 = 41;

/// Certificate compression algorithm advertised in `compress_certificate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertCompression {
    Brotli,
    Zlib,
    #[default]
    None,
}

/// TLS protocol version bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    pub(crate) fn to_ssl_version(self) -> SslVersion {
        match self {
            Self::Tls12 => SslVersion::TLS1_2,
            Self::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// TLS fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFingerprint {
    /// Cipher suites in order.
    pub cipher_list: Vec<String>,
    /// Signature algorithms.
    pub sigalgs: Vec<String>,
    /// Supported curves/groups.
    pub curves: Vec<String>,
    /// Extension order (JA3 reference; BoringSSL permutes when enabled).
    pub extensions: Vec<u16>,
    /// ALPN tokens in preference order.
    pub alpn: Vec<String>,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    /// Enable GREASE values.
    pub grease: bool,
    /// Randomize extension order per ClientHello (Chrome 110+).
    pub permute_extensions: bool,
    pub cert_compression: CertCompression,
    /// Send `status_request`.
    pub ocsp_stapling: bool,
    /// Send `signed_certificate_timestamp`.
    pub signed_cert_timestamps: bool,
}

impl Default for TlsFingerprint {
    fn default() -> Self {
        Self {
            cipher_list: vec![],
            sigalgs: vec![],
            curves: vec![],
            extensions: vec![],
            alpn: vec![ALPN_H2.to_string(), ALPN_HTTP1.to_string()],
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            grease: false,
            permute_extensions: false,
            cert_compression: CertCompression::None,
            ocsp_stapling: false,
            signed_cert_timestamps: false,
        }
    }
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl TlsFingerprint {
    /// Create a TLS fingerprint for Chrome 131.
    pub fn chrome_131() -> Self {
        Self {
            cipher_list: owned(CHROME_131_CIPHER_SUITES),
            sigalgs: owned(CHROME_131_SIGNATURE_ALGORITHMS),
            curves: owned(CHROME_131_CURVES),
            extensions: CHROME_131_EXTENSION_IDS.to_vec(),
            alpn: vec![ALPN_H2.to_string(), ALPN_HTTP1.to_string()],
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            grease: true,
            permute_extensions: true,
            cert_compression: CertCompression::Brotli,
            ocsp_stapling: true,
            signed_cert_timestamps: true,
        }
    }

    /// Create a TLS fingerprint for Firefox 133.
    pub fn firefox_133() -> Self {
        Self {
            cipher_list: owned(FIREFOX_133_CIPHER_SUITES),
            sigalgs: owned(FIREFOX_133_SIGNATURE_ALGORITHMS),
            curves: owned(FIREFOX_133_CURVES),
            extensions: FIREFOX_133_EXTENSION_IDS.to_vec(),
            alpn: vec![ALPN_H2.to_string(), ALPN_HTTP1.to_string()],
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            grease: false,
            permute_extensions: false,
            cert_compression: CertCompression::Zlib,
            ocsp_stapling: true,
            signed_cert_timestamps: false,
        }
    }

    /// Copy of this template that cannot negotiate HTTP/2.
    ///
    /// The `h2` token is removed and `http/1.1` is guaranteed to be offered
    /// first, so the server has nothing else to select.
    pub fn without_h2(&self) -> Self {
        let mut fp = self.clone();
        fp.alpn.retain(|p| p != ALPN_H2 && p != ALPN_HTTP1);
        fp.alpn.insert(0, ALPN_HTTP1.to_string());
        fp
    }

    /// Whether the template offers the HTTP/2 token.
    pub fn offers_h2(&self) -> bool {
        self.alpn.iter().any(|p| p == ALPN_H2)
    }

    /// Whether the template carries an extension that can resume a session.
    pub fn supports_session_resumption(&self) -> bool {
        self.extensions.is_empty()
            || self
                .extensions
                .iter()
                .any(|ext| *ext == EXT_SESSION_TICKET || *ext == EXT_PRE_SHARED_KEY)
    }

    /// Suites that BoringSSL accepts in a cipher list (TLS 1.2 and below).
    pub fn tls12_ciphers(&self) -> Vec<&str> {
        self.cipher_list
            .iter()
            .map(String::as_str)
            .filter(|c| !is_tls13_suite(c))
            .collect()
    }

    /// ALPN list in wire format (length-prefixed tokens).
    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut wire = Vec::new();
        for proto in &self.alpn {
            let bytes = proto.as_bytes();
            if bytes.is_empty() || bytes.len() > u8::MAX as usize {
                continue;
            }
            wire.push(bytes.len() as u8);
            wire.extend_from_slice(bytes);
        }
        wire
    }

    /// Only TLS 1.3 may be negotiated.
    pub fn is_tls13_only(&self) -> bool {
        self.min_version == TlsVersion::Tls13
    }
}

fn is_tls13_suite(name: &str) -> bool {
    matches!(
        name,
        "TLS_AES_128_GCM_SHA256"
            | "TLS_AES_256_GCM_SHA384"
            | "TLS_CHACHA20_POLY1305_SHA256"
            | "TLS_AES_128_CCM_SHA256"
            | "TLS_AES_128_CCM_8_SHA256"
    )
}
