//! Details of the TLS session a response arrived over.

use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::ssl::SslRef;
use boring::x509::{X509NameRef, X509Ref, X509};

/// Negotiated parameters and leaf certificate of a TLS (or QUIC) connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// e.g. `TLSv1.3`.
    pub version: String,
    pub cipher: Option<String>,
    pub alpn: Option<String>,
    pub server_name: Option<String>,
    pub common_name: Option<String>,
    pub organization: Vec<String>,
    pub dns_names: Vec<String>,
    pub emails: Vec<String>,
    pub issuer_common_name: Option<String>,
    pub issuer_organization: Vec<String>,
    /// Lowercase hex SHA-256 of the DER certificate.
    pub fingerprint_sha256: Option<String>,
    /// Same digest in OpenSSL's `AB:CD:...` form.
    pub fingerprint_sha256_openssl: Option<String>,
    pub not_after: Option<String>,
}

impl TlsInfo {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let mut info = Self {
            version: ssl.version_str().to_string(),
            cipher: ssl.current_cipher().map(|c| c.name().to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            server_name: ssl
                .servername(boring::ssl::NameType::HOST_NAME)
                .map(str::to_string),
            ..Self::default()
        };
        if let Some(cert) = ssl.peer_certificate() {
            info.fill_certificate(&cert);
        }
        info
    }

    /// Built from what quiche exposes after a QUIC handshake.
    pub fn from_quic(
        version: &str,
        alpn: &[u8],
        server_name: Option<&str>,
        peer_cert: Option<&[u8]>,
    ) -> Self {
        let mut info = Self {
            version: version.to_string(),
            alpn: (!alpn.is_empty()).then(|| String::from_utf8_lossy(alpn).into_owned()),
            server_name: server_name.map(str::to_string),
            ..Self::default()
        };
        match peer_cert.map(X509::from_der) {
            Some(Ok(cert)) => info.fill_certificate(&cert),
            Some(Err(e)) => tracing::debug!("unparseable QUIC peer certificate: {}", e),
            None => {}
        }
        info
    }

    fn fill_certificate(&mut self, cert: &X509Ref) {
        let subject = cert.subject_name();
        self.common_name = name_entries(subject, Nid::COMMONNAME).into_iter().next();
        self.organization = name_entries(subject, Nid::ORGANIZATIONNAME);

        let issuer = cert.issuer_name();
        self.issuer_common_name = name_entries(issuer, Nid::COMMONNAME).into_iter().next();
        self.issuer_organization = name_entries(issuer, Nid::ORGANIZATIONNAME);

        if let Some(names) = cert.subject_alt_names() {
            for name in names.iter() {
                if let Some(dns) = name.dnsname() {
                    self.dns_names.push(dns.to_string());
                } else if let Some(email) = name.email() {
                    self.emails.push(email.to_string());
                }
            }
        }

        match cert.digest(MessageDigest::sha256()) {
            Ok(digest) => {
                self.fingerprint_sha256 = Some(hex::encode(&*digest));
                self.fingerprint_sha256_openssl = Some(openssl_fingerprint(&digest));
            }
            Err(e) => tracing::debug!("certificate digest failed: {}", e),
        }
        self.not_after = Some(cert.not_after().to_string());
    }
}

fn name_entries(name: &X509NameRef, nid: Nid) -> Vec<String> {
    name.entries_by_nid(nid)
        .filter_map(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .collect()
}

fn openssl_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
