use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use boring::x509::X509;

/// Server preference: HTTP/2, then HTTP/1.1.
pub const ALPN_H2_H1: &[u8] = b"\x02h2\x08http/1.1";
/// Server that only speaks HTTP/1.1.
pub const ALPN_H1: &[u8] = b"\x08http/1.1";

/// Self-signed acceptor for 127.0.0.1 selecting from `alpn`, plus the PEM
/// certificate a client must trust.
pub fn acceptor(alpn: &'static [u8]) -> (SslAcceptor, Vec<u8>) {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];
    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");
    builder.set_alpn_select_callback(move |_, client| {
        select_next_proto(alpn, client).ok_or(AlpnError::NOACK)
    });

    (builder.build(), cert_pem.into_bytes())
}
