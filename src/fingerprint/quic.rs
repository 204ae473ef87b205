//! QUIC transport parameters and HTTP/3 settings.

use std::time::Duration;

use boring::ssl::{SslContextBuilder, SslMethod, SslVerifyMode};
use boring::x509::X509;

use crate::error::{Error, Result};
use crate::fingerprint::tls::TlsFingerprint;
use crate::transport::connector::configure_extensions;

/// QUIC transport parameter template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicTemplate {
    pub max_idle_timeout: Duration,
    pub max_recv_udp_payload_size: usize,
    pub max_send_udp_payload_size: usize,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    /// Milliseconds.
    pub max_ack_delay: u64,
    pub active_connection_id_limit: u64,
    pub disable_active_migration: bool,
    pub grease: bool,
    /// SETTINGS_MAX_FIELD_SECTION_SIZE.
    pub max_field_section_size: Option<u64>,
    /// SETTINGS_QPACK_MAX_TABLE_CAPACITY.
    pub qpack_max_table_capacity: Option<u64>,
    /// SETTINGS_QPACK_BLOCKED_STREAMS.
    pub qpack_blocked_streams: Option<u64>,
}

impl Default for QuicTemplate {
    fn default() -> Self {
        Self::chrome()
    }
}

impl QuicTemplate {
    /// Chrome 131 transport parameters.
    pub fn chrome() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            max_recv_udp_payload_size: 1472,
            max_send_udp_payload_size: 1350,
            initial_max_data: 15_728_640,
            initial_max_stream_data_bidi_local: 6_291_456,
            initial_max_stream_data_bidi_remote: 6_291_456,
            initial_max_stream_data_uni: 6_291_456,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 103,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            active_connection_id_limit: 2,
            disable_active_migration: true,
            grease: true,
            max_field_section_size: Some(262_144),
            qpack_max_table_capacity: Some(0),
            qpack_blocked_streams: Some(0),
        }
    }

    /// Firefox 133 transport parameters.
    pub fn firefox() -> Self {
        Self {
            max_idle_timeout: Duration::from_secs(30),
            max_recv_udp_payload_size: 1472,
            max_send_udp_payload_size: 1252,
            initial_max_data: 25_165_824,
            initial_max_stream_data_bidi_local: 12_582_912,
            initial_max_stream_data_bidi_remote: 1_048_576,
            initial_max_stream_data_uni: 1_048_576,
            initial_max_streams_bidi: 16,
            initial_max_streams_uni: 16,
            ack_delay_exponent: 3,
            max_ack_delay: 20,
            active_connection_id_limit: 8,
            disable_active_migration: false,
            grease: false,
            max_field_section_size: None,
            qpack_max_table_capacity: Some(65_536),
            qpack_blocked_streams: Some(20),
        }
    }

    /// Build a quiche configuration carrying this template and the TLS
    /// template's groups and signature algorithms.
    pub(crate) fn quic_config(
        &self,
        tls: &TlsFingerprint,
        root_certs: &[Vec<u8>],
        verify: bool,
    ) -> Result<quiche::Config> {
        let mut ssl = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL context: {}", e)))?;

        if verify {
            ssl.set_default_verify_paths()
                .map_err(|e| Error::tls(format!("Failed to load system roots: {}", e)))?;
            ssl.set_verify(SslVerifyMode::PEER);
        } else {
            ssl.set_verify(SslVerifyMode::NONE);
        }
        for cert in root_certs {
            match X509::from_der(cert).or_else(|_| X509::from_pem(cert)) {
                Ok(cert) => {
                    if let Err(e) = ssl.cert_store_mut().add_cert(cert) {
                        tracing::warn!("failed to add root certificate for QUIC: {}", e);
                    }
                }
                Err(e) => tracing::warn!("ignoring unparsable root certificate for QUIC: {}", e),
            }
        }

        // QUIC is TLS 1.3 only; its suites are fixed by BoringSSL.
        if !tls.curves.is_empty() {
            ssl.set_curves_list(&tls.curves.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set curves: {}", e)))?;
        }
        if !tls.sigalgs.is_empty() {
            ssl.set_sigalgs_list(&tls.sigalgs.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set signature algorithms: {}", e)))?;
        }
        configure_extensions(&mut ssl, tls);

        let mut config =
            quiche::Config::with_boring_ssl_ctx_builder(quiche::PROTOCOL_VERSION, ssl)
                .map_err(|e| Error::quic(format!("Failed to create quiche config: {}", e)))?;

        config
            .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
            .map_err(|e| Error::quic(format!("Failed to set ALPN: {}", e)))?;
        config.verify_peer(verify);

        config.set_max_idle_timeout(self.max_idle_timeout.as_millis() as u64);
        config.set_max_recv_udp_payload_size(self.max_recv_udp_payload_size);
        config.set_max_send_udp_payload_size(self.max_send_udp_payload_size);
        config.set_initial_max_data(self.initial_max_data);
        config.set_initial_max_stream_data_bidi_local(self.initial_max_stream_data_bidi_local);
        config.set_initial_max_stream_data_bidi_remote(self.initial_max_stream_data_bidi_remote);
        config.set_initial_max_stream_data_uni(self.initial_max_stream_data_uni);
        config.set_initial_max_streams_bidi(self.initial_max_streams_bidi);
        config.set_initial_max_streams_uni(self.initial_max_streams_uni);
        config.set_ack_delay_exponent(self.ack_delay_exponent);
        config.set_max_ack_delay(self.max_ack_delay);
        config.set_active_connection_id_limit(self.active_connection_id_limit);
        config.set_disable_active_migration(self.disable_active_migration);
        config.grease(self.grease);

        Ok(config)
    }

    /// HTTP/3 SETTINGS for this template.
    pub(crate) fn h3_config(&self) -> Result<quiche::h3::Config> {
        let mut config = quiche::h3::Config::new()
            .map_err(|e| Error::quic(format!("H3 config error: {}", e)))?;
        if let Some(size) = self.max_field_section_size {
            config.set_max_field_section_size(size);
        }
        if let Some(capacity) = self.qpack_max_table_capacity {
            config.set_qpack_max_table_capacity(capacity);
        }
        if let Some(blocked) = self.qpack_blocked_streams {
            config.set_qpack_blocked_streams(blocked);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_flow_control() {
        let template = QuicTemplate::chrome();
        assert_eq!(template.initial_max_data, 15_728_640);
        assert_eq!(template.max_send_udp_payload_size, 1350);
        assert!(template.disable_active_migration);
        assert!(template.grease);
    }

    #[test]
    fn test_quic_config_builds_for_presets() {
        for template in [QuicTemplate::chrome(), QuicTemplate::firefox()] {
            assert!(template
                .quic_config(&TlsFingerprint::chrome_131(), &[], true)
                .is_ok());
            assert!(template.h3_config().is_ok());
        }
    }

    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bad_root_certificate_is_logged() {
        let logs = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || Captured(sink.clone()))
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || {
            QuicTemplate::chrome().quic_config(
                &TlsFingerprint::chrome_131(),
                &[b"not a certificate".to_vec()],
                true,
            )
        });
        assert!(config.is_ok());
        let logs = String::from_utf8_lossy(&logs.lock()).into_owned();
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("unparsable root certificate for QUIC"), "{}", logs);
    }
}
