// Shared transport configuration for HTTP and WebSocket sessions.
//
// The challenge probe, the cloud lookup, and the WebSocket upgrade all
// share TLS and timeout settings through this module. Local gateways
// present self-signed certificates, so "accept invalid" is a real mode.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls_pki_types::pem::PemObject;
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::Error;

const USER_AGENT: &str = "tydom-rs/0.1.0";

/// TLS verification mode.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the bundled webpki root store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for the gateway's self-signed one).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// Each call yields a fresh session; dropping it closes any pooled
    /// connections.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(USER_AGENT)
            .http1_only();

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build the rustls connector used for the `wss://` upgrade.
    ///
    /// Returns `None` for [`TlsMode::System`] so tungstenite falls back to
    /// its own webpki-roots configuration.
    pub fn websocket_connector(&self) -> Result<Option<tokio_tungstenite::Connector>, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let config = match &self.tls {
            TlsMode::System => return Ok(None),
            TlsMode::CustomCa(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let mut roots = rustls::RootCertStore::empty();
                for cert in CertificateDer::pem_slice_iter(&pem) {
                    let cert = cert.map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::DangerAcceptInvalid => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth(),
        };

        Ok(Some(tokio_tungstenite::Connector::Rustls(Arc::new(config))))
    }
}

// ── Insecure verifier ────────────────────────────────────────────────

/// Certificate verifier that accepts anything. Only used when the caller
/// opted into [`TlsMode::DangerAcceptInvalid`].
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
