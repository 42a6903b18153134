//! TLS/STARTTLS support for SMTP
//!
//! Both directions of the relay negotiate TLS in-band:
//! - Inbound: [`TlsConfig`] holds the server identity used by STARTTLS
//! - Outbound: [`TlsConfig::connector`] builds a client that accepts any
//!   peer certificate (trust-on-connect relaying)
//!
//! The identity is either loaded from PEM files or generated on the fly
//! with `rcgen` when no certificate is configured.

use crate::error::{RelayError, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

/// TLS configuration for SMTP
#[derive(Clone)]
pub struct TlsConfig {
    server_config: Arc<ServerConfig>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create TLS config from certificate and key files
    ///
    /// # Examples
    /// ```no_run
    /// use relay_rs::security::TlsConfig;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let tls_config = TlsConfig::from_pem_files(
    ///     "/etc/relay/cert.pem",
    ///     "/etc/relay/key.pem"
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        info!("Loading TLS certificate from {:?}", cert_path.as_ref());

        let cert_pem = std::fs::read(cert_path.as_ref())
            .map_err(|e| RelayError::Tls(format!("Failed to open certificate file: {}", e)))?;
        let key_pem = std::fs::read(key_path.as_ref())
            .map_err(|e| RelayError::Tls(format!("Failed to open key file: {}", e)))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Create TLS config from in-memory PEM data
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = certs(&mut BufReader::new(cert_pem))
            .map_err(|e| RelayError::Tls(format!("Failed to read certificates: {}", e)))?;

        if certs.is_empty() {
            return Err(RelayError::Tls("No certificates found".to_string()));
        }

        debug!("Loaded {} certificate(s)", certs.len());

        // Try PKCS8 first, then RSA
        let mut keys = pkcs8_private_keys(&mut BufReader::new(key_pem))
            .map_err(|e| RelayError::Tls(format!("Failed to read PKCS8 keys: {}", e)))?;
        if keys.is_empty() {
            keys = rsa_private_keys(&mut BufReader::new(key_pem))
                .map_err(|e| RelayError::Tls(format!("Failed to read RSA keys: {}", e)))?;
        }

        if keys.is_empty() {
            return Err(RelayError::Tls("No private key found".to_string()));
        }

        let private_key = PrivateKey(keys.remove(0));

        let server_config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs.into_iter().map(Certificate).collect(), private_key)
            .map_err(|e| RelayError::Tls(format!("Failed to create TLS config: {}", e)))?;

        Ok(Self {
            server_config: Arc::new(server_config),
            client_config: Arc::new(trust_on_connect_client()),
        })
    }

    /// Generate an in-memory self-signed identity for `hostname`
    pub fn self_signed(hostname: &str) -> Result<Self> {
        warn!(
            "No TLS certificate configured, generating self-signed identity for {}",
            hostname
        );

        let (cert_pem, key_pem) = self_signed_pem(hostname)?;
        Self::from_pem(cert_pem.as_bytes(), key_pem.as_bytes())
    }

    /// Create a TLS acceptor for inbound STARTTLS
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }

    /// Create a TLS connector for outbound STARTTLS
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config.clone())
    }
}

/// Generate self-signed certificate for development/testing
///
/// **WARNING**: Only use for development! Not secure for production.
pub fn generate_self_signed_cert(domain: &str, cert_output: &str, key_output: &str) -> Result<()> {
    let (cert_pem, key_pem) = self_signed_pem(domain)?;

    std::fs::write(cert_output, cert_pem)
        .map_err(|e| RelayError::Tls(format!("Failed to write certificate: {}", e)))?;
    std::fs::write(key_output, key_pem)
        .map_err(|e| RelayError::Tls(format!("Failed to write private key: {}", e)))?;

    info!(
        "Self-signed certificate generated: {} and {}",
        cert_output, key_output
    );

    Ok(())
}

fn self_signed_pem(domain: &str) -> Result<(String, String)> {
    let cert = rcgen::generate_simple_self_signed(vec![domain.to_string()])
        .map_err(|e| RelayError::Tls(format!("Failed to generate certificate: {}", e)))?;

    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| RelayError::Tls(format!("Failed to serialize certificate: {}", e)))?;

    Ok((cert_pem, cert.serialize_private_key_pem()))
}

/// Client config for outbound relaying: every peer certificate is accepted.
fn trust_on_connect_client() -> ClientConfig {
    ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(TrustOnConnect))
        .with_no_client_auth()
}

/// Certificate verifier that accepts whatever the peer presents.
struct TrustOnConnect;

impl ServerCertVerifier for TrustOnConnect {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
