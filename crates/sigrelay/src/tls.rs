use crate::error::RelayError;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from a PEM certificate chain and private key.
///
/// # Errors
///
/// Returns [`RelayError::Tls`] if either file cannot be read, holds no usable
/// certificate or key, or the pair is rejected by rustls.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, RelayError> {
    let cert_file = File::open(cert_path).map_err(|e| {
        RelayError::Tls(format!("failed to open cert file {}: {}", cert_path.display(), e))
    })?;
    let key_file = File::open(key_path).map_err(|e| {
        RelayError::Tls(format!("failed to open key file {}: {}", key_path.display(), e))
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .filter_map(Result::ok)
        .collect();
    if certs.is_empty() {
        return Err(RelayError::Tls(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| RelayError::Tls(format!("failed to read key file: {}", e)))?
        .ok_or_else(|| {
            RelayError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let server_config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RelayError::Tls(format!("tls config error: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| RelayError::Tls(format!("tls config error: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
