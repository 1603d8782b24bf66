//! TLS certificate loading.

use std::path::PathBuf;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum CertificateLoadError {
    #[error("certificate file not found: {0:?}")]
    MissingCertificate(PathBuf),
    #[error("private key file not found: {0:?}")]
    MissingKey(PathBuf),
    #[error("unusable certificate or key: {0}")]
    Invalid(#[from] std::io::Error),
}

/// Load the PEM certificate chain and private key named in `tls`.
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, CertificateLoadError> {
    if !tls.cert_path.exists() {
        return Err(CertificateLoadError::MissingCertificate(tls.cert_path.clone()));
    }
    if !tls.key_path.exists() {
        return Err(CertificateLoadError::MissingKey(tls.key_path.clone()));
    }

    let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
    Ok(config)
}
