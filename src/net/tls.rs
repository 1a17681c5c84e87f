//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys
//! - Build the server config shared by the HTTPS listener and the TCP router
//! - Build the client config used to reach TLS destinations
//!
//! Every config is built on the ring provider explicitly so the process
//! never depends on a globally installed default.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::schema::TlsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read `{path}`: {source}")]
    Read { path: String, source: io::Error },

    #[error("no certificates found in `{0}`")]
    NoCertificates(String),

    #[error("no private key found in `{0}`")]
    NoPrivateKey(String),

    #[error("invalid server name `{0}`")]
    InvalidServerName(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_err(path: &str) -> impl FnOnce(io::Error) -> TlsError + '_ {
    move |source| TlsError::Read {
        path: path.to_string(),
        source,
    }
}

fn parse_certs(pem: &mut dyn io::BufRead, origin: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err(origin))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(origin.to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &mut dyn io::BufRead, origin: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(pem)
        .map_err(read_err(origin))?
        .ok_or_else(|| TlsError::NoPrivateKey(origin.to_string()))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    let display = path.display().to_string();
    File::open(path).map(BufReader::new).map_err(read_err(&display))
}

/// Server config from in-memory PEM.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certs(&mut &cert_pem[..], "<memory>")?;
    let key = parse_key(&mut &key_pem[..], "<memory>")?;
    build_server_config(certs, key)
}

/// Server config from the `[tls]` section.
pub fn load_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certs(&mut open(Path::new(&config.cert_path))?, &config.cert_path)?;
    let key = parse_key(&mut open(Path::new(&config.key_path))?, &config.key_path)?;

    tracing::info!(
        cert = %config.cert_path,
        chain_len = certs.len(),
        "Loaded TLS certificate"
    );
    build_server_config(certs, key)
}

fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Copy of `base` advertising h2 and http/1.1 over ALPN.
pub fn with_http_alpn(base: &ServerConfig) -> Arc<ServerConfig> {
    let mut config = base.clone();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Client config trusting the platform roots plus `extra_roots`.
pub fn client_config(extra_roots: &[CertificateDer<'static>]) -> Result<Arc<ClientConfig>, TlsError> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::debug!(error = %error, "Skipping unreadable native certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "Loaded native root certificates");

    for cert in extra_roots {
        roots.add(cert.clone())?;
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub fn server_name(name: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(name.to_string()).map_err(|_| TlsError::InvalidServerName(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_generated_certificate() {
        let cert = rcgen::generate_simple_self_signed(vec!["a.test".to_string()]).unwrap();
        let config = server_config_from_pem(
            cert.cert.pem().as_bytes(),
            cert.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();
        assert!(config.alpn_protocols.is_empty());
        assert_eq!(with_http_alpn(&config).alpn_protocols.len(), 2);
    }

    #[test]
    fn rejects_empty_pem() {
        assert!(matches!(
            server_config_from_pem(b"", b""),
            Err(TlsError::NoCertificates(_))
        ));

        let cert = rcgen::generate_simple_self_signed(vec!["a.test".to_string()]).unwrap();
        assert!(matches!(
            server_config_from_pem(cert.cert.pem().as_bytes(), b""),
            Err(TlsError::NoPrivateKey(_))
        ));
    }

    #[test]
    fn client_config_accepts_extra_roots() {
        let cert = rcgen::generate_simple_self_signed(vec!["a.test".to_string()]).unwrap();
        let root = cert.cert.der().clone();
        assert!(client_config(&[root]).is_ok());
    }

    #[test]
    fn server_names() {
        assert!(server_name("db.example.com").is_ok());
        assert!(server_name("10.0.0.1").is_ok());
        assert!(matches!(server_name("not a name"), Err(TlsError::InvalidServerName(_))));
    }
}
