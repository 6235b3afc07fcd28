//! rustls client setup for the control connection.
//!
//! The server certificate must chain to one of the configured CA directories,
//! but its host name is not checked: catalogue front-ends are reached under
//! aliases their certificates do not list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AppError, AppResult};
use crate::identity::Identity;

fn provider() -> Arc<CryptoProvider> { Arc::new(rustls::crypto::ring::default_provider()) }

/// Collect every PEM certificate found directly inside the given directories.
/// Unreadable files and non-certificate PEM blocks are skipped.
pub fn load_roots(dirs: &[PathBuf]) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    for dir in dirs {
        for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() { continue; }
            let Ok(bytes) = fs::read(entry.path()) else { continue };
            for cert in CertificateDer::pem_slice_iter(&bytes).filter_map(|c| c.ok()) {
                if let Err(e) = roots.add(cert) {
                    debug!(target: "jsh::tls", "skipping {}: {}", entry.path().display(), e);
                }
            }
        }
    }
    debug!(target: "jsh::tls", "loaded {} trust anchors", roots.len());
    roots
}

fn read_chain(path: &Path) -> AppResult<Vec<CertificateDer<'static>>> {
    let bytes = fs::read(path).map_err(|e| AppError::tls("cert_unreadable", format!("{}: {}", path.display(), e)))?;
    let chain = CertificateDer::pem_slice_iter(&bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::tls("cert_invalid", format!("{}: {}", path.display(), e)))?;
    if chain.is_empty() {
        return Err(AppError::tls("cert_invalid", format!("{}: no certificate found", path.display())));
    }
    Ok(chain)
}

fn read_key(path: &Path) -> AppResult<PrivateKeyDer<'static>> {
    let bytes = fs::read(path).map_err(|e| AppError::tls("key_unreadable", format!("{}: {}", path.display(), e)))?;
    PrivateKeyDer::from_pem_slice(&bytes).map_err(|e| AppError::tls("key_invalid", format!("{}: {}", path.display(), e)))
}

/// Verifies the server chain against the trust store and ignores only a host-name mismatch.
#[derive(Debug)]
pub struct CaChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl CaChainVerifier {
    pub fn new(roots: RootCertStore) -> AppResult<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|e| AppError::tls("no_trust_anchors", e.to_string()))?;
        Ok(Self { inner })
    }
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(err, CertificateError::NotValidForName) || format!("{:?}", err).starts_with("NotValidForName")
}

impl ServerCertVerifier for CaChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Err(rustls::Error::InvalidCertificate(ref e)) if is_name_mismatch(e) => {
                debug!(target: "jsh::tls", "accepting certificate not issued for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> { self.inner.supported_verify_schemes() }
}

/// Client config presenting `identity` and trusting the CA directories.
pub fn client_config(identity: &Identity, ca_dirs: &[PathBuf]) -> AppResult<Arc<ClientConfig>> {
    let roots = load_roots(ca_dirs);
    if roots.is_empty() {
        warn!(target: "jsh::tls", "no CA certificates found in {:?}", ca_dirs);
    }
    let verifier = CaChainVerifier::new(roots)?;
    let chain = read_chain(&identity.cert)?;
    let key = read_key(&identity.key)?;
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| AppError::tls("tls_versions", e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(chain, key)
        .map_err(|e| AppError::tls("client_auth", e.to_string()))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tls_tests;
