//! Trust store loading.
//!
//! A [`TrustBundle`] is the set of root certificates every connection verifies
//! the server against. It is built once at startup from a PEM bundle and shared
//! read-only afterwards; there is no API to add or remove anchors later.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building a [`TrustBundle`].
///
/// Both variants are fatal for the process: no connection can be verified
/// without a trust pool.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// The bundle was empty, malformed, or held a certificate the store rejected.
    #[error("invalid certificate data: {0}")]
    InvalidCertificateData(String),

    /// The bundle file could not be read.
    #[error("failed to read certificate bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An immutable pool of trusted root certificates.
///
/// Cloning is cheap; clones share the same parsed store.
#[derive(Clone)]
pub struct TrustBundle {
    roots: Arc<RootCertStore>,
    pem: Arc<[u8]>,
}

impl TrustBundle {
    /// Parse one or more PEM-encoded certificates into a verification pool.
    ///
    /// There is no partial-trust fallback: a single bad section fails the
    /// whole bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self, TrustStoreError> {
        if pem.iter().all(u8::is_ascii_whitespace) {
            return Err(TrustStoreError::InvalidCertificateData(
                "certificate bundle is empty".into(),
            ));
        }

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TrustStoreError::InvalidCertificateData(e.to_string()))?;

        if certs.is_empty() {
            return Err(TrustStoreError::InvalidCertificateData(
                "no certificates found in bundle".into(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for (index, cert) in certs.into_iter().enumerate() {
            roots.add(cert).map_err(|e| {
                TrustStoreError::InvalidCertificateData(format!("certificate #{index}: {e}"))
            })?;
        }

        debug!(anchors = roots.len(), "trust bundle built");

        Ok(Self {
            roots: Arc::new(roots),
            pem: Arc::from(pem),
        })
    }

    /// Read and parse a PEM bundle from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TrustStoreError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| TrustStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem)
    }

    /// Number of trust anchors in the pool.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// The parsed root store, for rustls client configs.
    pub fn root_store(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// The PEM bytes as loaded, for drivers that take a CA bundle as PEM.
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("anchors", &self.roots.len())
            .finish()
    }
}

/// A named binding of a trust bundle, referenced from connection strings via `tls=<name>`.
#[derive(Debug, Clone)]
pub struct TransportProfile {
    name: String,
    bundle: TrustBundle,
}

impl TransportProfile {
    pub fn new(name: impl Into<String>, bundle: TrustBundle) -> Self {
        Self {
            name: name.into(),
            bundle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundle(&self) -> &TrustBundle {
        &self.bundle
    }
}
