//! Trusted root certificates shared by every target client

use crate::errors::HttpError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const CERT_PATTERNS: [&str; 2] = ["*.crt", "*.pem"];

/// Root certificates loaded once at startup.
///
/// Cloning is cheap; every pooled client adds the same set on top of the
/// built-in web PKI roots.
#[derive(Clone, Default)]
pub struct TrustedRoots {
    certificates: Arc<Vec<reqwest::Certificate>>,
}

impl std::fmt::Debug for TrustedRoots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustedRoots")
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

impl TrustedRoots {
    /// An empty set, only the built-in roots are trusted
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `*.crt` and `*.pem` file directly under `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, HttpError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(HttpError::Certificate {
                path: dir.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let mut certificates = Vec::new();
        for pattern in CERT_PATTERNS {
            let full_pattern = dir.join(pattern);
            let paths = glob::glob(&full_pattern.to_string_lossy()).map_err(|e| {
                HttpError::Certificate {
                    path: dir.to_path_buf(),
                    message: e.to_string(),
                }
            })?;

            for entry in paths {
                let path = entry.map_err(|e| HttpError::Certificate {
                    path: e.path().to_path_buf(),
                    message: e.to_string(),
                })?;
                let pem = std::fs::read(&path).map_err(|e| HttpError::Certificate {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                let certificate =
                    reqwest::Certificate::from_pem(&pem).map_err(|e| HttpError::Certificate {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                debug!("Loaded trusted root {}", path.display());
                certificates.push(certificate);
            }
        }

        info!(
            "Loaded {} trusted root certificates from {}",
            certificates.len(),
            dir.display()
        );

        Ok(Self {
            certificates: Arc::new(certificates),
        })
    }

    /// Load from an optional directory, empty when none is configured
    pub fn load(dir: Option<&Path>) -> Result<Self, HttpError> {
        match dir {
            Some(dir) => Self::load_dir(dir),
            None => Ok(Self::empty()),
        }
    }

    pub fn certificates(&self) -> &[reqwest::Certificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}
