//! HTTP error types

use std::path::PathBuf;

/// Error type for HTTP operations
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Failed to build client for target {target}: {source}")]
    ClientBuild {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to load certificate {path}: {message}")]
    Certificate { path: PathBuf, message: String },
}
