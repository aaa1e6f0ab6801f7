//! Error types for result mirroring

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Failed to build mirror client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Mirror request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to serialize mirror payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
