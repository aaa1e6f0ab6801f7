//! Error types for target validation and the invocation engine

use thiserror::Error;
use volley_http::HttpError;

/// Reasons a target specification is rejected.
///
/// These are returned synchronously before any resource is allocated and are
/// never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Target name is required")]
    MissingName,

    #[error("Target {0}: method is required")]
    MissingMethod(String),

    #[error("Target {target}: invalid method '{method}'")]
    InvalidMethod { target: String, method: String },

    #[error("Target {0}: url is required")]
    MissingUrl(String),

    #[error("Target {target}: invalid url '{url}': {reason}")]
    InvalidUrl {
        target: String,
        url: String,
        reason: String,
    },

    #[error("Target {0}: fallback and A-B mode cannot both be enabled")]
    ConflictingModes(String),

    #[error("Target {target}: {mode} mode requires at least one B-URL")]
    MissingBUrls { target: String, mode: &'static str },

    #[error("Target {target}: invalid {field} '{value}': {reason}")]
    InvalidDuration {
        target: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Target {target}: invalid auto payload size '{value}'")]
    InvalidPayloadSize { target: String, value: String },

    #[error("Target {0}: a streamed body can only be sent once and cannot be combined with replicas > 1")]
    StreamWithReplicas(String),

    #[error("Target {target}: invalid header '{name}': {reason}")]
    InvalidHeader {
        target: String,
        name: String,
        reason: String,
    },
}

/// Engine-level errors surfaced to callers of registration
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Failed to buffer streamed body for target {target}: {source}")]
    BodyBuffer {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tracker {0} is closed")]
    TrackerClosed(u64),
}
