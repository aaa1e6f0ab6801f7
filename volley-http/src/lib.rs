//! HTTP transport layer for Volley
//!
//! This crate owns everything the invocation engine needs from HTTP below the
//! request level: method and protocol types, the trusted-root set loaded at
//! startup, and the per-target [`ClientPool`] with its idle-eviction sweep.

pub mod config;
pub mod errors;
pub mod pool;
pub mod tls;
pub mod types;

// Re-export main types for convenience
pub use config::PoolConfig;
pub use errors::HttpError;
pub use pool::{ClientOptions, ClientPool};
pub use tls::TrustedRoots;
pub use types::{HttpMethod, HttpMethodError, ProtocolVersion};
