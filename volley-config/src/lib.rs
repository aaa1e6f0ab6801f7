//! Domain-driven configuration management for Volley
//!
//! Configuration is split by functional domain (invocation engine, HTTP client
//! pool, result aggregation, remote mirroring, logging). Every domain has
//! defaults, implements [`Validatable`], and can be overridden from
//! `VOLLEY_*` environment variables through the [`ConfigLoader`].

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    http::HttpConfig,
    invocation::InvocationConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    mirror::MirrorConfig,
    results::ResultsConfig,
    VolleyConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
