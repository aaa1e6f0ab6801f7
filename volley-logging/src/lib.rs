//! Structured logging initialisation for Volley
//!
//! The engine crates log through `tracing`; this crate installs the global
//! subscriber from [`volley_config::LoggingConfig`].

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
