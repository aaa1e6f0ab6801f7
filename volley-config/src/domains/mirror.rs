//! Remote result mirroring configuration

use crate::error::ConfigResult;
use crate::validation::{validate_http_url, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote mirroring configuration
///
/// Aggregates are pushed to the locker of `peer_name`/`address` on the
/// registry at `registry_url`, keyed under `client_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Base URL of the peer registry
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Name this process is registered under
    #[serde(default = "default_peer_name")]
    pub peer_name: String,

    /// Address this process is registered under
    #[serde(default = "default_address")]
    pub address: String,

    /// Marker prefixed to every locker key
    #[serde(default = "default_client_key")]
    pub client_key: String,

    /// Timeout for a single mirroring request
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_request_timeout"
    )]
    pub request_timeout: Duration,

    /// How long shutdown waits for pending updates to be delivered
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_drain_timeout"
    )]
    pub drain_timeout: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            peer_name: default_peer_name(),
            address: default_address(),
            client_key: default_client_key(),
            request_timeout: default_request_timeout(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl Validatable for MirrorConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_http_url(&self.registry_url, "registry_url", self.domain_name())?;
        validate_required_string(&self.peer_name, "peer_name", self.domain_name())?;
        validate_required_string(&self.address, "address", self.domain_name())?;
        validate_required_string(&self.client_key, "client_key", self.domain_name())?;
        validate_positive(
            self.request_timeout.as_secs(),
            "request_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.drain_timeout.as_millis(),
            "drain_timeout",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "mirror"
    }
}

fn default_registry_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_peer_name() -> String {
    "volley".to_string()
}

fn default_address() -> String {
    "localhost:8081".to_string()
}

fn default_client_key() -> String {
    "client".to_string()
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}
