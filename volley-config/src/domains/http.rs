//! Per-target HTTP client pool configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP client pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Directory scanned once at startup for `*.crt` and `*.pem` trusted roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_dir: Option<PathBuf>,

    /// Maximum idle connections kept per host by HTTP/1.x clients
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// User agent string sent by target clients
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Interval between idle client sweeps
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_sweep_interval"
    )]
    pub sweep_interval: Duration,

    /// Consecutive idle sweeps after which a client is evicted
    #[serde(default = "default_idle_sweeps_before_evict")]
    pub idle_sweeps_before_evict: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cert_dir: None,
            max_idle_per_host: default_max_idle_per_host(),
            user_agent: default_user_agent(),
            sweep_interval: default_sweep_interval(),
            idle_sweeps_before_evict: default_idle_sweeps_before_evict(),
        }
    }
}

impl Validatable for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.max_idle_per_host,
            "max_idle_per_host",
            self.domain_name(),
        )?;
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;
        validate_positive(
            self.sweep_interval.as_secs(),
            "sweep_interval",
            self.domain_name(),
        )?;
        validate_positive(
            self.idle_sweeps_before_evict,
            "idle_sweeps_before_evict",
            self.domain_name(),
        )?;

        if let Some(ref dir) = self.cert_dir {
            if !dir.exists() {
                log::warn!("Certificate directory {} does not exist", dir.display());
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "http"
    }
}

fn default_max_idle_per_host() -> usize {
    100
}

fn default_user_agent() -> String {
    concat!("volley/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_idle_sweeps_before_evict() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.max_idle_per_host, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(120));
        assert_eq!(config.idle_sweeps_before_evict, 3);
        assert!(config.user_agent.starts_with("volley/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_config_validation() {
        let mut config = HttpConfig::default();
        config.sweep_interval = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config = HttpConfig::default();
        config.idle_sweeps_before_evict = 0;
        assert!(config.validate().is_err());

        config = HttpConfig::default();
        config.user_agent = String::new();
        assert!(config.validate().is_err());
    }
}
