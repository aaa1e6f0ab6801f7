//! Domain-specific configuration modules

pub mod http;
pub mod invocation;
pub mod logging;
pub mod mirror;
pub mod results;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Volley configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VolleyConfig {
    /// Invocation engine configuration
    #[serde(default)]
    pub invocation: invocation::InvocationConfig,

    /// Per-target HTTP client pool configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Result aggregation configuration
    #[serde(default)]
    pub results: results::ResultsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Remote mirroring configuration (optional, mirroring is off without it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<mirror::MirrorConfig>,
}

impl VolleyConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.invocation.validate()?;
        self.http.validate()?;
        self.results.validate()?;
        self.logging.validate()?;

        if let Some(ref mirror) = self.mirror {
            mirror.validate()?;
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = VolleyConfig {
            mirror: Some(mirror::MirrorConfig::default()),
            ..Default::default()
        };
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
