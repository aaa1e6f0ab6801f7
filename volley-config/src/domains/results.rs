//! Result aggregation configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Result aggregation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Keep an aggregate per target
    #[serde(default = "crate::domains::utils::default_true")]
    pub collect_target_results: bool,

    /// Keep one aggregate combining all targets
    #[serde(default = "crate::domains::utils::default_false")]
    pub collect_all_targets: bool,

    /// Keep an aggregate per invocation
    #[serde(default = "crate::domains::utils::default_true")]
    pub collect_invocation_results: bool,

    /// Response headers whose names and values are counted
    #[serde(default)]
    pub tracked_headers: Vec<String>,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            collect_target_results: true,
            collect_all_targets: false,
            collect_invocation_results: true,
            tracked_headers: Vec::new(),
        }
    }
}

impl Validatable for ResultsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(header) = self.tracked_headers.iter().find(|h| h.trim().is_empty()) {
            return Err(self.validation_error(format!(
                "tracked_headers contains an empty header name: '{}'",
                header
            )));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "results"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_config_defaults() {
        let config = ResultsConfig::default();
        assert!(config.collect_target_results);
        assert!(!config.collect_all_targets);
        assert!(config.collect_invocation_results);
        assert!(config.tracked_headers.is_empty());
    }

    #[test]
    fn test_empty_tracked_header_rejected() {
        let config = ResultsConfig {
            tracked_headers: vec!["x-version".to_string(), " ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
