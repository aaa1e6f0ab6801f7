//! Invocation engine configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invocation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Capacity of each tracker's bounded result queue
    #[serde(default = "default_result_queue_capacity")]
    pub result_queue_capacity: usize,

    /// Pending results above which a backlog warning is logged
    #[serde(default = "default_backlog_warn_threshold")]
    pub backlog_warn_threshold: usize,

    /// Lower bound applied to every inter-round delay
    #[serde(
        with = "crate::domains::utils::serde_duration_ms",
        default = "default_min_round_delay"
    )]
    pub min_round_delay: Duration,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            result_queue_capacity: default_result_queue_capacity(),
            backlog_warn_threshold: default_backlog_warn_threshold(),
            min_round_delay: default_min_round_delay(),
        }
    }
}

impl Validatable for InvocationConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.result_queue_capacity,
            "result_queue_capacity",
            self.domain_name(),
        )?;

        if self.backlog_warn_threshold > self.result_queue_capacity {
            return Err(self.validation_error(format!(
                "backlog_warn_threshold ({}) cannot exceed result_queue_capacity ({})",
                self.backlog_warn_threshold, self.result_queue_capacity
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "invocation"
    }
}

fn default_result_queue_capacity() -> usize {
    200
}

fn default_backlog_warn_threshold() -> usize {
    50
}

fn default_min_round_delay() -> Duration {
    Duration::from_millis(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_config_defaults() {
        let config = InvocationConfig::default();
        assert_eq!(config.result_queue_capacity, 200);
        assert_eq!(config.backlog_warn_threshold, 50);
        assert_eq!(config.min_round_delay, Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backlog_threshold_bounded_by_capacity() {
        let config = InvocationConfig {
            result_queue_capacity: 10,
            backlog_warn_threshold: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
