//! Configuration loading and environment variable handling

use crate::domains::VolleyConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "VOLLEY".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<VolleyConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: VolleyConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<VolleyConfig> {
        let mut config = VolleyConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<VolleyConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut VolleyConfig) -> ConfigResult<()> {
        self.apply_invocation_overrides(&mut config.invocation)?;
        self.apply_http_overrides(&mut config.http)?;
        self.apply_results_overrides(&mut config.results)?;
        self.apply_logging_overrides(&mut config.logging)?;
        self.apply_mirror_overrides(&mut config.mirror)?;
        Ok(())
    }

    fn apply_invocation_overrides(
        &self,
        config: &mut crate::domains::invocation::InvocationConfig,
    ) -> ConfigResult<()> {
        if let Some(capacity) = self.parse_env_var("RESULT_QUEUE_CAPACITY")? {
            config.result_queue_capacity = capacity;
        }

        if let Some(threshold) = self.parse_env_var("BACKLOG_WARN_THRESHOLD")? {
            config.backlog_warn_threshold = threshold;
        }

        Ok(())
    }

    fn apply_http_overrides(&self, config: &mut crate::domains::http::HttpConfig) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("CERT_DIR") {
            config.cert_dir = Some(dir.into());
        }

        if let Some(seconds) = self.parse_env_var::<u64>("SWEEP_INTERVAL")? {
            config.sweep_interval = std::time::Duration::from_secs(seconds);
        }

        if let Some(sweeps) = self.parse_env_var("IDLE_SWEEPS_BEFORE_EVICT")? {
            config.idle_sweeps_before_evict = sweeps;
        }

        Ok(())
    }

    fn apply_results_overrides(
        &self,
        config: &mut crate::domains::results::ResultsConfig,
    ) -> ConfigResult<()> {
        if let Ok(headers) = self.get_env_var("TRACKED_HEADERS") {
            config.tracked_headers = headers
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }

        if let Some(enabled) = self.parse_env_var("COLLECT_ALL_TARGETS")? {
            config.collect_all_targets = enabled;
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// A registry URL in the environment turns mirroring on
    fn apply_mirror_overrides(
        &self,
        config: &mut Option<crate::domains::mirror::MirrorConfig>,
    ) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("REGISTRY_URL") {
            config.get_or_insert_with(Default::default).registry_url = url;
        }

        if let Some(mirror) = config.as_mut() {
            if let Ok(peer) = self.get_env_var("PEER_NAME") {
                mirror.peer_name = peer;
            }
            if let Ok(address) = self.get_env_var("PEER_ADDRESS") {
                mirror.address = address;
            }
            if let Ok(key) = self.get_env_var("CLIENT_KEY") {
                mirror.client_key = key;
            }
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }

    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
