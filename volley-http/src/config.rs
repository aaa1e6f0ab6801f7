//! Client pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use volley_config::HttpConfig as ConfigHttpConfig;

/// Settings shared by every client the pool builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle connections kept per host by HTTP/1.x clients
    pub max_idle_per_host: usize,

    /// User agent string
    pub user_agent: String,

    /// Interval between idle sweeps
    pub sweep_interval: Duration,

    /// Consecutive idle sweeps before a client is evicted
    pub idle_sweeps_before_evict: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        ConfigHttpConfig::default().into()
    }
}

impl From<ConfigHttpConfig> for PoolConfig {
    fn from(config: ConfigHttpConfig) -> Self {
        Self {
            max_idle_per_host: config.max_idle_per_host,
            user_agent: config.user_agent,
            sweep_interval: config.sweep_interval,
            idle_sweeps_before_evict: config.idle_sweeps_before_evict,
        }
    }
}
