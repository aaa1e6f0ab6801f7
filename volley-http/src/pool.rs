//! Per-target HTTP client pool
//!
//! One `reqwest::Client` per target name, built on first use and shared by
//! every concurrent call against that target. A background sweep evicts
//! clients whose target has had no live tracker for several consecutive
//! sweeps.

use crate::config::PoolConfig;
use crate::errors::HttpError;
use crate::tls::TrustedRoots;
use crate::types::ProtocolVersion;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Transport parameters a target contributes to its client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub protocol: ProtocolVersion,
    pub https: bool,
    pub verify_tls: bool,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::Http11,
            https: false,
            verify_tls: false,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct PooledClient {
    client: Client,
    options: ClientOptions,
    idle_sweeps: u32,
}

/// Clients indexed by target name
pub struct ClientPool {
    config: PoolConfig,
    roots: TrustedRoots,
    clients: RwLock<HashMap<String, PooledClient>>,
}

impl ClientPool {
    pub fn new(config: PoolConfig, roots: TrustedRoots) -> Self {
        Self {
            config,
            roots,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Return the target's client, building it on first use.
    ///
    /// A target re-registered with different transport options gets a fresh
    /// client; the old one closes once its last holder drops it.
    pub fn get_or_create(&self, target: &str, options: &ClientOptions) -> Result<Client, HttpError> {
        {
            let clients = self.clients.read();
            if let Some(entry) = clients.get(target) {
                if entry.options == *options {
                    return Ok(entry.client.clone());
                }
            }
        }

        let mut clients = self.clients.write();
        if let Some(entry) = clients.get(target) {
            if entry.options == *options {
                return Ok(entry.client.clone());
            }
            debug!("Transport options changed for target {}, rebuilding client", target);
        }

        let client = self.build_client(target, options)?;
        clients.insert(
            target.to_string(),
            PooledClient {
                client: client.clone(),
                options: options.clone(),
                idle_sweeps: 0,
            },
        );
        info!(
            "Created {} client for target {} (tls: {})",
            options.protocol, target, options.https
        );
        Ok(client)
    }

    fn build_client(&self, target: &str, options: &ClientOptions) -> Result<Client, HttpError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .user_agent(&self.config.user_agent)
            .connect_timeout(options.connect_timeout)
            .pool_idle_timeout(options.idle_timeout)
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(!options.verify_tls);

        for certificate in self.roots.certificates() {
            builder = builder.add_root_certificate(certificate.clone());
        }

        builder = match options.protocol {
            ProtocolVersion::Http10 | ProtocolVersion::Http11 => builder
                .http1_only()
                .pool_max_idle_per_host(self.config.max_idle_per_host),
            // Prior knowledge covers both h2 over TLS and cleartext h2c
            ProtocolVersion::Http2 => builder.http2_prior_knowledge(),
            ProtocolVersion::Auto => builder.pool_max_idle_per_host(self.config.max_idle_per_host),
        };

        builder.build().map_err(|source| HttpError::ClientBuild {
            target: target.to_string(),
            source,
        })
    }

    /// Evict a target's client immediately, regardless of its idle count
    pub fn remove(&self, target: &str) -> bool {
        let removed = self.clients.write().remove(target).is_some();
        if removed {
            info!("Closed client for target {}", target);
        }
        removed
    }

    /// Run one idle sweep and return the evicted targets.
    ///
    /// `is_live` is evaluated without holding the pool lock.
    pub fn sweep<F>(&self, is_live: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let names: Vec<String> = self.clients.read().keys().cloned().collect();
        let liveness: Vec<(String, bool)> = names
            .into_iter()
            .map(|name| {
                let live = is_live(&name);
                (name, live)
            })
            .collect();

        let threshold = self.config.idle_sweeps_before_evict;
        let mut evicted = Vec::new();
        let mut clients = self.clients.write();
        for (name, live) in liveness {
            let Some(entry) = clients.get_mut(&name) else {
                continue;
            };
            if live {
                entry.idle_sweeps = 0;
                continue;
            }
            entry.idle_sweeps += 1;
            debug!("Target {} idle for {} sweeps", name, entry.idle_sweeps);
            if entry.idle_sweeps >= threshold {
                clients.remove(&name);
                evicted.push(name);
            }
        }
        drop(clients);

        for name in &evicted {
            info!("Evicted idle client for target {}", name);
        }
        evicted
    }

    /// Start the background sweeper; it runs until `shutdown` is cancelled
    pub fn start_sweeper<F>(self: Arc<Self>, is_live: F, shutdown: CancellationToken) -> JoinHandle<()>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Client pool sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sweep(&is_live);
                    }
                }
            }
        })
    }

    pub fn contains(&self, target: &str) -> bool {
        self.clients.read().contains_key(target)
    }

    pub fn idle_sweeps(&self, target: &str) -> Option<u32> {
        self.clients.read().get(target).map(|entry| entry.idle_sweeps)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pool() -> ClientPool {
        ClientPool::new(PoolConfig::default(), TrustedRoots::empty())
    }

    #[test]
    fn test_client_is_cached_per_target() {
        let pool = pool();
        let options = ClientOptions::default();

        pool.get_or_create("a", &options).unwrap();
        pool.get_or_create("a", &options).unwrap();
        pool.get_or_create("b", &options).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.contains("a"));
    }

    #[test]
    fn test_changed_options_rebuild_client() {
        let pool = pool();
        pool.get_or_create("a", &ClientOptions::default()).unwrap();
        pool.sweep(|_| false);
        assert_eq!(pool.idle_sweeps("a"), Some(1));

        let h2 = ClientOptions {
            protocol: ProtocolVersion::Http2,
            ..Default::default()
        };
        pool.get_or_create("a", &h2).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.idle_sweeps("a"), Some(0));
    }

    #[test]
    fn test_evicted_after_three_idle_sweeps() {
        let pool = pool();
        pool.get_or_create("idle", &ClientOptions::default()).unwrap();

        assert!(pool.sweep(|_| false).is_empty());
        assert!(pool.sweep(|_| false).is_empty());
        assert_eq!(pool.sweep(|_| false), vec!["idle".to_string()]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_live_sweep_resets_idle_count() {
        let pool = pool();
        pool.get_or_create("busy", &ClientOptions::default()).unwrap();

        pool.sweep(|_| false);
        pool.sweep(|_| false);
        assert_eq!(pool.idle_sweeps("busy"), Some(2));

        pool.sweep(|name| name == "busy");
        assert_eq!(pool.idle_sweeps("busy"), Some(0));

        pool.sweep(|_| false);
        pool.sweep(|_| false);
        assert!(pool.contains("busy"));
    }

    #[test]
    fn test_remove_evicts_immediately() {
        let pool = pool();
        pool.get_or_create("gone", &ClientOptions::default()).unwrap();
        assert!(pool.remove("gone"));
        assert!(!pool.remove("gone"));
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_evicts_and_stops() {
        let config = PoolConfig {
            sweep_interval: Duration::from_secs(120),
            ..Default::default()
        };
        let pool = Arc::new(ClientPool::new(config, TrustedRoots::empty()));
        pool.get_or_create("idle", &ClientOptions::default()).unwrap();

        let live = Arc::new(AtomicBool::new(false));
        let live_check = live.clone();
        let shutdown = CancellationToken::new();
        let handle = pool
            .clone()
            .start_sweeper(move |_| live_check.load(Ordering::SeqCst), shutdown.clone());

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(121)).await;
        }
        assert!(pool.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
