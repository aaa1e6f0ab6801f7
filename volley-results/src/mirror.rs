//! Best-effort mirroring of aggregates to a remote peer registry
//!
//! A single pump task is started on first use. Updates are coalesced per
//! key so the pump always posts the newest snapshot; completions are kept in
//! order and never coalesced away. Every remote call is fire-and-forget.

use crate::aggregate::AggregatedResults;
use crate::error::MirrorError;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use volley_config::MirrorConfig;

/// Updates waiting for the pump, newest snapshot per key
#[derive(Debug, Default)]
struct Pending {
    targets: HashMap<String, AggregatedResults>,
    invocations: BTreeMap<u64, AggregatedResults>,
    completions: Vec<u64>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.invocations.is_empty() && self.completions.is_empty()
    }
}

struct MirrorInner {
    config: MirrorConfig,
    client: reqwest::Client,
    pending: Mutex<Pending>,
    wake: Notify,
    started: OnceCell<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Mirror {
    inner: Arc<MirrorInner>,
}

impl Mirror {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(1)
            .timeout(config.request_timeout)
            .build()
            .map_err(MirrorError::ClientBuild)?;

        Ok(Self {
            inner: Arc::new(MirrorInner {
                config,
                client,
                pending: Mutex::new(Pending::default()),
                wake: Notify::new(),
                started: OnceCell::new(),
                pump: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.get().is_some()
    }

    /// `{registry}/registry/peers/{peer}/{address}/locker`
    fn locker_url(&self) -> String {
        let config = &self.inner.config;
        format!(
            "{}/registry/peers/{}/{}/locker",
            config.registry_url.trim_end_matches('/'),
            config.peer_name,
            config.address
        )
    }

    pub fn target_store_url(&self, target: &str) -> String {
        format!("{}/store/{},{}", self.locker_url(), self.inner.config.client_key, target)
    }

    pub fn invocation_store_url(&self, index: u64) -> String {
        format!("{}/store/{}_{}", self.locker_url(), self.inner.config.client_key, index)
    }

    pub fn lock_url(&self, index: u64) -> String {
        format!("{}/lock/{}_{}", self.locker_url(), self.inner.config.client_key, index)
    }

    /// Queue an update and wake the pump. Must be called from within a tokio
    /// runtime. Updates after shutdown are dropped.
    fn enqueue(&self, kind: &str, update: impl FnOnce(&mut Pending)) {
        if self.inner.shutdown.is_cancelled() {
            debug!("Mirror stopped, dropping {} update", kind);
            return;
        }
        self.inner.started.get_or_init(|| self.start_pump());
        update(&mut *self.inner.pending.lock());
        self.inner.wake.notify_one();
    }

    fn start_pump(&self) {
        let mirror = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let handle = tokio::spawn(async move {
            info!("Result mirroring to {} started", mirror.inner.config.registry_url);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = mirror.inner.wake.notified() => mirror.flush().await,
                }
            }
            // deliver whatever arrived before shutdown
            mirror.flush().await;
            debug!("Result mirroring stopped");
        });
        *self.inner.pump.lock() = Some(handle);
    }

    pub fn publish_target(&self, target: &str, snapshot: AggregatedResults) {
        self.enqueue("target", |pending| {
            pending.targets.insert(target.to_string(), snapshot);
        });
    }

    pub fn publish_invocation(&self, index: u64, snapshot: AggregatedResults) {
        self.enqueue("invocation", |pending| {
            pending.invocations.insert(index, snapshot);
        });
    }

    pub fn publish_completion(&self, index: u64) {
        self.enqueue("completion", |pending| pending.completions.push(index));
    }

    /// Post everything pending until nothing is left. Snapshots of a batch go
    /// out before its locks, so a lock always follows the invocation's final
    /// store.
    async fn flush(&self) {
        loop {
            let batch = std::mem::take(&mut *self.inner.pending.lock());
            if batch.is_empty() {
                return;
            }
            for (target, snapshot) in &batch.targets {
                self.post_json(&self.target_store_url(target), snapshot).await;
            }
            for (index, snapshot) in &batch.invocations {
                self.post_json(&self.invocation_store_url(*index), snapshot).await;
            }
            for index in &batch.completions {
                self.post_empty(&self.lock_url(*index)).await;
            }
        }
    }

    async fn post_json(&self, url: &str, snapshot: &AggregatedResults) {
        let outcome = match serde_json::to_vec(snapshot) {
            Ok(body) => self.post(url, Some(body)).await,
            Err(e) => Err(MirrorError::Serialization(e)),
        };
        if let Err(e) = outcome {
            debug!("{}", e);
        }
    }

    async fn post_empty(&self, url: &str) {
        if let Err(e) = self.post(url, None).await {
            debug!("{}", e);
        }
    }

    async fn post(&self, url: &str, body: Option<Vec<u8>>) -> Result<(), MirrorError> {
        let mut request = self.inner.client.post(url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        let response = request.send().await.map_err(|source| MirrorError::Request {
            url: url.to_string(),
            source,
        })?;
        let _ = response.bytes().await;
        Ok(())
    }

    /// Stop the pump after delivering pending updates. Delivery is bounded by
    /// the configured drain timeout; whatever is left after that is dropped.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.pump.lock().take();
        let Some(mut handle) = handle else {
            return;
        };
        let drain_timeout = self.inner.config.drain_timeout;
        if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
            warn!(
                "Mirror did not drain within {:?}, dropping pending updates",
                drain_timeout
            );
            handle.abort();
        }
    }
}
