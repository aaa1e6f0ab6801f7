//! The engine facade: registration, dispatch and stop control
//!
//! All state lives in an [`Engine`] value. Engines share nothing, so several
//! can run side by side in one process.

use crate::dispatch::Dispatcher;
use crate::error::{EngineError, ValidationError};
use crate::registry::TrackerRegistry;
use crate::result::InvocationResult;
use crate::status::Status;
use crate::target::{self, TargetSpec};
use crate::tracker::{QueueSettings, RequestBody, SinkFactory, Tracker};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use volley_config::{InvocationConfig, VolleyConfig};
use volley_http::{ClientPool, PoolConfig, TrustedRoots};

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: InvocationConfig,
    pool: Arc<ClientPool>,
    registry: Arc<TrackerRegistry>,
    dispatcher: Dispatcher,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: InvocationConfig, pool: ClientPool) -> Self {
        let registry = Arc::new(TrackerRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone(), config.min_round_delay);
        Self {
            inner: Arc::new(EngineInner {
                config,
                pool: Arc::new(pool),
                registry,
                dispatcher,
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build an engine from full configuration, loading trusted roots once
    pub fn from_config(config: &VolleyConfig) -> Result<Self, EngineError> {
        let roots = TrustedRoots::load(config.http.cert_dir.as_deref())?;
        if !roots.is_empty() {
            info!("Loaded {} trusted root certificates", roots.len());
        }
        let pool = ClientPool::new(PoolConfig::from(config.http.clone()), roots);
        Ok(Self::new(config.invocation.clone(), pool))
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.inner.pool
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.inner.registry
    }

    pub fn validate(&self, spec: &TargetSpec) -> Result<TargetSpec, ValidationError> {
        target::validate(spec)
    }

    /// Create a tracker for one run of `spec` and attach the given sinks.
    /// The spec is validated again even if it was validated before.
    pub async fn register(
        &self,
        spec: TargetSpec,
        factories: &[Arc<dyn SinkFactory>],
    ) -> Result<Arc<Tracker>, EngineError> {
        let mut spec = target::validate(&spec)?;

        let client = self.inner.pool.get_or_create(&spec.name, &spec.client_options())?;
        let body = prepare_body(&mut spec).await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = QueueSettings {
            capacity: self.inner.config.result_queue_capacity,
            backlog_warn_threshold: self.inner.config.backlog_warn_threshold,
        };
        let tracker = Arc::new(Tracker::new(id, Arc::new(spec), body, client, queue));

        for factory in factories {
            if let Some(sink) = factory.attach(&tracker) {
                tracker.add_sink(sink);
            }
        }

        debug!(
            "Registered tracker {} for target {} with {} sinks",
            id,
            tracker.target_name(),
            tracker.sink_count()
        );
        Ok(tracker)
    }

    /// Run a tracker to completion or stop. With `wait_for_response` the
    /// results of every call are returned.
    pub async fn start(
        &self,
        tracker: &Arc<Tracker>,
        wait_for_response: bool,
    ) -> Result<Vec<InvocationResult>, EngineError> {
        self.inner.dispatcher.run(tracker.clone(), wait_for_response).await
    }

    /// Run a tracker in the background
    pub fn spawn(&self, tracker: Arc<Tracker>) -> JoinHandle<Result<Vec<InvocationResult>, EngineError>> {
        let dispatcher = self.inner.dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(tracker, false).await })
    }

    /// Request a stop of every live tracker of a target; returns how many were signalled
    pub fn stop(&self, target: &str) -> usize {
        let signalled = self
            .inner
            .registry
            .trackers_for(target)
            .iter()
            .filter(|tracker| tracker.request_stop())
            .count();
        if signalled > 0 {
            info!("Stop requested for {} invocations of target {}", signalled, target);
        }
        signalled
    }

    pub fn stop_all(&self) -> usize {
        self.inner
            .registry
            .all()
            .iter()
            .filter(|tracker| tracker.request_stop())
            .count()
    }

    pub fn is_any_target_active<S: AsRef<str>>(&self, targets: &[S]) -> bool {
        self.inner.registry.is_any_target_active(targets)
    }

    pub fn active_invocations(&self) -> HashMap<String, HashMap<u64, Status>> {
        self.inner.registry.active_invocations()
    }

    /// Evict the target's pooled client immediately
    pub fn remove_target(&self, target: &str) -> bool {
        self.inner.pool.remove(target)
    }

    /// Start the idle-client sweeper; it stops on [`Engine::shutdown`]
    pub fn start_client_sweeper(&self) -> JoinHandle<()> {
        let registry = self.inner.registry.clone();
        self.inner.pool.clone().start_sweeper(
            move |target| registry.is_target_live(target),
            self.inner.shutdown.child_token(),
        )
    }

    /// Stop every tracker and background task owned by this engine
    pub fn shutdown(&self) {
        let stopped = self.stop_all();
        self.inner.shutdown.cancel();
        info!("Engine shut down, {} invocations asked to stop", stopped);
    }
}

/// Decide how the body is sent. A streamed body that will be replayed is
/// buffered here, once.
async fn prepare_body(spec: &mut TargetSpec) -> Result<RequestBody, EngineError> {
    if let Some(payload) = &spec.resolved.payload {
        return Ok(RequestBody::Bytes(payload.clone()));
    }

    if let Some(stream) = spec.body_stream.take() {
        if !spec.replays_body() {
            return Ok(RequestBody::Stream(stream));
        }
        let Some(mut reader) = stream.take() else {
            return Ok(RequestBody::Empty);
        };
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .map_err(|source| EngineError::BodyBuffer {
                target: spec.name.clone(),
                source,
            })?;
        debug!("Buffered {} byte streamed body for target {}", buffer.len(), spec.name);
        return Ok(RequestBody::Bytes(Bytes::from(buffer)));
    }

    if spec.body.is_empty() {
        Ok(RequestBody::Empty)
    } else {
        Ok(RequestBody::Bytes(Bytes::from(spec.body.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::BodyStream;

    fn engine() -> Engine {
        let pool = ClientPool::new(PoolConfig::default(), TrustedRoots::empty());
        Engine::new(InvocationConfig::default(), pool)
    }

    #[tokio::test]
    async fn test_register_allocates_increasing_ids() {
        let engine = engine();
        let spec = TargetSpec::new("t", "GET", "http://localhost:1/");
        let first = engine.register(spec.clone(), &[]).await.unwrap();
        let second = engine.register(spec, &[]).await.unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert!(first.spec().is_validated());
        assert!(first.status().client_bound);
        assert!(engine.pool().contains("t"));
        // not visible until started
        assert!(!engine.is_any_target_active(&["t"]));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_spec() {
        let engine = engine();
        let spec = TargetSpec::new("t", "GET", "");
        let err = engine.register(spec, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::MissingUrl(_))));
        assert!(engine.pool().is_empty());
    }

    #[tokio::test]
    async fn test_register_revalidates_modified_spec() {
        let engine = engine();
        let mut spec = engine
            .validate(&TargetSpec::new("t", "GET", "http://localhost:1/"))
            .unwrap();
        spec.burls = vec!["http://localhost:2/".to_string()];
        spec.fallback = true;
        spec.ab_mode = true;

        let err = engine.register(spec, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ConflictingModes(_))
        ));
        assert!(engine.pool().is_empty());
    }

    #[tokio::test]
    async fn test_register_restores_replica_floor() {
        let engine = engine();
        let mut spec = engine
            .validate(&TargetSpec::new("t", "GET", "http://localhost:1/"))
            .unwrap();
        spec.replicas = 0;
        spec.request_count = 0;

        let tracker = engine.register(spec, &[]).await.unwrap();
        assert_eq!(tracker.spec().replicas, 1);
        assert_eq!(tracker.spec().request_count, 1);
    }

    #[tokio::test]
    async fn test_replayed_stream_is_buffered() {
        let mut spec = TargetSpec::new("t", "POST", "http://localhost/");
        spec.request_count = 3;
        spec.body_stream = Some(BodyStream::new(&b"streamed"[..]));
        let mut spec = target::validate(&spec).unwrap();

        let body = prepare_body(&mut spec).await.unwrap();
        assert!(matches!(&body, RequestBody::Bytes(b) if b.as_ref() == b"streamed"));
        assert!(spec.body_stream.is_none());
    }

    #[tokio::test]
    async fn test_single_use_stream_is_forwarded() {
        let mut spec = TargetSpec::new("t", "POST", "http://localhost/");
        spec.body_stream = Some(BodyStream::new(&b"once"[..]));
        let mut spec = target::validate(&spec).unwrap();

        let body = prepare_body(&mut spec).await.unwrap();
        assert!(matches!(body, RequestBody::Stream(_)));
    }

    #[tokio::test]
    async fn test_auto_payload_replaces_body() {
        let mut spec = TargetSpec::new("t", "POST", "http://localhost/");
        spec.body = "literal".to_string();
        spec.auto_payload = "16".to_string();
        let mut spec = target::validate(&spec).unwrap();

        let body = prepare_body(&mut spec).await.unwrap();
        assert_eq!(body.len(), Some(16));
    }
}
