//! Invocation trackers: the runtime handle for one run of one target

use crate::result::InvocationResult;
use crate::status::{RunEvent, Status};
use crate::target::{BodyStream, TargetSpec};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A consumer of published results
pub type ResultSink = Arc<dyn Fn(&InvocationResult) + Send + Sync>;

/// Attaches a consumer to a freshly registered tracker.
///
/// Returning `None` means the factory consumes the tracker's result queue
/// itself (see [`Tracker::take_result_receiver`]) or is not interested.
pub trait SinkFactory: Send + Sync {
    fn attach(&self, tracker: &Arc<Tracker>) -> Option<ResultSink>;
}

impl<F> SinkFactory for F
where
    F: Fn(&Arc<Tracker>) -> Option<ResultSink> + Send + Sync,
{
    fn attach(&self, tracker: &Arc<Tracker>) -> Option<ResultSink> {
        self(tracker)
    }
}

/// Request body prepared at registration
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Forwarded once; later calls send no body
    Stream(BodyStream),
}

impl RequestBody {
    pub fn to_reqwest(&self) -> Option<reqwest::Body> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Bytes(bytes) => Some(reqwest::Body::from(bytes.clone())),
            RequestBody::Stream(stream) => stream
                .take()
                .map(|reader| reqwest::Body::wrap_stream(ReaderStream::new(reader))),
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len()),
            RequestBody::Stream(_) => None,
        }
    }
}

/// Queue sizing taken from engine configuration
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    pub backlog_warn_threshold: usize,
}

pub struct Tracker {
    id: u64,
    spec: Arc<TargetSpec>,
    body: RequestBody,
    status: RwLock<Status>,
    client: RwLock<Option<reqwest::Client>>,
    stop: CancellationToken,
    done: CancellationToken,
    queue: QueueSettings,
    results_tx: RwLock<Option<mpsc::Sender<InvocationResult>>>,
    results_rx: Mutex<Option<mpsc::Receiver<InvocationResult>>>,
    consumer_attached: AtomicBool,
    sinks: RwLock<Vec<ResultSink>>,
    started_at: DateTime<Utc>,
}

impl Tracker {
    pub fn new(
        id: u64,
        spec: Arc<TargetSpec>,
        body: RequestBody,
        client: reqwest::Client,
        queue: QueueSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue.capacity.max(1));
        let status = Status {
            client_bound: true,
            ..Default::default()
        };
        Self {
            id,
            spec,
            body,
            status: RwLock::new(status),
            client: RwLock::new(Some(client)),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            queue,
            results_tx: RwLock::new(Some(tx)),
            results_rx: Mutex::new(Some(rx)),
            consumer_attached: AtomicBool::new(false),
            sinks: RwLock::new(Vec::new()),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &Arc<TargetSpec> {
        &self.spec
    }

    pub fn target_name(&self) -> &str {
        &self.spec.name
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> Status {
        self.status.read().clone()
    }

    /// Feed an event to the run state machine
    pub fn apply(&self, event: RunEvent) -> bool {
        self.status.write().apply(event)
    }

    pub(crate) fn complete_round(&self) -> u32 {
        let mut status = self.status.write();
        status.completed_rounds += 1;
        status.completed_rounds
    }

    pub fn client(&self) -> Option<reqwest::Client> {
        self.client.read().clone()
    }

    /// Request a cooperative stop; a no-op once stopped, completed or closed
    pub fn request_stop(&self) -> bool {
        let changed = self.apply(RunEvent::RequestStop);
        if changed {
            self.stop.cancel();
        }
        changed
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Fires once the dispatch loop has exited
    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn add_sink(&self, sink: ResultSink) {
        self.sinks.write().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Take the receiving end of the result queue. Only the first caller gets it.
    pub fn take_result_receiver(&self) -> Option<mpsc::Receiver<InvocationResult>> {
        let receiver = self.results_rx.lock().take();
        if receiver.is_some() {
            self.consumer_attached.store(true, Ordering::SeqCst);
        }
        receiver
    }

    /// Results waiting in the queue
    pub fn backlog(&self) -> usize {
        match self.results_tx.read().as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    /// Hand a result to every sink in registration order, or queue it.
    ///
    /// With a consumer attached the send waits for capacity. Without one the
    /// result is queued only while there is room.
    pub async fn publish(&self, result: InvocationResult) {
        let sinks: Vec<ResultSink> = self.sinks.read().clone();
        if !sinks.is_empty() {
            for sink in &sinks {
                sink(&result);
            }
            return;
        }

        let Some(tx) = self.results_tx.read().clone() else {
            debug!("Tracker {} closed, dropping result {}", self.id, result.target_id);
            return;
        };

        if !self.consumer_attached.load(Ordering::SeqCst) {
            if tx.try_send(result).is_err() {
                debug!("Tracker {} has no result consumer and a full queue", self.id);
            }
            return;
        }

        let pending = tx.max_capacity() - tx.capacity();
        if pending >= self.queue.backlog_warn_threshold {
            warn!(
                "Tracker {} for target {} has {} results pending delivery",
                self.id, self.spec.name, pending
            );
        }
        if tx.send(result).await.is_err() {
            debug!("Result consumer for tracker {} went away", self.id);
        }
    }

    /// Signal that the dispatch loop has exited
    pub(crate) fn finish(&self) {
        self.done.cancel();
    }

    /// Tear the tracker down. Idempotent.
    pub fn close(&self) -> bool {
        if !self.apply(RunEvent::Close) {
            return false;
        }
        self.stop.cancel();
        self.done.cancel();
        self.results_tx.write().take();
        self.client.write().take();
        true
    }
}

/// A tracker dropped without ever running still releases whoever waits on
/// its done token.
impl Drop for Tracker {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("target", &self.spec.name)
            .field("status", &*self.status.read())
            .field("sinks", &self.sink_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RunState;
    use std::sync::atomic::AtomicUsize;

    fn tracker(capacity: usize) -> Tracker {
        Tracker::new(
            7,
            Arc::new(TargetSpec::new("t", "GET", "http://localhost/")),
            RequestBody::Empty,
            reqwest::Client::new(),
            QueueSettings {
                capacity,
                backlog_warn_threshold: 1,
            },
        )
    }

    fn result(id: &str) -> InvocationResult {
        InvocationResult {
            target_name: "t".to_string(),
            target_id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sinks_receive_results_in_order() {
        let tracker = tracker(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let seen = seen.clone();
            tracker.add_sink(Arc::new(move |r: &InvocationResult| {
                seen.lock().push(format!("{}:{}", label, r.target_id));
            }));
        }

        tracker.publish(result("a")).await;

        assert_eq!(*seen.lock(), vec!["first:a", "second:a"]);
        assert_eq!(tracker.backlog(), 0);
    }

    #[tokio::test]
    async fn test_queue_used_without_sinks() {
        let tracker = tracker(4);
        let mut rx = tracker.take_result_receiver().unwrap();
        assert!(tracker.take_result_receiver().is_none());

        tracker.publish(result("a")).await;
        tracker.publish(result("b")).await;
        assert_eq!(tracker.backlog(), 2);

        assert_eq!(rx.recv().await.unwrap().target_id, "a");
        assert_eq!(rx.recv().await.unwrap().target_id, "b");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_backlog_warning_at_threshold() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let tracker = Tracker::new(
            7,
            Arc::new(TargetSpec::new("t", "GET", "http://localhost/")),
            RequestBody::Empty,
            reqwest::Client::new(),
            QueueSettings {
                capacity: 4,
                backlog_warn_threshold: 2,
            },
        );
        let mut rx = tracker.take_result_receiver().unwrap();

        // pending is 0, 1 and then 2 when these are published
        for id in ["a", "b", "c"] {
            tracker.publish(result(id)).await;
        }

        let output = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        assert_eq!(output.matches("results pending delivery").count(), 1, "{}", output);
        assert!(output.contains("has 2 results pending delivery"));

        for id in ["a", "b", "c"] {
            assert_eq!(rx.recv().await.unwrap().target_id, id);
        }
        assert_eq!(tracker.backlog(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_consumer_never_blocks() {
        let tracker = tracker(1);
        tracker.publish(result("a")).await;
        tracker.publish(result("b")).await;
        assert_eq!(tracker.backlog(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let tracker = tracker(2);
        let mut rx = tracker.take_result_receiver().unwrap();

        assert!(tracker.close());
        assert!(!tracker.close());

        let status = tracker.status();
        assert_eq!(status.state, RunState::Closed);
        assert!(status.closed);
        assert!(!status.client_bound);
        assert!(tracker.client().is_none());
        assert!(tracker.is_done());
        assert!(rx.recv().await.is_none());

        tracker.publish(result("late")).await;
    }

    #[test]
    fn test_drop_fires_done_token() {
        let tracker = tracker(1);
        let done = tracker.done_token();
        assert!(!done.is_cancelled());
        drop(tracker);
        assert!(done.is_cancelled());
    }

    #[test]
    fn test_request_stop_once() {
        let tracker = tracker(2);
        tracker.apply(RunEvent::Start);
        assert!(tracker.request_stop());
        assert!(!tracker.request_stop());
        assert!(tracker.is_stop_requested());
    }

    #[test]
    fn test_closure_is_a_sink_factory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = move |_: &Arc<Tracker>| -> Option<ResultSink> {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        };
        let tracker = Arc::new(tracker(1));
        assert!(factory.attach(&tracker).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bytes_body_is_reusable() {
        let body = RequestBody::Bytes(Bytes::from_static(b"hello"));
        assert!(body.to_reqwest().is_some());
        assert!(body.to_reqwest().is_some());
        assert_eq!(body.len(), Some(5));

        let stream = RequestBody::Stream(BodyStream::new(&b"once"[..]));
        assert!(stream.to_reqwest().is_some());
        assert!(stream.to_reqwest().is_none());
    }
}
