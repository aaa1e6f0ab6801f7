//! Result collection at target, all-targets and invocation level

use crate::aggregate::{AggregatedResults, SharedAggregate};
use crate::error::MirrorError;
use crate::mirror::Mirror;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use volley_config::{ResultsConfig, VolleyConfig};
use volley_invocation::{InvocationResult, ResultSink, SinkFactory, Tracker};

/// Aggregate for one tracker run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationResults {
    pub target: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished: bool,
    pub results: AggregatedResults,
}

/// Snapshot of every target aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetsResults {
    pub targets: BTreeMap<String, AggregatedResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_targets: Option<AggregatedResults>,
}

#[derive(Clone)]
pub struct ResultsCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    config: ResultsConfig,
    tracked_headers: Vec<String>,
    targets: RwLock<HashMap<String, Arc<SharedAggregate>>>,
    all_targets: SharedAggregate,
    invocations: RwLock<HashMap<u64, Arc<RwLock<InvocationResults>>>>,
    mirror: Option<Mirror>,
}

impl ResultsCollector {
    pub fn new(config: ResultsConfig, mirror: Option<Mirror>) -> Self {
        let tracked_headers = config
            .tracked_headers
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        Self {
            inner: Arc::new(CollectorInner {
                config,
                tracked_headers,
                targets: RwLock::new(HashMap::new()),
                all_targets: SharedAggregate::new(),
                invocations: RwLock::new(HashMap::new()),
                mirror,
            }),
        }
    }

    /// Build from full configuration, with mirroring when it is configured
    pub fn from_config(config: &VolleyConfig) -> Result<Self, MirrorError> {
        let mirror = config.mirror.clone().map(Mirror::new).transpose()?;
        Ok(Self::new(config.results.clone(), mirror))
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.inner.mirror.as_ref()
    }

    /// A factory whose sink records each result as it is published
    pub fn direct_sink_factory(&self) -> Arc<dyn SinkFactory> {
        let collector = self.clone();
        Arc::new(move |tracker: &Arc<Tracker>| -> Option<ResultSink> {
            collector.begin_invocation(tracker);

            let watcher = collector.clone();
            let done = tracker.done_token();
            let index = tracker.id();
            tokio::spawn(async move {
                done.cancelled().await;
                watcher.finish_invocation(index);
            });

            let recorder = collector.clone();
            Some(Arc::new(move |result: &InvocationResult| recorder.record(result)))
        })
    }

    /// A factory that consumes the tracker's result queue from its own task.
    ///
    /// It attaches no sink, so it only receives results when no other factory
    /// for the same tracker does.
    pub fn channel_sink_factory(&self) -> Arc<dyn SinkFactory> {
        let collector = self.clone();
        Arc::new(move |tracker: &Arc<Tracker>| -> Option<ResultSink> {
            let Some(receiver) = tracker.take_result_receiver() else {
                warn!("Result queue of tracker {} already has a consumer", tracker.id());
                return None;
            };
            collector.begin_invocation(tracker);
            tokio::spawn(consume(collector.clone(), tracker.id(), receiver, tracker.done_token()));
            None
        })
    }

    pub fn begin_invocation(&self, tracker: &Tracker) {
        if !self.inner.config.collect_invocation_results {
            return;
        }
        let entry = InvocationResults {
            target: tracker.target_name().to_string(),
            started_at: Some(tracker.started_at()),
            ..Default::default()
        };
        self.inner
            .invocations
            .write()
            .insert(tracker.id(), Arc::new(RwLock::new(entry)));
    }

    /// Count one result at every enabled level
    pub fn record(&self, result: &InvocationResult) {
        let config = &self.inner.config;
        let tracked = &self.inner.tracked_headers;

        if config.collect_target_results {
            let snapshot = self.target_aggregate(&result.target_name).record(result, tracked);
            if let Some(mirror) = &self.inner.mirror {
                mirror.publish_target(&result.target_name, snapshot);
            }
        }

        if config.collect_all_targets {
            self.inner.all_targets.record(result, tracked);
        }

        if config.collect_invocation_results {
            let entry = self.inner.invocations.read().get(&result.invocation_index).cloned();
            if let Some(entry) = entry {
                let snapshot = {
                    let mut entry = entry.write();
                    entry.results.record(result, tracked);
                    entry.results.clone()
                };
                if let Some(mirror) = &self.inner.mirror {
                    mirror.publish_invocation(result.invocation_index, snapshot);
                }
            }
        }
    }

    /// Mark an invocation finished and lock its mirrored copy
    pub fn finish_invocation(&self, index: u64) {
        if let Some(entry) = self.inner.invocations.read().get(&index) {
            entry.write().finished = true;
        }
        debug!("Results for invocation {} complete", index);
        if let Some(mirror) = &self.inner.mirror {
            mirror.publish_completion(index);
        }
    }

    fn target_aggregate(&self, target: &str) -> Arc<SharedAggregate> {
        if let Some(aggregate) = self.inner.targets.read().get(target) {
            return aggregate.clone();
        }
        self.inner
            .targets
            .write()
            .entry(target.to_string())
            .or_default()
            .clone()
    }

    pub fn target_results(&self, target: &str) -> Option<AggregatedResults> {
        self.inner.targets.read().get(target).map(|a| a.snapshot())
    }

    pub fn targets_results(&self) -> TargetsResults {
        let targets = self
            .inner
            .targets
            .read()
            .iter()
            .map(|(name, aggregate)| (name.clone(), aggregate.snapshot()))
            .collect();
        let all_targets = self
            .inner
            .config
            .collect_all_targets
            .then(|| self.inner.all_targets.snapshot());
        TargetsResults { targets, all_targets }
    }

    pub fn invocation_results(&self) -> BTreeMap<u64, InvocationResults> {
        self.inner
            .invocations
            .read()
            .iter()
            .map(|(index, entry)| (*index, entry.read().clone()))
            .collect()
    }

    pub fn targets_results_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.targets_results())
    }

    pub fn invocation_results_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.invocation_results())
    }

    pub fn clear(&self) {
        self.inner.targets.write().clear();
        self.inner.invocations.write().clear();
        self.inner.all_targets.clear();
    }

    /// Merge target aggregates pulled from a peer, in the shape produced by
    /// [`ResultsCollector::targets_results_json`]. Returns the number of targets merged.
    pub fn merge_remote_targets(&self, json: &str) -> Result<usize, serde_json::Error> {
        let remote: TargetsResults = serde_json::from_str(json)?;
        for (target, results) in &remote.targets {
            self.target_aggregate(target).merge(results);
        }
        if let Some(all) = &remote.all_targets {
            self.inner.all_targets.merge(all);
        }
        Ok(remote.targets.len())
    }
}

/// Drain a tracker's queue until it completes, then catch anything that
/// raced the completion signal
async fn consume(
    collector: ResultsCollector,
    index: u64,
    mut receiver: mpsc::Receiver<InvocationResult>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(result) => collector.record(&result),
                None => break,
            },
            _ = done.cancelled() => {
                while let Ok(result) = receiver.try_recv() {
                    collector.record(&result);
                }
                break;
            }
        }
    }
    collector.finish_invocation(index);
}
