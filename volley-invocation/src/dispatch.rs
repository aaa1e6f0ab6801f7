//! The dispatch loop: rounds of concurrent replica calls with cooperative stop

use crate::error::EngineError;
use crate::executor::CallExecutor;
use crate::registry::TrackerRegistry;
use crate::result::InvocationResult;
use crate::status::RunEvent;
use crate::tracker::Tracker;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Synthetic identifier of one call, `name[replica][round]`, both 1-based
pub fn call_id(target: &str, replica: u32, round: u32) -> String {
    format!("{}[{}][{}]", target, replica, round)
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<TrackerRegistry>,
    min_round_delay: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<TrackerRegistry>, min_round_delay: Duration) -> Self {
        Self {
            registry,
            min_round_delay,
        }
    }

    /// Drive a tracker until its rounds are exhausted or a stop is observed.
    ///
    /// With `collect` set every result produced by the run is returned.
    pub async fn run(&self, tracker: Arc<Tracker>, collect: bool) -> Result<Vec<InvocationResult>, EngineError> {
        let client = match tracker.client() {
            Some(client) if !tracker.status().closed => client,
            _ => return Err(EngineError::TrackerClosed(tracker.id())),
        };

        let spec = tracker.spec().clone();
        let executor = Arc::new(CallExecutor::new(
            spec.clone(),
            client,
            tracker.body().clone(),
            tracker.id(),
        ));
        let stop = tracker.stop_token();

        self.registry.activate(&tracker);
        tracker.apply(RunEvent::Start);
        info!(
            "Starting invocation {} for target {}: {} replicas x {} rounds",
            tracker.id(),
            spec.name,
            spec.replicas,
            spec.request_count
        );

        let initial_delay = spec.resolved.initial_delay;
        if !initial_delay.is_zero() {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(initial_delay) => {}
            }
        }

        let round_delay = spec.resolved.delay.max(self.min_round_delay);
        let mut collected = Vec::new();

        loop {
            if stop.is_cancelled() {
                let completed = tracker.status().completed_rounds;
                let remaining = u64::from(spec.request_count.saturating_sub(completed)) * u64::from(spec.replicas);
                if tracker.apply(RunEvent::StopObserved) {
                    warn!(
                        "Invocation {} for target {} stopped after {} rounds, {} calls not made",
                        tracker.id(),
                        spec.name,
                        completed,
                        remaining
                    );
                    self.registry.leave_target_group(&tracker);
                }
                break;
            }

            let round = tracker.status().completed_rounds + 1;
            let handles: Vec<_> = (1..=spec.replicas)
                .map(|replica| {
                    let executor = executor.clone();
                    let tracker = tracker.clone();
                    let id = call_id(&spec.name, replica, round);
                    tokio::spawn(async move {
                        let results = executor.execute(&id).await;
                        for result in &results {
                            tracker.publish(result.clone()).await;
                        }
                        if collect {
                            results
                        } else {
                            Vec::new()
                        }
                    })
                })
                .collect();

            for joined in join_all(handles).await {
                match joined {
                    Ok(results) => collected.extend(results),
                    Err(e) => warn!("Replica task for target {} failed: {}", spec.name, e),
                }
            }

            let completed = tracker.complete_round();
            debug!("Invocation {} finished round {}", tracker.id(), completed);
            if completed >= spec.request_count {
                tracker.apply(RunEvent::RoundsExhausted);
                break;
            }

            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(round_delay) => {}
            }
        }

        let outcome = tracker.status().state;
        tracker.finish();
        self.registry.deregister(&tracker);
        info!(
            "Invocation {} for target {} finished: {}",
            tracker.id(),
            spec.name,
            outcome
        );

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_format() {
        assert_eq!(call_id("svc", 2, 3), "svc[2][3]");
    }
}
