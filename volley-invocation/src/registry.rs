//! Live-tracker indices

use crate::status::Status;
use crate::tracker::Tracker;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Trackers visible to lookups, by id and grouped by target name.
///
/// Each index has its own lock and neither is held while the other is taken.
#[derive(Default)]
pub struct TrackerRegistry {
    by_id: RwLock<HashMap<u64, Arc<Tracker>>>,
    by_target: RwLock<HashMap<String, HashMap<u64, Arc<Tracker>>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a tracker visible under both indices
    pub fn activate(&self, tracker: &Arc<Tracker>) {
        self.by_id.write().insert(tracker.id(), tracker.clone());
        self.by_target
            .write()
            .entry(tracker.target_name().to_string())
            .or_default()
            .insert(tracker.id(), tracker.clone());
        debug!("Activated tracker {} for target {}", tracker.id(), tracker.target_name());
    }

    /// Remove a tracker from its target group, dropping the group when empty
    pub fn leave_target_group(&self, tracker: &Tracker) {
        let mut by_target = self.by_target.write();
        if let Some(group) = by_target.get_mut(tracker.target_name()) {
            group.remove(&tracker.id());
            if group.is_empty() {
                by_target.remove(tracker.target_name());
            }
        }
    }

    /// Close the tracker and remove it from both indices
    pub fn deregister(&self, tracker: &Tracker) {
        tracker.close();
        self.by_id.write().remove(&tracker.id());
        self.leave_target_group(tracker);
        debug!("Deregistered tracker {}", tracker.id());
    }

    pub fn get(&self, id: u64) -> Option<Arc<Tracker>> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn trackers_for(&self, target: &str) -> Vec<Arc<Tracker>> {
        self.by_target
            .read()
            .get(target)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<Tracker>> {
        self.by_id.read().values().cloned().collect()
    }

    pub fn is_target_live(&self, target: &str) -> bool {
        self.by_target
            .read()
            .get(target)
            .is_some_and(|group| !group.is_empty())
    }

    pub fn is_any_target_active<S: AsRef<str>>(&self, targets: &[S]) -> bool {
        let by_target = self.by_target.read();
        targets
            .iter()
            .any(|name| by_target.get(name.as_ref()).is_some_and(|group| !group.is_empty()))
    }

    /// Status snapshot of every grouped tracker, by target then id
    pub fn active_invocations(&self) -> HashMap<String, HashMap<u64, Status>> {
        let trackers: Vec<(String, Vec<Arc<Tracker>>)> = self
            .by_target
            .read()
            .iter()
            .map(|(name, group)| (name.clone(), group.values().cloned().collect()))
            .collect();

        trackers
            .into_iter()
            .map(|(name, group)| {
                let statuses = group.iter().map(|t| (t.id(), t.status())).collect();
                (name, statuses)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.read().is_empty()
    }
}
