//! Aggregation counters

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use volley_invocation::InvocationResult;

/// Counters over a stream of results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatedResults {
    pub invocation_count: u64,
    pub first_response: Option<DateTime<Utc>>,
    pub last_response: Option<DateTime<Utc>>,
    pub retries_count: u64,
    pub counts_by_status: BTreeMap<String, u64>,
    pub counts_by_status_codes: BTreeMap<u16, u64>,
    pub counts_by_headers: BTreeMap<String, u64>,
    pub counts_by_header_values: BTreeMap<String, BTreeMap<String, u64>>,
    #[serde(rename = "countsByURIs")]
    pub counts_by_uris: BTreeMap<String, u64>,
}

impl AggregatedResults {
    /// Count one result. `tracked_headers` must be lowercase.
    pub fn record(&mut self, result: &InvocationResult, tracked_headers: &[String]) {
        let at = result.finished_at.unwrap_or_else(Utc::now);
        self.invocation_count += 1;
        self.first_response = Some(self.first_response.map_or(at, |first| first.min(at)));
        self.last_response = Some(self.last_response.map_or(at, |last| last.max(at)));
        self.retries_count += u64::from(result.retries);

        *self.counts_by_status.entry(result.status.clone()).or_default() += 1;
        *self.counts_by_status_codes.entry(result.status_code).or_default() += 1;
        if !result.uri.is_empty() {
            *self.counts_by_uris.entry(result.uri.clone()).or_default() += 1;
        }

        for header in tracked_headers {
            let Some(values) = result.headers.get(header) else {
                continue;
            };
            *self.counts_by_headers.entry(header.clone()).or_default() += 1;
            let by_value = self.counts_by_header_values.entry(header.clone()).or_default();
            for value in values {
                *by_value.entry(value.clone()).or_default() += 1;
            }
        }
    }

    /// Add another aggregate's counters into this one
    pub fn merge(&mut self, other: &AggregatedResults) {
        self.invocation_count += other.invocation_count;
        self.retries_count += other.retries_count;
        self.first_response = earliest(self.first_response, other.first_response);
        self.last_response = latest(self.last_response, other.last_response);

        add_counts(&mut self.counts_by_status, &other.counts_by_status);
        add_counts(&mut self.counts_by_status_codes, &other.counts_by_status_codes);
        add_counts(&mut self.counts_by_headers, &other.counts_by_headers);
        add_counts(&mut self.counts_by_uris, &other.counts_by_uris);
        for (header, values) in &other.counts_by_header_values {
            add_counts(
                self.counts_by_header_values.entry(header.clone()).or_default(),
                values,
            );
        }
    }

    pub fn merged(a: &AggregatedResults, b: &AggregatedResults) -> AggregatedResults {
        let mut merged = a.clone();
        merged.merge(b);
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.invocation_count == 0
    }
}

fn add_counts<K: Ord + Clone>(into: &mut BTreeMap<K, u64>, from: &BTreeMap<K, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_default() += count;
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// An aggregate behind its own lock
#[derive(Debug, Default)]
pub struct SharedAggregate {
    counts: RwLock<AggregatedResults>,
}

impl SharedAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result and return the updated snapshot
    pub fn record(&self, result: &InvocationResult, tracked_headers: &[String]) -> AggregatedResults {
        let mut counts = self.counts.write();
        counts.record(result, tracked_headers);
        counts.clone()
    }

    pub fn merge(&self, other: &AggregatedResults) {
        self.counts.write().merge(other);
    }

    pub fn snapshot(&self) -> AggregatedResults {
        self.counts.read().clone()
    }

    pub fn clear(&self) {
        *self.counts.write() = AggregatedResults::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(status_code: u16, uri: &str, at_secs: i64) -> InvocationResult {
        let mut result = InvocationResult {
            target_name: "t".to_string(),
            status: format!("{} status", status_code),
            status_code,
            uri: uri.to_string(),
            retries: 1,
            finished_at: Some(Utc.timestamp_opt(at_secs, 0).unwrap()),
            ..Default::default()
        };
        result
            .headers
            .insert("x-region".to_string(), vec![format!("r{}", at_secs % 2)]);
        result
    }

    fn aggregate(results: &[InvocationResult]) -> AggregatedResults {
        let tracked = vec!["x-region".to_string()];
        let mut aggregate = AggregatedResults::default();
        for r in results {
            aggregate.record(r, &tracked);
        }
        aggregate
    }

    #[test]
    fn test_record_counts_everything() {
        let agg = aggregate(&[result(200, "/a", 10), result(200, "/b", 11), result(503, "/a", 12)]);

        assert_eq!(agg.invocation_count, 3);
        assert_eq!(agg.retries_count, 3);
        assert_eq!(agg.counts_by_status_codes[&200], 2);
        assert_eq!(agg.counts_by_status_codes[&503], 1);
        assert_eq!(agg.counts_by_status["200 status"], 2);
        assert_eq!(agg.counts_by_uris["/a"], 2);
        assert_eq!(agg.counts_by_headers["x-region"], 3);
        assert_eq!(agg.counts_by_header_values["x-region"]["r0"], 2);
        assert_eq!(agg.counts_by_header_values["x-region"]["r1"], 1);
        assert_eq!(agg.first_response.unwrap().timestamp(), 10);
        assert_eq!(agg.last_response.unwrap().timestamp(), 12);
    }

    #[test]
    fn test_untracked_headers_ignored() {
        let mut agg = AggregatedResults::default();
        agg.record(&result(200, "/a", 1), &[]);
        assert!(agg.counts_by_headers.is_empty());
        assert!(agg.counts_by_header_values.is_empty());
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = aggregate(&[result(200, "/a", 20), result(500, "/x", 25)]);
        let b = aggregate(&[result(200, "/b", 5), result(200, "/a", 30), result(404, "/a", 7)]);

        let ab = AggregatedResults::merged(&a, &b);
        let ba = AggregatedResults::merged(&b, &a);
        assert_eq!(ab, ba);

        assert_eq!(ab.invocation_count, 5);
        assert_eq!(ab.counts_by_uris["/a"], 3);
        assert_eq!(ab.first_response.unwrap().timestamp(), 5);
        assert_eq!(ab.last_response.unwrap().timestamp(), 30);
    }

    #[test]
    fn test_merge_equals_recording_everything() {
        let left = [result(200, "/a", 1), result(503, "/b", 2)];
        let right = [result(200, "/a", 3)];
        let all: Vec<InvocationResult> = left.iter().chain(right.iter()).cloned().collect();

        let merged = AggregatedResults::merged(&aggregate(&left), &aggregate(&right));
        assert_eq!(merged, aggregate(&all));
    }

    #[test]
    fn test_merge_with_empty() {
        let a = aggregate(&[result(200, "/a", 1)]);
        assert_eq!(AggregatedResults::merged(&a, &AggregatedResults::default()), a);
    }

    #[test]
    fn test_json_shape() {
        let agg = aggregate(&[result(200, "/a", 1)]);
        let json = serde_json::to_value(&agg).unwrap();
        assert_eq!(json["invocationCount"], 1);
        assert_eq!(json["countsByStatusCodes"]["200"], 1);
        assert_eq!(json["countsByURIs"]["/a"], 1);

        let back: AggregatedResults = serde_json::from_value(json).unwrap();
        assert_eq!(back, agg);
    }
}
