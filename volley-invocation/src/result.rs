//! The outcome of one HTTP call

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One outcome of one HTTP call. Immutable once published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub target_name: String,
    /// Call identifier, `name[replica][round]`
    pub target_id: String,
    /// Status line text, or the transport error text when no response arrived
    pub status: String,
    /// Zero when no response arrived
    pub status_code: u16,
    pub retries: u32,
    pub url: String,
    pub uri: String,
    pub request_id: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub invocation_index: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub took_ms: u64,
}

impl InvocationResult {
    /// True when a response was received, whatever its status
    pub fn has_response(&self) -> bool {
        self.status_code != 0
    }

    pub fn header_values(&self, name: &str) -> Option<&Vec<String>> {
        let lower = name.to_ascii_lowercase();
        self.headers.get(&lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let mut result = InvocationResult {
            target_name: "t".to_string(),
            target_id: "t[1][1]".to_string(),
            status: "200 OK".to_string(),
            status_code: 200,
            ..Default::default()
        };
        result
            .headers
            .insert("content-type".to_string(), vec!["text/plain".to_string()]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["targetName"], "t");
        assert_eq!(json["targetId"], "t[1][1]");
        assert_eq!(json["statusCode"], 200);
        assert!(result.has_response());
        assert_eq!(
            result.header_values("Content-Type"),
            Some(&vec!["text/plain".to_string()])
        );
    }
}
