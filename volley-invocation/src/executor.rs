//! Per-call execution: retry loop, fallback redirection and A-B calls

use crate::result::InvocationResult;
use crate::target::TargetSpec;
use crate::tracker::RequestBody;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use url::Url;

/// Header carrying the synthetic call identifier on every request
pub const CALL_ID_HEADER: &str = "Volley-Call-Id";
/// Query parameter carrying the correlation id when `sendID` is set
pub const REQUEST_ID_PARAM: &str = "x-request-id";

/// Executes calls for one validated target
#[derive(Clone)]
pub struct CallExecutor {
    spec: Arc<TargetSpec>,
    client: reqwest::Client,
    body: RequestBody,
    invocation_index: u64,
}

/// Where a single attempt goes
struct Destination {
    url: Url,
    request_id: String,
}

enum Outcome {
    Response(reqwest::Response),
    Failed(String),
}

impl CallExecutor {
    pub fn new(
        spec: Arc<TargetSpec>,
        client: reqwest::Client,
        body: RequestBody,
        invocation_index: u64,
    ) -> Self {
        Self {
            spec,
            client,
            body,
            invocation_index,
        }
    }

    /// Execute one call. Returns the primary result followed by any A-B results.
    pub async fn execute(&self, call_id: &str) -> Vec<InvocationResult> {
        let primary = match self.primary_destination() {
            Ok(destination) => destination,
            Err(message) => {
                let mut result = self.new_result(call_id, &self.spec.url, "");
                result.status = message;
                result.finished_at = Some(Utc::now());
                return vec![result];
            }
        };

        let result = self.call_with_retries(call_id, &primary).await;
        let primary_ok = result.has_response();
        let mut results = vec![result];

        if self.spec.ab_mode && primary_ok {
            for (index, burl) in self.spec.burls.iter().enumerate() {
                let request_id = format!("{}-B-{}", primary.request_id, index + 1);
                let secondary = match self.destination(burl, &request_id) {
                    Ok(destination) => self.call_once(call_id, &destination).await,
                    Err(message) => {
                        let mut failed = self.new_result(call_id, burl, &request_id);
                        failed.status = message;
                        failed.finished_at = Some(Utc::now());
                        failed
                    }
                };
                results.push(secondary);
            }
        }

        results
    }

    fn primary_destination(&self) -> Result<Destination, String> {
        let url = Url::parse(&self.spec.url).map_err(|e| e.to_string())?;
        let existing = url
            .query_pairs()
            .find(|(key, _)| key == REQUEST_ID_PARAM)
            .map(|(_, value)| value.into_owned());
        let request_id = existing.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.destination(&self.spec.url, &request_id)
    }

    /// Resolve a URL, attaching the correlation id when the target sends ids
    fn destination(&self, raw: &str, request_id: &str) -> Result<Destination, String> {
        let mut url = Url::parse(raw).map_err(|e| e.to_string())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported scheme '{}'", url.scheme()));
        }
        if self.spec.send_id {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != REQUEST_ID_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(pairs)
                .append_pair(REQUEST_ID_PARAM, request_id);
        }
        Ok(Destination {
            url,
            request_id: request_id.to_string(),
        })
    }

    fn build(&self, call_id: &str, destination: &Destination) -> Result<reqwest::Request, reqwest::Error> {
        let method = reqwest::Method::from(self.spec.resolved.method);
        let mut request = self
            .client
            .request(method, destination.url.clone())
            .timeout(self.spec.resolved.request_timeout)
            .header(CALL_ID_HEADER, call_id);
        for (name, value) in &self.spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(version) = self.spec.resolved.protocol.request_version() {
            request = request.version(version);
        }
        if let Some(body) = self.body.to_reqwest() {
            request = request.body(body);
        }
        request.build()
    }

    async fn send(&self, call_id: &str, destination: &Destination) -> Outcome {
        match self.build(call_id, destination) {
            Ok(request) => match self.client.execute(request).await {
                Ok(response) => Outcome::Response(response),
                Err(e) => Outcome::Failed(e.to_string()),
            },
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    async fn call_with_retries(&self, call_id: &str, primary: &Destination) -> InvocationResult {
        let spec = &self.spec;
        let attempts = spec.retries.saturating_add(1);
        let started = Instant::now();
        let started_at = Utc::now();
        let mut redirected: Option<Destination> = None;
        let mut attempt = 0;

        loop {
            let destination = redirected.as_ref().unwrap_or(primary);
            let is_last = attempt + 1 >= attempts;
            let outcome = self.send(call_id, destination).await;

            let retry_reason = match &outcome {
                Outcome::Response(response)
                    if spec.retriable_status_codes.contains(&response.status().as_u16()) =>
                {
                    Some(format!("status {}", response.status().as_u16()))
                }
                Outcome::Response(_) => None,
                Outcome::Failed(error) => Some(error.clone()),
            };

            if retry_reason.is_none() || is_last {
                let mut result = self.new_result(call_id, destination.url.as_str(), &destination.request_id);
                result.retries = attempt;
                result.uri = destination.url.path().to_string();
                result.started_at = Some(started_at);
                self.finish(&mut result, outcome).await;
                result.took_ms = started.elapsed().as_millis() as u64;
                return result;
            }

            if let Outcome::Response(response) = outcome {
                let _ = response.bytes().await;
            }
            debug!(
                "Call {} attempt {}/{} to {} failed ({}), retrying in {:?}",
                call_id,
                attempt + 1,
                attempts,
                destination.url,
                retry_reason.unwrap_or_default(),
                spec.resolved.retry_delay
            );

            if spec.fallback {
                redirected = spec.burls.get(attempt as usize).and_then(|burl| {
                    let request_id = format!("{}-{}", primary.request_id, attempt + 1);
                    match self.destination(burl, &request_id) {
                        Ok(destination) => Some(destination),
                        Err(e) => {
                            debug!("Fallback URL {} unusable ({}), retrying original", burl, e);
                            None
                        }
                    }
                });
            }

            tokio::time::sleep(spec.resolved.retry_delay).await;
            attempt += 1;
        }
    }

    async fn call_once(&self, call_id: &str, destination: &Destination) -> InvocationResult {
        let started = Instant::now();
        let mut result = self.new_result(call_id, destination.url.as_str(), &destination.request_id);
        result.uri = destination.url.path().to_string();
        result.started_at = Some(Utc::now());
        let outcome = self.send(call_id, destination).await;
        self.finish(&mut result, outcome).await;
        result.took_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn finish(&self, result: &mut InvocationResult, outcome: Outcome) {
        match outcome {
            Outcome::Response(response) => {
                let status = response.status();
                result.status_code = status.as_u16();
                result.status = status.to_string();
                result.headers = collect_headers(response.headers());
                if self.spec.collect_response {
                    match response.text().await {
                        Ok(text) => result.body = text,
                        Err(e) => debug!("Failed to read response body for {}: {}", result.target_id, e),
                    }
                } else {
                    let _ = response.bytes().await;
                }
                debug!("Call {} to {} returned {}", result.target_id, result.url, result.status);
            }
            Outcome::Failed(error) => {
                debug!("Call {} to {} failed: {}", result.target_id, result.url, error);
                result.status = error;
            }
        }
        result.finished_at = Some(Utc::now());
    }

    fn new_result(&self, call_id: &str, url: &str, request_id: &str) -> InvocationResult {
        InvocationResult {
            target_name: self.spec.name.clone(),
            target_id: call_id.to_string(),
            url: url.to_string(),
            request_id: request_id.to_string(),
            invocation_index: self.invocation_index,
            ..Default::default()
        }
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected.entry(name.as_str().to_string()).or_default().push(value);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::validate;

    fn executor(mut spec: TargetSpec) -> CallExecutor {
        spec.send_id = true;
        let spec = validate(&spec).unwrap();
        CallExecutor::new(Arc::new(spec), reqwest::Client::new(), RequestBody::Empty, 1)
    }

    #[test]
    fn test_request_id_reused_from_url() {
        let exec = executor(TargetSpec::new("t", "GET", "http://localhost/a?x-request-id=abc&q=1"));
        let destination = exec.primary_destination().unwrap();
        assert_eq!(destination.request_id, "abc");
        let pairs: Vec<(String, String)> = destination
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "1".to_string()),
                ("x-request-id".to_string(), "abc".to_string())
            ]
        );
    }

    #[test]
    fn test_request_id_minted() {
        let exec = executor(TargetSpec::new("t", "GET", "http://localhost/a"));
        let destination = exec.primary_destination().unwrap();
        assert!(uuid::Uuid::parse_str(&destination.request_id).is_ok());
        assert!(destination.url.as_str().contains("x-request-id="));
    }

    #[test]
    fn test_bad_fallback_url_rejected() {
        let exec = executor(TargetSpec::new("t", "GET", "http://localhost/a"));
        assert!(exec.destination("not a url", "id-1").is_err());
        assert!(exec.destination("ftp://host/x", "id-1").is_err());
    }

    #[test]
    fn test_headers_collected_by_name() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append("x-a", "1".parse().unwrap());
        headers.append("x-a", "2".parse().unwrap());
        headers.insert("x-b", "3".parse().unwrap());
        let collected = collect_headers(&headers);
        assert_eq!(collected["x-a"], vec!["1", "2"]);
        assert_eq!(collected["x-b"], vec!["3"]);
    }
}
