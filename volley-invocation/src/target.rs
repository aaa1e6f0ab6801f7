//! Target specification and validation
//!
//! A [`TargetSpec`] arrives as loosely-typed operator input (camelCase JSON or
//! YAML). [`validate`] rejects inconsistent specs and returns a normalised
//! copy: defaults written back into the string fields and every duration,
//! method and protocol parsed once into [`Resolved`], so the hot path never
//! parses anything.

use crate::error::ValidationError;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use volley_http::{ClientOptions, HttpMethod, ProtocolVersion};

pub const DEFAULT_DELAY: &str = "10ms";
pub const DEFAULT_RETRY_DELAY: &str = "1s";
pub const DEFAULT_CONN_TIMEOUT: &str = "10s";
pub const DEFAULT_CONN_IDLE_TIMEOUT: &str = "5m";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";

type BoxedReader = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// A request body that can be read exactly once
#[derive(Clone)]
pub struct BodyStream {
    reader: Arc<Mutex<Option<BoxedReader>>>,
}

impl BodyStream {
    pub fn new(reader: impl AsyncRead + Send + Sync + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(Box::pin(reader)))),
        }
    }

    /// Take the reader; later calls get `None`
    pub fn take(&self) -> Option<BoxedReader> {
        self.reader.lock().take()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("consumed", &self.reader.lock().is_none())
            .finish()
    }
}

impl PartialEq for BodyStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reader, &other.reader)
    }
}

/// Parsed form of a validated spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub validated: bool,
    pub method: HttpMethod,
    pub protocol: ProtocolVersion,
    pub https: bool,
    pub initial_delay: Duration,
    pub delay: Duration,
    pub retry_delay: Duration,
    pub conn_timeout: Duration,
    pub conn_idle_timeout: Duration,
    pub request_timeout: Duration,
    pub payload: Option<Bytes>,
}

/// Declarative description of what to call and how
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSpec {
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(alias = "bUrls")]
    pub burls: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    #[serde(skip)]
    pub body_stream: Option<BodyStream>,
    pub protocol: String,
    pub replicas: u32,
    pub request_count: u32,
    pub initial_delay: String,
    pub delay: String,
    pub retries: u32,
    pub retry_delay: String,
    pub retriable_status_codes: Vec<u16>,
    pub conn_timeout: String,
    pub conn_idle_timeout: String,
    pub request_timeout: String,
    #[serde(rename = "verifyTLS")]
    pub verify_tls: bool,
    pub collect_response: bool,
    pub fallback: bool,
    #[serde(alias = "ab")]
    pub ab_mode: bool,
    pub auto_payload: String,
    #[serde(rename = "sendID")]
    pub send_id: bool,
    #[serde(skip)]
    pub resolved: Resolved,
}

impl TargetSpec {
    /// Minimal spec with name, method and URL set
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn is_validated(&self) -> bool {
        self.resolved.validated
    }

    /// Transport parameters for this target's pooled client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            protocol: self.resolved.protocol,
            https: self.resolved.https,
            verify_tls: self.verify_tls,
            connect_timeout: self.resolved.conn_timeout,
            idle_timeout: self.resolved.conn_idle_timeout,
            request_timeout: self.resolved.request_timeout,
        }
    }

    /// Total primary calls a completed run makes
    pub fn total_calls(&self) -> u64 {
        u64::from(self.replicas) * u64::from(self.request_count)
    }

    /// Whether the body is sent more than once over a run
    pub fn replays_body(&self) -> bool {
        self.request_count > 1 || self.replicas > 1 || self.retries > 0 || self.fallback || self.ab_mode
    }
}

/// Validate and normalise a target specification.
///
/// Validating an already-normalised spec yields an equal value.
pub fn validate(spec: &TargetSpec) -> Result<TargetSpec, ValidationError> {
    let mut spec = spec.clone();

    spec.name = spec.name.trim().to_string();
    if spec.name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    let name = spec.name.clone();

    if spec.method.trim().is_empty() {
        return Err(ValidationError::MissingMethod(name));
    }
    let method: HttpMethod = spec
        .method
        .parse()
        .map_err(|_| ValidationError::InvalidMethod {
            target: name.clone(),
            method: spec.method.clone(),
        })?;
    spec.method = method.as_str().to_string();

    spec.url = spec.url.trim().to_string();
    if spec.url.is_empty() {
        return Err(ValidationError::MissingUrl(name));
    }
    let https = check_url(&name, &spec.url)?;

    if spec.fallback && spec.ab_mode {
        return Err(ValidationError::ConflictingModes(name));
    }
    if spec.burls.is_empty() {
        if spec.fallback {
            return Err(ValidationError::MissingBUrls { target: name, mode: "fallback" });
        }
        if spec.ab_mode {
            return Err(ValidationError::MissingBUrls { target: name, mode: "A-B" });
        }
    }

    for (header, value) in &spec.headers {
        check_header(&name, header, value)?;
    }

    let initial_delay = parse_duration(&name, "initialDelay", &mut spec.initial_delay, "")?;
    let delay = parse_duration(&name, "delay", &mut spec.delay, DEFAULT_DELAY)?;
    let retry_delay = parse_duration(&name, "retryDelay", &mut spec.retry_delay, DEFAULT_RETRY_DELAY)?;
    let conn_timeout =
        parse_duration(&name, "connTimeout", &mut spec.conn_timeout, DEFAULT_CONN_TIMEOUT)?;
    let conn_idle_timeout = parse_duration(
        &name,
        "connIdleTimeout",
        &mut spec.conn_idle_timeout,
        DEFAULT_CONN_IDLE_TIMEOUT,
    )?;
    let request_timeout = parse_duration(
        &name,
        "requestTimeout",
        &mut spec.request_timeout,
        DEFAULT_REQUEST_TIMEOUT,
    )?;

    spec.auto_payload = spec.auto_payload.trim().to_string();
    let payload = if spec.auto_payload.is_empty() {
        None
    } else {
        let size = parse_payload_size(&spec.auto_payload).ok_or_else(|| {
            ValidationError::InvalidPayloadSize {
                target: name.clone(),
                value: spec.auto_payload.clone(),
            }
        })?;
        Some(generate_payload(size))
    };

    spec.replicas = spec.replicas.max(1);
    spec.request_count = spec.request_count.max(1);

    if spec.body_stream.is_some() && spec.replicas > 1 {
        return Err(ValidationError::StreamWithReplicas(name));
    }

    let protocol = ProtocolVersion::negotiate(&spec.protocol, https);
    spec.protocol = protocol.as_str().to_string();

    spec.resolved = Resolved {
        validated: true,
        method,
        protocol,
        https,
        initial_delay,
        delay,
        retry_delay,
        conn_timeout,
        conn_idle_timeout,
        request_timeout,
        payload,
    };

    Ok(spec)
}

fn check_url(target: &str, raw: &str) -> Result<bool, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidUrl {
        target: target.to_string(),
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" => Ok(false),
        "https" => Ok(true),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn check_header(target: &str, name: &str, value: &str) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidHeader {
        target: target.to_string(),
        name: name.to_string(),
        reason,
    };
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Parse a duration field, writing the default back when it is unset
fn parse_duration(
    target: &str,
    field: &'static str,
    raw: &mut String,
    default: &str,
) -> Result<Duration, ValidationError> {
    let trimmed = raw.trim().to_string();
    *raw = if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed
    };
    if raw.is_empty() {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw).map_err(|e| ValidationError::InvalidDuration {
        target: target.to_string(),
        field,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

/// Parse sizes such as `512`, `10K`, `10KB`, `2M`; zero is rejected
pub fn parse_payload_size(raw: &str) -> Option<usize> {
    let upper = raw.trim().to_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (digits, unit) = upper.split_at(digits_end);
    let value: usize = digits.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        _ => return None,
    };
    let size = value.checked_mul(multiplier)?;
    (size > 0).then_some(size)
}

fn generate_payload(size: usize) -> Bytes {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let payload: Vec<u8> = ALPHABET.iter().copied().cycle().take(size).collect();
    Bytes::from(payload)
}
