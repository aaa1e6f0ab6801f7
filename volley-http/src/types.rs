//! HTTP types and enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP methods a target may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Get the string representation of the HTTP method
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = HttpMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(HttpMethodError::InvalidMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Errors that can occur when parsing HTTP methods
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpMethodError {
    #[error("Invalid HTTP method: '{0}'. Supported methods are: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS")]
    InvalidMethod(String),
}

/// Negotiated wire protocol of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProtocolVersion {
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[default]
    #[serde(rename = "HTTP/1.1")]
    Http11,
    #[serde(rename = "HTTP/2")]
    Http2,
    /// Left to ALPN during the TLS handshake
    #[serde(rename = "auto")]
    Auto,
}

impl ProtocolVersion {
    /// Negotiate the protocol from a target's raw setting.
    ///
    /// Unset protocols use ALPN over TLS and HTTP/1.1 in plaintext;
    /// anything unrecognised falls back to HTTP/1.1.
    pub fn negotiate(raw: &str, https: bool) -> Self {
        let normalized = raw.trim().to_uppercase();
        match normalized.as_str() {
            "" if https => ProtocolVersion::Auto,
            "" => ProtocolVersion::Http11,
            "HTTP/1.0" | "1.0" => ProtocolVersion::Http10,
            "HTTP/1.1" | "1.1" | "HTTP/1" => ProtocolVersion::Http11,
            "HTTP/2" | "HTTP/2.0" | "2" | "2.0" | "H2" | "H2C" => ProtocolVersion::Http2,
            _ => ProtocolVersion::Http11,
        }
    }

    /// Major and minor version numbers; `Auto` reports 0.0
    pub fn major_minor(&self) -> (u8, u8) {
        match self {
            ProtocolVersion::Http10 => (1, 0),
            ProtocolVersion::Http11 => (1, 1),
            ProtocolVersion::Http2 => (2, 0),
            ProtocolVersion::Auto => (0, 0),
        }
    }

    /// Canonical protocol name, as stored back into a normalised target
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Http10 => "HTTP/1.0",
            ProtocolVersion::Http11 => "HTTP/1.1",
            ProtocolVersion::Http2 => "HTTP/2",
            ProtocolVersion::Auto => "",
        }
    }

    /// The version to pin on each request, if any
    pub fn request_version(&self) -> Option<reqwest::Version> {
        match self {
            ProtocolVersion::Http10 => Some(reqwest::Version::HTTP_10),
            ProtocolVersion::Http11 => Some(reqwest::Version::HTTP_11),
            ProtocolVersion::Http2 => Some(reqwest::Version::HTTP_2),
            ProtocolVersion::Auto => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Auto => write!(f, "auto"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_from_str() {
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!(" delete ".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert_eq!("OPTIONS".parse::<HttpMethod>().unwrap(), HttpMethod::Options);

        assert!("INVALID".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_http_method_to_reqwest() {
        assert_eq!(reqwest::Method::from(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(reqwest::Method::from(HttpMethod::Patch), reqwest::Method::PATCH);
        assert_eq!(reqwest::Method::from(HttpMethod::Head), reqwest::Method::HEAD);
    }

    #[test]
    fn test_protocol_negotiation() {
        assert_eq!(ProtocolVersion::negotiate("HTTP/1.0", false), ProtocolVersion::Http10);
        assert_eq!(ProtocolVersion::negotiate("http/1.1", true), ProtocolVersion::Http11);
        assert_eq!(ProtocolVersion::negotiate("HTTP/2", false), ProtocolVersion::Http2);
        assert_eq!(ProtocolVersion::negotiate("h2c", false), ProtocolVersion::Http2);
        assert_eq!(ProtocolVersion::negotiate("SPDY/3", false), ProtocolVersion::Http11);
        assert_eq!(ProtocolVersion::negotiate("", false), ProtocolVersion::Http11);
        assert_eq!(ProtocolVersion::negotiate("", true), ProtocolVersion::Auto);
    }

    #[test]
    fn test_protocol_round_trips_through_canonical_name() {
        for protocol in [
            ProtocolVersion::Http10,
            ProtocolVersion::Http11,
            ProtocolVersion::Http2,
        ] {
            assert_eq!(ProtocolVersion::negotiate(protocol.as_str(), false), protocol);
        }
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion::Auto.as_str(), true),
            ProtocolVersion::Auto
        );
        assert_eq!(ProtocolVersion::Http2.major_minor(), (2, 0));
    }
}
