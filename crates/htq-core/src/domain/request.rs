use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::HtqError;
use super::{Headers, RequestId, RequestStatus};

/// Outbound timeout applied when `send` is not given one.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// A queued HTTP call and its lifecycle status.
///
/// The JSON form mirrors the persisted field names (`uuid`, `time`, `data`,
/// `timeout`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "uuid")]
    pub id: RequestId,
    pub status: RequestStatus,
    #[serde(rename = "time", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub url: String,
    /// Lowercase HTTP verb.
    pub method: String,
    /// `None` is "no body", which is not the same as an empty body.
    #[serde(rename = "data")]
    pub body: Option<String>,
    pub headers: Headers,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
}

impl Request {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Arguments of `send`.
///
/// ```ignore
/// let req = SendRequest::new("http://example.com/hook")
///     .body(r#"{"foo": 1}"#)
///     .header("Content-Type", "application/json")
///     .timeout_ms(5_000);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    pub url: String,
    pub method: Option<String>,
    pub body: Option<String>,
    pub headers: Headers,
    pub timeout_ms: Option<u64>,
}

impl SendRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Method to use: the given one lowercased, otherwise `get` without a
    /// body and `post` with one.
    pub fn resolved_method(&self) -> String {
        match self.method.as_deref().map(str::trim) {
            Some(method) if !method.is_empty() => method.to_ascii_lowercase(),
            _ if self.body.is_none() => "get".to_string(),
            _ => "post".to_string(),
        }
    }

    /// Build the QUEUED record for this call.
    pub(crate) fn into_request(
        self,
        id: RequestId,
        created_at: DateTime<Utc>,
        default_timeout_ms: u64,
    ) -> Result<Request, HtqError> {
        if self.url.trim().is_empty() {
            return Err(HtqError::InvalidRequest("url is required".to_string()));
        }
        let method = self.resolved_method();
        Ok(Request {
            id,
            status: RequestStatus::Queued,
            created_at,
            url: self.url,
            method,
            body: self.body,
            headers: self.headers,
            timeout_ms: self.timeout_ms.unwrap_or(default_timeout_ms),
        })
    }
}
