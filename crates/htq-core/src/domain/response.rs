//! Response model: the recorded result of one outbound call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Headers, RequestId, RequestStatus};
use crate::ports::{DispatchError, DispatchResponse};

/// Result of executing a request. Created once, on the terminal transition,
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "uuid")]
    pub id: RequestId,
    /// When the outbound call started.
    #[serde(rename = "time", with = "chrono::serde::ts_milliseconds")]
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl Response {
    pub fn status(&self) -> RequestStatus {
        self.outcome.status()
    }
}

/// What the outbound call produced.
///
/// A non-2xx HTTP reply is still `Success`: the call completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseOutcome {
    Success {
        code: u16,
        reason: String,
        #[serde(rename = "elapsed")]
        elapsed_ms: f64,
        headers: Headers,
        #[serde(rename = "data")]
        body: String,
    },
    Timeout {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ResponseOutcome {
    pub fn status(&self) -> RequestStatus {
        match self {
            ResponseOutcome::Success { .. } => RequestStatus::Success,
            ResponseOutcome::Timeout { .. } => RequestStatus::Timeout,
            ResponseOutcome::Error { .. } => RequestStatus::Error,
        }
    }

    /// Human-readable failure cause (timeout/error only).
    pub fn message(&self) -> Option<&str> {
        match self {
            ResponseOutcome::Success { .. } => None,
            ResponseOutcome::Timeout { message } | ResponseOutcome::Error { message } => {
                Some(message)
            }
        }
    }
}

impl From<Result<DispatchResponse, DispatchError>> for ResponseOutcome {
    fn from(result: Result<DispatchResponse, DispatchError>) -> Self {
        match result {
            Ok(reply) => ResponseOutcome::Success {
                code: reply.status,
                reason: reply.reason,
                elapsed_ms: reply.elapsed.as_secs_f64() * 1000.0,
                headers: reply.headers,
                body: reply.body,
            },
            Err(DispatchError::Timeout(message)) => ResponseOutcome::Timeout { message },
            Err(DispatchError::Failed(message)) => ResponseOutcome::Error { message },
        }
    }
}
