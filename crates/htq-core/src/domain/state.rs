//! Request status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a request. Exactly one holds at any observation point.
///
/// State transitions:
/// - Queued -> Pending -> Success | Timeout | Error
/// - Queued | Pending | Success | Timeout | Error -> Canceled
///
/// Canceled is absorbing. The string forms are persisted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting in the queue.
    Queued,

    /// Picked up by a worker, outbound call in flight.
    Pending,

    /// Canceled by a caller.
    Canceled,

    /// Outbound call returned a response (any HTTP code).
    Success,

    /// Outbound call timed out.
    Timeout,

    /// Outbound call failed.
    Error,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Queued,
        RequestStatus::Pending,
        RequestStatus::Canceled,
        RequestStatus::Success,
        RequestStatus::Timeout,
        RequestStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Pending => "pending",
            RequestStatus::Canceled => "canceled",
            RequestStatus::Success => "success",
            RequestStatus::Timeout => "timeout",
            RequestStatus::Error => "error",
        }
    }

    /// No further automatic transition happens from this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Canceled
                | RequestStatus::Success
                | RequestStatus::Timeout
                | RequestStatus::Error
        )
    }

    /// The outbound call finished and a response was recorded.
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            RequestStatus::Success | RequestStatus::Timeout | RequestStatus::Error
        )
    }

    /// Is `self -> next` an edge of the lifecycle graph?
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        match (self, next) {
            (RequestStatus::Canceled, _) => false,
            (_, RequestStatus::Canceled) => true,
            (RequestStatus::Queued, RequestStatus::Pending) => true,
            (RequestStatus::Pending, next) => next.is_completed(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
