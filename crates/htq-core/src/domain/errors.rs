//! Errors - エンジンのエラー型
//!
//! Lookups of unknown identifiers are not errors: operations return `None`
//! or `false` for them. Version conflicts are retried inside the engine and
//! only escape as `Busy` once the retry budget is spent.

use thiserror::Error;

use super::RequestId;
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum HtqError {
    /// Store failure (unavailable, conflict that was not recovered, ...).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A persisted record could not be decoded.
    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("invalid request id '{0}'")]
    InvalidId(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cancel lost the optimistic race too many times in a row.
    #[error("request {id} kept changing; cancel gave up after {attempts} attempts")]
    Busy { id: RequestId, attempts: u32 },
}

impl HtqError {
    pub(crate) fn corrupt(key: &str, reason: impl std::fmt::Display) -> Self {
        HtqError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Optimistic-concurrency rejection from the store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HtqError::Store(StoreError::Conflict(_)))
    }

    /// Worth retrying later: the store could not be reached.
    pub fn is_transient(&self) -> bool {
        matches!(self, HtqError::Store(StoreError::Unavailable(_)))
    }
}
