//! Dispatcher port - 外部 HTTP 呼び出しの抽象化
//!
//! The engine hands a request's url/method/headers/body/timeout to a
//! `Dispatcher` and records whatever comes back. No retries happen here.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Headers, Request};

/// The outbound call to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    /// Lowercase HTTP verb.
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl DispatchRequest {
    /// The call described by a queued request.
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            timeout: request.timeout(),
        }
    }

    /// Best-effort cancellation sent to the same endpoint.
    pub fn cancellation_of(request: &Request) -> Self {
        Self {
            method: "delete".to_string(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: None,
            timeout: request.timeout(),
        }
    }
}

/// What the remote endpoint answered.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: String,
    pub elapsed: Duration,
}

impl DispatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The call did not finish within its timeout.
    #[error("{0}")]
    Timeout(String),

    /// Any other failure (connect, invalid request, body read, ...).
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError>;
}
