//! HttpDispatcher - reqwest による外部 HTTP 呼び出し

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use std::time::Instant;

use crate::domain::Headers;
use crate::ports::{DispatchError, DispatchRequest, DispatchResponse, Dispatcher};

/// `Dispatcher` performing real HTTP calls.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    /// # Errors
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, DispatchError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DispatchError::Failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// One entry per header name; repeated headers are joined with ", ".
/// Values that are not valid UTF-8 are skipped.
fn flatten_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|joined: &mut String| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

fn classify(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout(e.to_string())
    } else {
        DispatchError::Failed(e.to_string())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| DispatchError::Failed(format!("invalid method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(classify)?;
        let elapsed = started.elapsed();

        let status = response.status();
        let headers = flatten_headers(response.headers());
        let body = response.text().await.map_err(classify)?;

        Ok(DispatchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            elapsed,
        })
    }
}
