//! The I/O seam between the client and the network.
//!
//! # Design
//! `ApiClient` never performs I/O itself; it hands an `HttpRequest` to a
//! `Transport` and gets an `HttpResponse` back. Non-2xx statuses are data,
//! not errors: only failures that produce no response at all (DNS,
//! connection, timeout) are reported as `TransportError`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Largest response body read into memory.
pub const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// A round trip that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::network(err.0)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking `ureq` agent driven from tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        // 4xx/5xx must come back as responses so the client can normalize them.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || execute_blocking(&agent, &request))
            .await
            .map_err(|e| TransportError(format!("transport worker failed: {e}")))?
    }
}

fn execute_blocking(agent: &ureq::Agent, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = req.url.as_str();
    let body = req.body.as_deref().map(str::as_bytes);

    let result = match (req.method, body) {
        (HttpMethod::Get, None) => with_headers(agent.get(url), &req.headers).call(),
        (HttpMethod::Get, Some(body)) => {
            with_headers(agent.get(url), &req.headers).force_send_body().send(body)
        }
        (HttpMethod::Delete, None) => with_headers(agent.delete(url), &req.headers).call(),
        (HttpMethod::Delete, Some(body)) => {
            with_headers(agent.delete(url), &req.headers).force_send_body().send(body)
        }
        (HttpMethod::Post, Some(body)) => with_headers(agent.post(url), &req.headers).send(body),
        (HttpMethod::Post, None) => with_headers(agent.post(url), &req.headers).send_empty(),
        (HttpMethod::Put, Some(body)) => with_headers(agent.put(url), &req.headers).send(body),
        (HttpMethod::Put, None) => with_headers(agent.put(url), &req.headers).send_empty(),
        (HttpMethod::Patch, Some(body)) => with_headers(agent.patch(url), &req.headers).send(body),
        (HttpMethod::Patch, None) => with_headers(agent.patch(url), &req.headers).send_empty(),
    };
    let mut response = result.map_err(|e| TransportError(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = match response.body_mut().with_config().limit(MAX_BODY_BYTES).read_to_vec() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        // A 2xx payload that never arrived is a network failure. For any
        // other status the status itself is the answer.
        Err(e) if (200..300).contains(&status) => {
            return Err(TransportError(format!("failed to read response body: {e}")));
        }
        Err(e) => {
            tracing::warn!(status, error = %e, "discarding unreadable error body");
            String::new()
        }
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}
