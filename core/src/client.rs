//! Typed fetch client: request construction and response normalization.
//!
//! # Design
//! `ApiClient` holds only its configuration and a shared transport, and
//! carries no mutable state between calls. Every call is split into
//! `build_request`, which resolves the URL, method, headers and body, and
//! `parse_response`, which turns an `HttpResponse` into `T` or an
//! [`ApiError`]. `fetch` runs the two around exactly one transport call.
//! Both halves stay public so a caller can do the I/O itself.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";

/// Per-call overrides for method, headers and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: Option<HttpMethod>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as the JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, payload: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_string(payload).map_err(ApiError::serialization)?;
        self.body = Some(body);
        Ok(self)
    }
}

/// Stateless client bound to one base URL and one transport.
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Client backed by a `ureq` transport honoring the config's timeout.
    pub fn new(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(config.timeout());
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Client configured from `API_URL`.
    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url()
    }

    /// Resolves the request descriptor for one call.
    ///
    /// The default `Content-Type: application/json` header comes first;
    /// a caller header with the same name (compared case-insensitively)
    /// replaces it in place.
    pub fn build_request(&self, endpoint: &str, options: RequestOptions) -> HttpRequest {
        let mut headers = vec![(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string())];
        for (name, value) in options.headers {
            match headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
                Some(existing) => *existing = (name, value),
                None => headers.push((name, value)),
            }
        }

        HttpRequest {
            method: options.method.unwrap_or_default(),
            url: join_url(self.config.base_url(), endpoint),
            headers,
            body: options.body,
        }
    }

    /// Normalizes a response into `T` or an [`ApiError`].
    ///
    /// An empty success body is read as JSON `null`.
    pub fn parse_response<T: DeserializeOwned>(&self, response: HttpResponse) -> Result<T, ApiError> {
        check_status(&response)?;
        let body = match response.body.trim() {
            "" => "null",
            body => body,
        };
        serde_json::from_str(body).map_err(|e| ApiError::parse(response.status, e))
    }

    /// One HTTP round trip to `endpoint`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let request = self.build_request(endpoint, options);
        let method = request.method;
        tracing::debug!(%method, url = %request.url, "sending request");

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%method, endpoint, error = %e, "transport failure");
                return Err(e.into());
            }
        };
        tracing::debug!(%method, endpoint, status = response.status, "received response");

        self.parse_response(response).inspect_err(|e| {
            tracing::warn!(%method, endpoint, code = %e.code, status = e.status_code, "request failed");
        })
    }
}

/// Map a non-2xx response to the error its body describes, or synthesize one.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(serde_json::from_str::<ApiError>(&response.body)
        .unwrap_or_else(|_| ApiError::unexpected(response.status)))
}

fn join_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.is_empty() || endpoint.starts_with('/') {
        format!("{base_url}{endpoint}")
    } else {
        format!("{base_url}/{endpoint}")
    }
}
