//! Writes against an endpoint, with cache invalidation on success.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::RequestOptions;
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::key::CacheKey;
use crate::query::QueryClient;

/// The methods a mutation may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationMethod {
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl From<MutationMethod> for HttpMethod {
    fn from(method: MutationMethod) -> Self {
        match method {
            MutationMethod::Post => HttpMethod::Post,
            MutationMethod::Put => HttpMethod::Put,
            MutationMethod::Patch => HttpMethod::Patch,
            MutationMethod::Delete => HttpMethod::Delete,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Prefixes invalidated after every successful call.
    pub invalidates: Vec<CacheKey>,
    pub headers: Vec<(String, String)>,
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(mut self, prefix: impl Into<CacheKey>) -> Self {
        self.invalidates.push(prefix.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

#[derive(Debug, Default)]
struct MutationState {
    status: MutationStatus,
    last_error: Option<ApiError>,
}

/// Handle to a write operation taking `I` and yielding `R`.
///
/// Clones share status. Calls are independent: nothing is queued or
/// retried, and a later call may finish before an earlier one.
pub struct Mutation<I, R> {
    client: QueryClient,
    endpoint: String,
    method: MutationMethod,
    options: MutationOptions,
    state: Arc<Mutex<MutationState>>,
    _types: PhantomData<fn(&I) -> R>,
}

impl<I, R> Clone for Mutation<I, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            method: self.method,
            options: self.options.clone(),
            state: self.state.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, R> fmt::Debug for Mutation<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("status", &self.status())
            .finish()
    }
}

impl<I, R> Mutation<I, R> {
    pub fn status(&self) -> MutationStatus {
        self.state.lock().status
    }

    pub fn last_error(&self) -> Option<ApiError> {
        self.state.lock().last_error.clone()
    }

    pub fn reset(&self) {
        *self.state.lock() = MutationState::default();
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> MutationMethod {
        self.method
    }

    fn set_state(&self, status: MutationStatus, last_error: Option<ApiError>) {
        *self.state.lock() = MutationState { status, last_error };
    }
}

impl<I: Serialize, R: DeserializeOwned> Mutation<I, R> {
    pub(crate) fn new(
        client: QueryClient,
        endpoint: &str,
        method: MutationMethod,
        options: MutationOptions,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            method,
            options,
            state: Arc::new(Mutex::new(MutationState::default())),
            _types: PhantomData,
        }
    }

    /// Sends `input` as the JSON body. An input serializing to `null`
    /// sends no body.
    pub async fn mutate(&self, input: &I) -> Result<R, ApiError> {
        self.set_state(MutationStatus::Pending, None);

        match self.send(input).await {
            Ok(result) => {
                for prefix in &self.options.invalidates {
                    self.client.cache().invalidate(prefix);
                }
                self.set_state(MutationStatus::Success, None);
                Ok(result)
            }
            Err(error) => {
                self.set_state(MutationStatus::Error, Some(error.clone()));
                Err(error)
            }
        }
    }

    async fn send(&self, input: &I) -> Result<R, ApiError> {
        let body = serde_json::to_string(input).map_err(ApiError::serialization)?;
        let mut request = RequestOptions::new()
            .method(self.method.into())
            .headers(self.options.headers.iter().cloned());
        if body != "null" {
            request = request.body(body);
        }
        self.client.api().fetch(&self.endpoint, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClient;
    use crate::config::ClientConfig;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::query::{QueryOptions, QueryResult};
    use crate::transport::{Transport, TransportError};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u64,
        name: String,
    }

    /// Answers every request with the same response and records it.
    struct Fixed {
        status: u16,
        body: String,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Fixed {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Fixed {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: Vec::new(),
                body: self.body.clone(),
            })
        }
    }

    fn client(transport: Arc<Fixed>) -> QueryClient {
        QueryClient::new(ApiClient::with_transport(
            ClientConfig::new("http://api.test"),
            transport,
        ))
    }

    #[tokio::test]
    async fn put_sends_serialized_input() {
        let transport = Fixed::new(200, r#"{"id":1,"name":"x"}"#);
        let qc = client(transport.clone());
        let update = qc.mutation::<Widget, Widget>("/widgets", MutationMethod::Put, MutationOptions::new());

        let input = Widget {
            id: 1,
            name: "x".to_string(),
        };
        let saved = update.mutate(&input).await.unwrap();
        assert_eq!(saved, input);
        assert_eq!(update.status(), MutationStatus::Success);

        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, HttpMethod::Put);
        assert_eq!(seen[0].url, "http://api.test/widgets");
        assert_eq!(seen[0].header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(seen[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"id": 1, "name": "x"}));
    }

    #[tokio::test]
    async fn default_method_is_post() {
        let transport = Fixed::new(201, r#"{"id":2,"name":"y"}"#);
        let qc = client(transport.clone());
        let create = qc.mutation::<serde_json::Value, Widget>(
            "/widgets",
            MutationMethod::default(),
            MutationOptions::new(),
        );
        create.mutate(&serde_json::json!({"name": "y"})).await.unwrap();
        assert_eq!(transport.seen.lock()[0].method, HttpMethod::Post);
    }

    #[tokio::test]
    async fn unit_input_sends_no_body() {
        let transport = Fixed::new(204, "");
        let qc = client(transport.clone());
        let delete = qc.mutation::<(), ()>("/widgets/1", MutationMethod::Delete, MutationOptions::new());
        delete.mutate(&()).await.unwrap();

        let seen = transport.seen.lock();
        assert_eq!(seen[0].method, HttpMethod::Delete);
        assert!(seen[0].body.is_none());
    }

    #[tokio::test]
    async fn failure_is_normalized_and_recorded() {
        let transport = Fixed::new(500, "");
        let qc = client(transport);
        let create = qc.mutation::<Widget, Widget>("/widgets", MutationMethod::Post, MutationOptions::new());

        let err = create
            .mutate(&Widget {
                id: 1,
                name: "x".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::unexpected(500));
        assert_eq!(create.status(), MutationStatus::Error);
        assert_eq!(create.last_error(), Some(ApiError::unexpected(500)));

        create.reset();
        assert_eq!(create.status(), MutationStatus::Idle);
        assert!(create.last_error().is_none());
    }

    #[tokio::test]
    async fn success_invalidates_configured_prefixes() {
        let transport = Fixed::new(200, r#"{"id":1,"name":"x"}"#);
        let qc = client(transport.clone());
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        let _: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options.clone()).await;
        let _: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options.clone()).await;
        assert_eq!(transport.seen.lock().len(), 1);

        let rename = qc.mutation::<Widget, Widget>(
            "/widgets/1",
            MutationMethod::Patch,
            MutationOptions::new().invalidate("widgets"),
        );
        rename
            .mutate(&Widget {
                id: 1,
                name: "x".to_string(),
            })
            .await
            .unwrap();

        let _: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options).await;
        assert_eq!(transport.seen.lock().len(), 3);
    }
}
