//! Cached, deduplicated reads.
//!
//! # Design
//! `QueryClient` pairs an `ApiClient` with a `QueryCache`. A query's only
//! obligations are key normalization and typed error propagation; staleness
//! and deduplication are the cache's job. Results are always returned, never
//! thrown: a failed query is a `QueryResult` in the `Error` state that may
//! still carry the last good data.

use std::time::{Duration, Instant};

use futures::future::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{decode, CacheSnapshot, QueryCache, QueryStatus};
use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::key::CacheKey;
use crate::mutation::{Mutation, MutationMethod, MutationOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long a successful result is served from cache. Zero means every
    /// call refetches; only concurrent calls are deduplicated.
    pub stale_time: Duration,
    /// A disabled query never fetches and reports whatever is cached.
    pub enabled: bool,
    pub headers: Vec<(String, String)>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            enabled: true,
            headers: Vec::new(),
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Outcome of one `query` call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub status: QueryStatus,
    pub updated_at: Option<Instant>,
}

impl<T> QueryResult<T> {
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// The error if the query failed, otherwise whatever data is present.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl<T: DeserializeOwned> QueryResult<T> {
    fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        let CacheSnapshot {
            data,
            error,
            updated_at,
            status,
        } = snapshot;
        match data.map(decode::<T>).transpose() {
            Ok(data) => Self {
                data,
                error,
                status,
                updated_at,
            },
            Err(decode_error) => Self {
                data: None,
                error: Some(error.unwrap_or(decode_error)),
                status: QueryStatus::Error,
                updated_at,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryClient {
    api: ApiClient,
    cache: QueryCache,
}

impl QueryClient {
    pub fn new(api: ApiClient) -> Self {
        Self::with_cache(api, QueryCache::new())
    }

    pub fn with_cache(api: ApiClient, cache: QueryCache) -> Self {
        Self { api, cache }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Cached GET of `endpoint` under `key`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey>,
        endpoint: &str,
        options: QueryOptions,
    ) -> QueryResult<T> {
        let key = key.into();

        if !options.enabled {
            return self
                .cache
                .snapshot(&key)
                .map(QueryResult::from_snapshot)
                .unwrap_or_else(|| QueryResult::from_snapshot(CacheSnapshot::default()));
        }

        if let Some(snapshot) = self.cache.fresh(&key, options.stale_time) {
            tracing::debug!(%key, "serving fresh query from cache");
            return QueryResult::from_snapshot(snapshot);
        }

        let api = self.api.clone();
        let endpoint = endpoint.to_string();
        let request = RequestOptions::new()
            .method(HttpMethod::Get)
            .headers(options.headers);
        let snapshot = self
            .cache
            .fetch_or_join(&key, move || {
                async move { api.fetch::<Value>(&endpoint, request).await }.boxed()
            })
            .await;
        QueryResult::from_snapshot(snapshot)
    }

    /// A reusable write against `endpoint`.
    pub fn mutation<I: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: MutationMethod,
        options: MutationOptions,
    ) -> Mutation<I, R> {
        Mutation::new(self.clone(), endpoint, method, options)
    }

    pub fn invalidate(&self, prefix: impl Into<CacheKey>) -> usize {
        self.cache.invalidate(&prefix.into())
    }

    pub fn set_query_data<T: Serialize + ?Sized>(
        &self,
        key: impl Into<CacheKey>,
        data: &T,
    ) -> Result<(), ApiError> {
        self.cache.set_data(&key.into(), data)
    }

    pub fn get_query_data<T: DeserializeOwned>(
        &self,
        key: impl Into<CacheKey>,
    ) -> Result<Option<T>, ApiError> {
        self.cache.get_data(&key.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::transport::{Transport, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u64,
        name: String,
    }

    /// Serves responses in order and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<Vec<HttpResponse>>,
        seen: Mutex<Vec<HttpRequest>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(responses: Vec<(u16, &str)>) -> Arc<Self> {
            Self::with_delay(responses, Duration::ZERO)
        }

        fn with_delay(responses: Vec<(u16, &str)>, delay: Duration) -> Arc<Self> {
            let mut responses: Vec<HttpResponse> = responses
                .into_iter()
                .map(|(status, body)| HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: body.to_string(),
                })
                .collect();
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(request);
            let response = self.responses.lock().pop();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            response.ok_or_else(|| TransportError("no scripted response left".to_string()))
        }
    }

    fn client(transport: Arc<Scripted>) -> QueryClient {
        QueryClient::new(ApiClient::with_transport(
            ClientConfig::new("http://api.test"),
            transport,
        ))
    }

    const GEAR: &str = r#"{"id":1,"name":"gear"}"#;

    #[tokio::test]
    async fn string_and_sequence_keys_hit_the_same_entry() {
        let transport = Scripted::new(vec![(200, GEAR)]);
        let qc = client(transport.clone());
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        let first: QueryResult<Widget> = qc.query("users", "/users", options.clone()).await;
        let second: QueryResult<Widget> = qc.query(["users"], "/users", options).await;

        assert!(first.is_success());
        assert_eq!(first.data, second.data);
        assert_eq!(transport.calls(), 1);
        assert_eq!(qc.cache().len(), 1);
        assert!(qc.cache().snapshot(&CacheKey::from(vec!["users"])).is_some());
    }

    #[tokio::test]
    async fn queries_use_get_against_the_endpoint() {
        let transport = Scripted::new(vec![(200, GEAR)]);
        let qc = client(transport.clone());
        let options = QueryOptions::new().header("Authorization", "Bearer t");
        let _: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options).await;

        let seen = transport.seen.lock();
        assert_eq!(seen[0].method, HttpMethod::Get);
        assert_eq!(seen[0].url, "http://api.test/widgets/1");
        assert_eq!(seen[0].header("authorization"), Some("Bearer t"));
        assert!(seen[0].body.is_none());
    }

    #[tokio::test]
    async fn zero_stale_time_refetches() {
        let transport = Scripted::new(vec![(200, GEAR), (200, r#"{"id":1,"name":"cog"}"#)]);
        let qc = client(transport.clone());

        let first: QueryResult<Widget> = qc.query("w", "/widgets/1", QueryOptions::new()).await;
        let second: QueryResult<Widget> = qc.query("w", "/widgets/1", QueryOptions::new()).await;
        assert_eq!(first.data.unwrap().name, "gear");
        assert_eq!(second.data.unwrap().name, "cog");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_identical_queries_are_deduplicated() {
        let transport = Scripted::with_delay(vec![(200, GEAR)], Duration::from_millis(50));
        let qc = client(transport.clone());

        let (a, b) = tokio::join!(
            qc.query::<Widget>("w", "/widgets/1", QueryOptions::new()),
            qc.query::<Widget>("w", "/widgets/1", QueryOptions::new()),
        );
        assert_eq!(transport.calls(), 1);
        assert!(a.is_success() && b.is_success());
        assert_eq!(a.data, b.data);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_leak_stale_result() {
        let transport = Scripted::with_delay(vec![(200, "1"), (200, "2")], Duration::from_millis(50));
        let qc = client(transport.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            qc.query::<u32>("k", "/counter", QueryOptions::new()),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!qc.cache().is_fetching(&CacheKey::from("k")));
        assert_eq!(qc.cache().status(&CacheKey::from("k")), QueryStatus::Idle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let next: QueryResult<u32> = qc.query("k", "/counter", QueryOptions::new()).await;
        assert_eq!(next.data, Some(2));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn errors_surface_as_normalized_and_keep_old_data() {
        let transport = Scripted::new(vec![
            (200, GEAR),
            (404, r#"{"message":"not found","code":"NOT_FOUND","statusCode":404}"#),
        ]);
        let qc = client(transport);

        let _: QueryResult<Widget> = qc.query("w", "/widgets/1", QueryOptions::new()).await;
        let failed: QueryResult<Widget> = qc.query("w", "/widgets/1", QueryOptions::new()).await;

        assert!(failed.is_error());
        assert_eq!(failed.error, Some(ApiError::new("not found", "NOT_FOUND", 404)));
        assert_eq!(failed.data.as_ref().map(|w| w.id), Some(1));
        assert_eq!(
            failed.into_result().unwrap_err(),
            ApiError::new("not found", "NOT_FOUND", 404)
        );
    }

    #[tokio::test]
    async fn disabled_query_does_not_fetch() {
        let transport = Scripted::new(vec![]);
        let qc = client(transport.clone());

        let idle: QueryResult<Widget> =
            qc.query("w", "/widgets/1", QueryOptions::new().enabled(false)).await;
        assert_eq!(idle.status, QueryStatus::Idle);
        assert!(idle.data.is_none());

        qc.set_query_data(
            "w",
            &Widget {
                id: 9,
                name: "seeded".to_string(),
            },
        )
        .unwrap();
        let seeded: QueryResult<Widget> =
            qc.query("w", "/widgets/1", QueryOptions::new().enabled(false)).await;
        assert_eq!(seeded.data.unwrap().id, 9);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn invalidation_forces_refetch() {
        let transport = Scripted::new(vec![(200, GEAR), (200, r#"{"id":1,"name":"cog"}"#)]);
        let qc = client(transport.clone());
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        let _: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options.clone()).await;
        assert_eq!(qc.invalidate("widgets"), 1);
        let refreshed: QueryResult<Widget> = qc.query(["widgets", "1"], "/widgets/1", options).await;

        assert_eq!(refreshed.data.unwrap().name, "cog");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn payload_of_wrong_shape_is_parse_error() {
        let transport = Scripted::new(vec![(200, r#"{"unexpected":true}"#)]);
        let qc = client(transport);
        let result: QueryResult<Widget> = qc.query("w", "/widgets/1", QueryOptions::new()).await;
        assert!(result.is_error());
        assert_eq!(result.error.unwrap().code, crate::error::PARSE_ERROR);
    }
}
