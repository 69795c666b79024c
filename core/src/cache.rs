//! Keyed query cache with in-flight deduplication.
//!
//! # Design
//! Entries store the last successful payload as `serde_json::Value`, so one
//! cache serves queries of any type; decoding into the caller's `T` happens
//! on the way out. Concurrent fetches for the same key share a single
//! `Shared` future. Each in-flight fetch carries a generation number: only
//! the fetch currently registered for a key may write its outcome back, so
//! a result that lost a race with `invalidate` or `remove` is dropped
//! instead of overwriting newer state.
//!
//! Every caller waiting on a fetch holds a waiter guard. When the last
//! waiter is dropped before the fetch completes, the fetch is detached and
//! its eventual result discarded; the next query starts a new request.
//!
//! Entries are never evicted on their own. Long-lived caches that see many
//! distinct keys should call `prune` or `remove`.
//!
//! The mutex guards map access only and is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::key::CacheKey;

/// Lifecycle of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Never fetched, or disabled with nothing cached.
    #[default]
    Idle,
    /// First fetch in flight, no data yet.
    Loading,
    Success,
    Error,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub data: Option<Value>,
    pub error: Option<ApiError>,
    pub updated_at: Option<Instant>,
    pub status: QueryStatus,
}

#[derive(Debug, Clone)]
struct Fetched {
    value: Value,
    at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Fetched, ApiError>>>;

struct InFlight {
    generation: u64,
    shared: SharedFetch,
    waiters: usize,
}

/// Detaches the fetch when the last caller waiting on it goes away.
struct Waiter<'a> {
    cache: &'a QueryCache,
    key: &'a CacheKey,
    generation: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.cache.leave(self.key, self.generation);
    }
}

#[derive(Default)]
struct Entry {
    data: Option<Value>,
    updated_at: Option<Instant>,
    error: Option<ApiError>,
    invalidated: bool,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else if self.in_flight.is_some() {
            QueryStatus::Loading
        } else {
            QueryStatus::Idle
        }
    }

    fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            status: self.status(),
        }
    }

    fn is_fresh(&self, stale_time: Duration) -> bool {
        !self.invalidated
            && self.data.is_some()
            && self.updated_at.is_some_and(|at| at.elapsed() < stale_time)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    next_generation: u64,
}

/// Shared handle to the cache; clones see the same entries.
#[derive(Clone, Default)]
pub struct QueryCache {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache").field("entries", &self.len()).finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached data for `key` if it is younger than `stale_time` and not
    /// invalidated.
    pub fn fresh(&self, key: &CacheKey, stale_time: Duration) -> Option<CacheSnapshot> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(stale_time))
            .map(Entry::snapshot)
    }

    /// Runs `fetch` for `key`, or joins the fetch already in flight for it.
    ///
    /// On success the payload replaces the cached data; on failure previous
    /// data is kept and the error recorded. Every joiner gets the same
    /// outcome.
    pub async fn fetch_or_join<F>(&self, key: &CacheKey, fetch: F) -> CacheSnapshot
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, ApiError>>,
    {
        let (generation, shared) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let entry = inner.entries.entry(key.clone()).or_default();
            match entry.in_flight.as_mut() {
                Some(flight) => {
                    tracing::debug!(%key, "joining in-flight fetch");
                    flight.waiters += 1;
                    (flight.generation, flight.shared.clone())
                }
                None => {
                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    let shared = fetch()
                        .map(|result| {
                            result.map(|value| Fetched {
                                value,
                                at: Instant::now(),
                            })
                        })
                        .boxed()
                        .shared();
                    entry.in_flight = Some(InFlight {
                        generation,
                        shared: shared.clone(),
                        waiters: 1,
                    });
                    (generation, shared)
                }
            }
        };

        let _waiter = Waiter {
            cache: self,
            key,
            generation,
        };
        let outcome = shared.await;
        self.settle(key, generation, &outcome);

        match outcome {
            Ok(fetched) => CacheSnapshot {
                data: Some(fetched.value),
                error: None,
                updated_at: Some(fetched.at),
                status: QueryStatus::Success,
            },
            Err(error) => {
                let previous = self.snapshot(key).unwrap_or_default();
                CacheSnapshot {
                    data: previous.data,
                    error: Some(error),
                    updated_at: previous.updated_at,
                    status: QueryStatus::Error,
                }
            }
        }
    }

    fn settle(&self, key: &CacheKey, generation: u64, outcome: &Result<Fetched, ApiError>) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        if !entry.in_flight.as_ref().is_some_and(|flight| flight.generation == generation) {
            return;
        }
        entry.in_flight = None;
        match outcome {
            Ok(fetched) => {
                entry.data = Some(fetched.value.clone());
                entry.updated_at = Some(fetched.at);
                entry.error = None;
                entry.invalidated = false;
            }
            Err(error) => entry.error = Some(error.clone()),
        }
    }

    fn leave(&self, key: &CacheKey, generation: u64) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return;
        };
        let Some(flight) = entry.in_flight.as_mut().filter(|f| f.generation == generation) else {
            return;
        };
        flight.waiters -= 1;
        if flight.waiters == 0 {
            tracing::debug!(%key, "all callers dropped, detaching fetch");
            entry.in_flight = None;
        }
    }

    pub fn snapshot(&self, key: &CacheKey) -> Option<CacheSnapshot> {
        self.inner.lock().entries.get(key).map(Entry::snapshot)
    }

    pub fn status(&self, key: &CacheKey) -> QueryStatus {
        self.snapshot(key).map(|s| s.status).unwrap_or_default()
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    /// Marks every entry under `prefix` stale and detaches its in-flight
    /// fetch. Returns the number of entries marked.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        let mut inner = self.inner.lock();
        let mut marked = 0;
        for (key, entry) in inner.entries.iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                entry.in_flight = None;
                marked += 1;
            }
        }
        tracing::debug!(%prefix, marked, "invalidated queries");
        marked
    }

    /// Writes `data` as the current value for `key`, as if just fetched.
    pub fn set_data<T: Serialize + ?Sized>(&self, key: &CacheKey, data: &T) -> Result<(), ApiError> {
        let value = serde_json::to_value(data).map_err(ApiError::serialization)?;
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(key.clone()).or_default();
        entry.data = Some(value);
        entry.updated_at = Some(Instant::now());
        entry.error = None;
        entry.invalidated = false;
        Ok(())
    }

    /// Cached data for `key` decoded as `T`, regardless of staleness.
    pub fn get_data<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, ApiError> {
        let value = self
            .inner
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.data.clone());
        value.map(decode).transpose()
    }

    /// Drops entries with nothing in flight whose data is missing or older
    /// than `max_age`. Returns the number removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| {
            entry.in_flight.is_some()
                || (entry.data.is_some()
                    && entry.updated_at.is_some_and(|at| at.elapsed() < max_age))
        });
        before - inner.entries.len()
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a cached payload into the caller's type.
pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::parse(0, e))
}
