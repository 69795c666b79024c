//! Typed REST client with a keyed query cache.
//!
//! # Overview
//! `ApiClient` turns an endpoint and options into an `HttpRequest`, runs it
//! through a `Transport`, and normalizes the outcome into `T` or an
//! [`ApiError`]. `QueryClient` layers cached, deduplicated reads (`query`)
//! and invalidating writes (`mutation`) on top.
//!
//! # Design
//! - `ApiClient` is stateless: it holds only its `ClientConfig` and a shared
//!   transport. Request building and response parsing are separate public
//!   steps, so a caller can also do the I/O itself.
//! - Every failure, including transport and parse failures, is an
//!   `ApiError { message, code, status_code }`.
//! - The base URL comes from an explicit `ClientConfig`; only
//!   `ClientConfig::from_env` reads the environment.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod key;
pub mod mutation;
pub mod query;
pub mod transport;

pub use cache::{CacheSnapshot, QueryCache, QueryStatus};
pub use client::{ApiClient, RequestOptions};
pub use config::ClientConfig;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use key::CacheKey;
pub use mutation::{Mutation, MutationMethod, MutationOptions, MutationStatus};
pub use query::{QueryClient, QueryOptions, QueryResult};
pub use transport::{Transport, TransportError, UreqTransport};
