//! The normalized error returned by every failing call.
//!
//! # Design
//! A single struct instead of an enum: servers already speak
//! `{message, code, statusCode}`, and callers match on `code` and
//! `status_code` rather than on Rust variants. Locally produced failures
//! (transport, parse, serialization) use reserved codes and a status of `0`
//! when no HTTP status applies. `statusCode` is kept as the integer the
//! server sent, even when it is not a valid HTTP status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used when an error response carries no usable body.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const SERIALIZATION_ERROR: &str = "SERIALIZATION_ERROR";

/// Uniform error shape for all failure paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (code {code}, status {status_code})")]
pub struct ApiError {
    pub message: String,
    pub code: String,
    #[serde(rename = "statusCode")]
    pub status_code: i64,
}

impl ApiError {
    pub fn new(message: impl Into<String>, code: impl Into<String>, status_code: i64) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            status_code,
        }
    }

    /// Synthesized error for a non-2xx response whose body is not a
    /// normalized error.
    pub fn unexpected(status: u16) -> Self {
        Self::new(UNEXPECTED_ERROR_MESSAGE, status.to_string(), status.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message, NETWORK_ERROR, 0)
    }

    pub fn parse(status: u16, detail: impl std::fmt::Display) -> Self {
        Self::new(format!("failed to parse response body: {detail}"), PARSE_ERROR, status.into())
    }

    pub fn serialization(detail: impl std::fmt::Display) -> Self {
        Self::new(format!("failed to serialize request body: {detail}"), SERIALIZATION_ERROR, 0)
    }

    pub fn is_network(&self) -> bool {
        self.code == NETWORK_ERROR
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }
}
