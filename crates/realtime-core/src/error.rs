use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::LoopState;

/// Server error code reported when a queue id is unknown or has expired.
pub const BAD_EVENT_QUEUE_ID: &str = "BAD_EVENT_QUEUE_ID";
/// Server error code reported when the client exceeded its rate limit.
pub const RATE_LIMIT_HIT: &str = "RATE_LIMIT_HIT";
/// Server error code reported for missing or invalid credentials.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";

/// Broad error category used to drive the reconnect loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueErrorCategory {
    /// Connection, timeout or server-side (5xx) failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// Response body could not be decoded.
    Serialization,
    /// Authentication/authorization failure.
    Auth,
    /// Request rejected as invalid (bad registration config, bad parameters).
    Validation,
    /// The server no longer knows the queue id.
    QueueLost,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload returned by queue operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct QueueError {
    /// High-level error category.
    pub category: QueueErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl QueueError {
    /// Construct a new queue error.
    pub fn new(
        category: QueueErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: LoopState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            QueueErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while event loop is in state {current:?}"),
        )
    }

    /// Whether the failure is expected to heal by waiting and retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            QueueErrorCategory::Network
                | QueueErrorCategory::RateLimited
                | QueueErrorCategory::Serialization
        )
    }

    /// Whether the server reported that the queue is gone.
    pub fn is_queue_lost(&self) -> bool {
        self.category == QueueErrorCategory::QueueLost
    }

    /// Whether retrying with the same configuration cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category,
            QueueErrorCategory::Auth | QueueErrorCategory::Validation | QueueErrorCategory::Internal
        )
    }
}

/// Map HTTP status codes to queue error categories.
pub fn classify_http_status(status: u16) -> QueueErrorCategory {
    match status {
        401 | 403 => QueueErrorCategory::Auth,
        408 | 504 => QueueErrorCategory::Network,
        429 => QueueErrorCategory::RateLimited,
        400..=499 => QueueErrorCategory::Validation,
        500..=599 => QueueErrorCategory::Network,
        _ => QueueErrorCategory::Internal,
    }
}

/// Classify an error response using the server error code first and the HTTP
/// status as fallback.
pub fn classify_error_code(code: &str, http_status: u16) -> QueueErrorCategory {
    match code {
        BAD_EVENT_QUEUE_ID => QueueErrorCategory::QueueLost,
        RATE_LIMIT_HIT => QueueErrorCategory::RateLimited,
        UNAUTHORIZED => QueueErrorCategory::Auth,
        _ => classify_http_status(http_status),
    }
}
