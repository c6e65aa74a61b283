use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Timeout used for ordinary request/response calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout used for the long-poll call; the server holds it open until an
/// event exists or its own heartbeat fires.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_MAX_TRANSIENT_POLL_FAILURES: u32 = 5;
const DEFAULT_DELIVERY_BUFFER: usize = 256;

/// Reconnect loop state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoopState {
    /// No queue, nothing in flight.
    Disconnected,
    /// A register call is in flight.
    Registering,
    /// A queue is held and polled repeatedly.
    Polling,
    /// Waiting out a backoff delay after a failure.
    BackingOff,
}

/// Status updates broadcast by a running event loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoopStatus {
    /// Loop state transition.
    StateChanged {
        /// New loop state.
        state: LoopState,
    },
    /// A queue was registered.
    Registered {
        /// Server-assigned queue id.
        queue_id: String,
        /// Initial cursor.
        last_event_id: i64,
    },
    /// The server no longer knows the queue; it will be re-registered.
    QueueLost {
        /// The discarded queue id.
        queue_id: String,
    },
    /// A failure is being waited out.
    BackingOff {
        /// Delay before the next attempt.
        delay_ms: u64,
        /// Consecutive failures so far, starting at 1.
        attempt: u32,
        /// Stable error code of the failure.
        error_code: String,
    },
    /// The loop exited.
    Stopped {
        /// Error code when the loop exited on a fatal error.
        error_code: Option<String>,
    },
}

/// Runtime tuning for one event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Backoff applied between failed attempts.
    pub retry: RetryPolicy,
    /// Timeout for each long-poll request.
    pub poll_timeout: Duration,
    /// Consecutive transient poll failures after which the queue is treated
    /// as lost and re-registered.
    pub max_transient_poll_failures: u32,
    /// Capacity of the consumer delivery channel.
    pub delivery_buffer: usize,
    /// Delete the active queue when the loop exits.
    pub teardown_on_exit: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_transient_poll_failures: DEFAULT_MAX_TRANSIENT_POLL_FAILURES,
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
            teardown_on_exit: true,
        }
    }
}
