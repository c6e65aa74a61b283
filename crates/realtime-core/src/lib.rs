//! Core model of the long-polling event-queue protocol.
//!
//! This crate defines the event variants and their tag-driven decoder, the
//! narrow filter and registration options, the delivery cursor, the reconnect
//! state machine and backoff policy, and the error/channel types shared by
//! transport implementations.

/// Consumer delivery and status channels.
pub mod channel;
/// Delivery cursor tracking.
pub mod cursor;
/// Tag → variant decoding of raw event records.
pub mod decoder;
/// Queue error taxonomy and HTTP/server-code classification.
pub mod error;
/// Event type tags and typed event payloads.
pub mod events;
/// Narrow filters and their wire encodings.
pub mod narrow;
/// Registration options and live queue state.
pub mod queue;
/// Backoff policy used by the reconnect loop.
pub mod retry;
/// Reconnect loop state machine.
pub mod state_machine;
/// Loop states, status updates and tuning.
pub mod types;

pub use channel::{DeliveryError, EventSink, StatusStream};
pub use cursor::CursorTracker;
pub use decoder::{MalformedEventError, decode, decode_batch};
pub use error::{QueueError, QueueErrorCategory, classify_error_code, classify_http_status};
pub use events::{EventRecord, EventType, UnknownEvent};
pub use narrow::{Narrow, NarrowFilter, NarrowParseError, Operator};
pub use queue::{ClientCapability, EventQueue, QueueConfig, RegisteredQueue};
pub use retry::{Backoff, RetryPolicy};
pub use state_machine::ReconnectStateMachine;
pub use types::{
    DEFAULT_POLL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, LoopConfig, LoopState, LoopStatus,
};
