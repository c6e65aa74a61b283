//! Zulip-style HTTP client for the long-polling event queue.
//!
//! [`EventQueueApi`] wraps the register/poll/delete calls over a pluggable
//! [`Transport`]; [`spawn_event_loop`] runs the reconnecting poll loop and
//! hands decoded events to the consumer over a bounded channel.

pub mod api;
pub mod reconnect;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{EVENTS_PATH, EventQueueApi, REGISTER_PATH};
pub use reconnect::{EventLoop, EventLoopHandle, LoopExit, spawn_event_loop};
pub use transport::{
    ApiRequest, ApiResponse, HttpMethod, HttpTransport, Transport, TransportConfig,
    classify_response,
};
