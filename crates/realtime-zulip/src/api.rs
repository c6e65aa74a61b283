use std::time::Duration;

use realtime_core::{
    DEFAULT_POLL_TIMEOUT, QueueConfig, QueueError, QueueErrorCategory, RegisteredQueue,
};
use serde_json::Value;
use tracing::debug;

use crate::transport::{ApiRequest, HttpMethod, Transport};

pub const REGISTER_PATH: &str = "/api/v1/register";
pub const EVENTS_PATH: &str = "/api/v1/events";

/// Register, poll and delete calls against one server.
#[derive(Debug, Clone)]
pub struct EventQueueApi<T> {
    transport: T,
    poll_timeout: Duration,
}

impl<T: Transport> EventQueueApi<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Create a server-side queue.
    pub async fn register(&self, config: &QueueConfig) -> Result<RegisteredQueue, QueueError> {
        let request = ApiRequest::new(HttpMethod::Post, REGISTER_PATH).params(config.to_form_params()?);
        let fields = self.transport.execute(request).await?.into_result()?;

        let registered: RegisteredQueue =
            serde_json::from_value(Value::Object(fields)).map_err(|err| {
                QueueError::new(
                    QueueErrorCategory::Serialization,
                    "invalid_register_response",
                    err.to_string(),
                )
            })?;
        debug!(
            queue_id = %registered.queue_id,
            last_event_id = registered.last_event_id,
            feature_level = ?registered.zulip_feature_level,
            "queue registered"
        );
        Ok(registered)
    }

    /// Fetch events newer than `last_event_id`. Blocks server-side until one
    /// exists unless `dont_block` is set.
    pub async fn poll(
        &self,
        queue_id: &str,
        last_event_id: i64,
        dont_block: bool,
    ) -> Result<Vec<Value>, QueueError> {
        let request = ApiRequest::new(HttpMethod::Get, EVENTS_PATH)
            .param("queue_id", queue_id)
            .param("last_event_id", last_event_id)
            .param("dont_block", dont_block)
            .timeout(self.poll_timeout);
        let mut fields = self.transport.execute(request).await?.into_result()?;

        match fields.remove("events") {
            Some(Value::Array(events)) => {
                debug!(queue_id, last_event_id, count = events.len(), "poll returned events");
                Ok(events)
            }
            _ => Err(QueueError::new(
                QueueErrorCategory::Serialization,
                "missing_events",
                "poll response has no events array",
            )),
        }
    }

    /// Delete a queue. A queue the server no longer knows counts as deleted.
    pub async fn delete(&self, queue_id: &str) -> Result<(), QueueError> {
        let request = ApiRequest::new(HttpMethod::Delete, EVENTS_PATH).param("queue_id", queue_id);
        match self.transport.execute(request).await?.into_result() {
            Ok(_) => Ok(()),
            Err(err) if err.is_queue_lost() => {
                debug!(queue_id, "queue already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
