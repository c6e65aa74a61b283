use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{events::EventRecord, types::LoopStatus};

/// Broadcast status stream type used by loop observers.
pub type StatusStream = broadcast::Receiver<LoopStatus>;

/// Errors returned by event delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The consumer dropped its event receiver.
    #[error("event consumer is closed")]
    ConsumerClosed,
}

/// Delivery side of an event loop: a bounded event channel towards the
/// consumer plus a status broadcast for observers.
#[derive(Clone, Debug)]
pub struct EventSink {
    event_tx: mpsc::Sender<EventRecord>,
    status_tx: broadcast::Sender<LoopStatus>,
}

impl EventSink {
    /// Create a sink and return it with the consumer's event receiver.
    pub fn new(event_buffer: usize, status_buffer: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let (status_tx, _) = broadcast::channel(status_buffer.max(1));

        (
            Self {
                event_tx,
                status_tx,
            },
            event_rx,
        )
    }

    /// Subscribe to loop status updates.
    pub fn subscribe_status(&self) -> StatusStream {
        self.status_tx.subscribe()
    }

    /// Deliver one event, waiting for buffer space when the consumer lags.
    pub async fn deliver(&self, event: EventRecord) -> Result<(), DeliveryError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| DeliveryError::ConsumerClosed)
    }

    /// Status sender for observers that must outlive the event channel.
    pub fn status_sender(&self) -> broadcast::Sender<LoopStatus> {
        self.status_tx.clone()
    }

    /// Whether the consumer dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }

    /// Emit a status update to all observers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit_status(&self, status: LoopStatus) {
        let _ = self.status_tx.send(status);
    }
}
