use crate::{
    error::QueueError,
    types::{LoopState, LoopStatus},
};

/// Reconnect loop lifecycle.
///
/// ```text
/// Disconnected --start--> Registering --ok--> Polling --ok--> Polling
///                            |                  |  \--lost--> Registering
///                            \--fail--+         \--fail--+
///                                     v                  v
///                                  BackingOff --elapsed--> Registering | Polling
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectStateMachine {
    state: LoopState,
}

impl Default for ReconnectStateMachine {
    fn default() -> Self {
        Self {
            state: LoopState::Disconnected,
        }
    }
}

impl ReconnectStateMachine {
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn start(&mut self) -> Result<LoopStatus, QueueError> {
        self.transition_from_state(LoopState::Disconnected, LoopState::Registering, "start")
    }

    pub fn on_registered(&mut self) -> Result<LoopStatus, QueueError> {
        self.transition_from_state(LoopState::Registering, LoopState::Polling, "on_registered")
    }

    pub fn on_register_failed(&mut self) -> Result<LoopStatus, QueueError> {
        self.transition_from_state(
            LoopState::Registering,
            LoopState::BackingOff,
            "on_register_failed",
        )
    }

    /// A successful poll keeps the loop in `Polling`; no status is emitted.
    pub fn on_poll_succeeded(&mut self) -> Result<(), QueueError> {
        if self.state != LoopState::Polling {
            return Err(QueueError::invalid_state(self.state, "on_poll_succeeded"));
        }
        Ok(())
    }

    pub fn on_queue_lost(&mut self) -> Result<LoopStatus, QueueError> {
        self.transition_from_state(LoopState::Polling, LoopState::Registering, "on_queue_lost")
    }

    pub fn on_poll_failed(&mut self) -> Result<LoopStatus, QueueError> {
        self.transition_from_state(LoopState::Polling, LoopState::BackingOff, "on_poll_failed")
    }

    pub fn on_backoff_elapsed(&mut self, queue_valid: bool) -> Result<LoopStatus, QueueError> {
        let next = if queue_valid {
            LoopState::Polling
        } else {
            LoopState::Registering
        };
        self.transition_from_state(LoopState::BackingOff, next, "on_backoff_elapsed")
    }

    /// Return to `Disconnected` from any state (cancellation or fatal error).
    pub fn on_stopped(&mut self) -> Option<LoopStatus> {
        if self.state == LoopState::Disconnected {
            return None;
        }
        self.state = LoopState::Disconnected;
        Some(LoopStatus::StateChanged {
            state: LoopState::Disconnected,
        })
    }

    fn transition_from_state(
        &mut self,
        expected: LoopState,
        next: LoopState,
        action: &str,
    ) -> Result<LoopStatus, QueueError> {
        if self.state != expected {
            return Err(QueueError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(LoopStatus::StateChanged { state: next })
    }
}
