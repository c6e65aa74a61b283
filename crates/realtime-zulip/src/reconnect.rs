use realtime_core::{
    Backoff, EventQueue, EventRecord, EventSink, LoopConfig, LoopState, LoopStatus, QueueConfig,
    QueueError, QueueErrorCategory, ReconnectStateMachine, StatusStream, decode_batch,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{api::EventQueueApi, transport::Transport};

const STATUS_BUFFER: usize = 64;

/// Why a loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation token fired.
    Cancelled,
    /// The consumer dropped its event receiver.
    ConsumerClosed,
}

enum Step {
    Continue,
    Exit(LoopExit),
}

/// Register/poll/re-register loop for one queue.
pub struct EventLoop<T> {
    api: EventQueueApi<T>,
    queue_config: QueueConfig,
    config: LoopConfig,
    sink: EventSink,
    state_machine: ReconnectStateMachine,
    backoff: Backoff,
    queue: Option<EventQueue>,
    transient_poll_failures: u32,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(
        api: EventQueueApi<T>,
        queue_config: QueueConfig,
        config: LoopConfig,
        sink: EventSink,
    ) -> Self {
        let api = api.with_poll_timeout(config.poll_timeout);
        Self {
            api,
            queue_config,
            backoff: Backoff::new(config.retry),
            config,
            sink,
            state_machine: ReconnectStateMachine::default(),
            queue: None,
            transient_poll_failures: 0,
        }
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.state_machine.state()
    }

    /// Run until cancelled, the consumer goes away, or a fatal error.
    ///
    /// On every exit path the active queue is deleted (when configured) and
    /// a final [`LoopStatus::Stopped`] is emitted.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<LoopExit, QueueError> {
        let result = self.drive(&cancel).await;

        match &result {
            Ok(exit) => info!(?exit, "event loop stopped"),
            Err(err) => error!(error = %err, "event loop failed"),
        }
        self.shutdown(result.as_ref().err()).await;
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<LoopExit, QueueError> {
        self.transition(ReconnectStateMachine::start)?;

        loop {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }
            if self.sink.is_closed() {
                return Ok(LoopExit::ConsumerClosed);
            }

            let step = match self.state_machine.state() {
                LoopState::Registering => self.register_once(cancel).await?,
                LoopState::Polling => self.poll_once(cancel).await?,
                state => {
                    return Err(QueueError::new(
                        QueueErrorCategory::Internal,
                        "unexpected_loop_state",
                        format!("loop cannot make progress from {state:?}"),
                    ));
                }
            };

            if let Step::Exit(exit) = step {
                return Ok(exit);
            }
        }
    }

    async fn register_once(&mut self, cancel: &CancellationToken) -> Result<Step, QueueError> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(Step::Exit(LoopExit::Cancelled)),
            outcome = self.api.register(&self.queue_config) => outcome,
        };

        match outcome {
            Ok(registered) => {
                info!(
                    queue_id = %registered.queue_id,
                    last_event_id = registered.last_event_id,
                    "event queue registered"
                );
                self.queue = Some(EventQueue::new(&registered, &self.queue_config));
                self.backoff.reset();
                self.transient_poll_failures = 0;
                self.transition(ReconnectStateMachine::on_registered)?;
                self.sink.emit_status(LoopStatus::Registered {
                    queue_id: registered.queue_id,
                    last_event_id: registered.last_event_id,
                });
                Ok(Step::Continue)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.transition(ReconnectStateMachine::on_register_failed)?;
                self.back_off(&err, cancel).await
            }
        }
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<Step, QueueError> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(QueueError::new(
                QueueErrorCategory::Internal,
                "missing_queue",
                "polling without a registered queue",
            ));
        };
        let queue_id = queue.queue_id().to_owned();
        let last_event_id = queue.last_event_id();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(Step::Exit(LoopExit::Cancelled)),
            outcome = self.api.poll(&queue_id, last_event_id, false) => outcome,
        };

        match outcome {
            Ok(raw) => {
                self.state_machine.on_poll_succeeded()?;
                self.backoff.reset();
                self.transient_poll_failures = 0;
                self.deliver(&raw, cancel).await
            }
            Err(err) if err.is_queue_lost() => {
                warn!(%queue_id, error = %err, "event queue lost; re-registering");
                self.queue = None;
                self.sink.emit_status(LoopStatus::QueueLost { queue_id });
                self.transition(ReconnectStateMachine::on_queue_lost)?;
                Ok(Step::Continue)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.transient_poll_failures = self.transient_poll_failures.saturating_add(1);
                if self.transient_poll_failures >= self.config.max_transient_poll_failures {
                    warn!(
                        %queue_id,
                        failures = self.transient_poll_failures,
                        "too many poll failures; discarding queue"
                    );
                    self.discard_queue(cancel).await;
                }
                self.transition(ReconnectStateMachine::on_poll_failed)?;
                self.back_off(&err, cancel).await
            }
        }
    }

    async fn deliver(
        &mut self,
        raw: &[serde_json::Value],
        cancel: &CancellationToken,
    ) -> Result<Step, QueueError> {
        let batch = decode_batch(raw);
        let Some(queue) = self.queue.as_mut() else {
            return Ok(Step::Continue);
        };
        let previous = queue.last_event_id();
        let cursor = queue.advance(&batch);
        debug!(count = batch.len(), previous, cursor, "delivering batch");

        for event in batch {
            let delivered = tokio::select! {
                _ = cancel.cancelled() => return Ok(Step::Exit(LoopExit::Cancelled)),
                delivered = self.sink.deliver(event) => delivered,
            };
            if delivered.is_err() {
                return Ok(Step::Exit(LoopExit::ConsumerClosed));
            }
        }
        Ok(Step::Continue)
    }

    async fn back_off(
        &mut self,
        err: &QueueError,
        cancel: &CancellationToken,
    ) -> Result<Step, QueueError> {
        let delay = self.backoff.next_delay(err.retry_after_ms);
        let attempt = self.backoff.attempt();
        warn!(
            error = %err,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "request failed; backing off"
        );
        self.sink.emit_status(LoopStatus::BackingOff {
            delay_ms: delay.as_millis() as u64,
            attempt,
            error_code: err.code.clone(),
        });

        tokio::select! {
            _ = cancel.cancelled() => return Ok(Step::Exit(LoopExit::Cancelled)),
            _ = tokio::time::sleep(delay) => {}
        }

        let queue_valid = self.queue.is_some();
        self.transition(|machine| machine.on_backoff_elapsed(queue_valid))?;
        Ok(Step::Continue)
    }

    /// Best-effort delete of the current queue before re-registering.
    async fn discard_queue(&mut self, cancel: &CancellationToken) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = self.api.delete(queue.queue_id()) => {
                if let Err(err) = result {
                    debug!(queue_id = queue.queue_id(), error = %err, "discarded queue delete failed");
                }
            }
        }
    }

    async fn shutdown(&mut self, failure: Option<&QueueError>) {
        if let Some(status) = self.state_machine.on_stopped() {
            self.sink.emit_status(status);
        }

        if let Some(queue) = self.queue.take()
            && self.config.teardown_on_exit
        {
            match self.api.delete(queue.queue_id()).await {
                Ok(()) => debug!(queue_id = queue.queue_id(), "event queue deleted"),
                Err(err) => warn!(queue_id = queue.queue_id(), error = %err, "event queue teardown failed"),
            }
        }

        self.sink.emit_status(LoopStatus::Stopped {
            error_code: failure.map(|err| err.code.clone()),
        });
    }

    fn transition(
        &mut self,
        step: impl FnOnce(&mut ReconnectStateMachine) -> Result<LoopStatus, QueueError>,
    ) -> Result<(), QueueError> {
        let status = step(&mut self.state_machine)?;
        debug!(?status, "loop transition");
        self.sink.emit_status(status);
        Ok(())
    }
}

/// Handle to a spawned event loop.
pub struct EventLoopHandle {
    stop: CancellationToken,
    task: JoinHandle<Result<LoopExit, QueueError>>,
    status: broadcast::Sender<LoopStatus>,
}

impl EventLoopHandle {
    /// Subscribe to status updates emitted from now on.
    pub fn subscribe_status(&self) -> StatusStream {
        self.status.subscribe()
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Request the loop to stop. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the loop to finish.
    pub async fn join(self) -> Result<LoopExit, QueueError> {
        self.task.await.map_err(|err| {
            QueueError::new(
                QueueErrorCategory::Internal,
                "event_loop_join_error",
                err.to_string(),
            )
        })?
    }

    /// Stop the loop and wait for teardown to finish.
    pub async fn shutdown(self) -> Result<LoopExit, QueueError> {
        self.stop();
        self.join().await
    }
}

/// Spawn an event loop on the current runtime.
pub fn spawn_event_loop<T>(
    api: EventQueueApi<T>,
    queue_config: QueueConfig,
    config: LoopConfig,
) -> (EventLoopHandle, mpsc::Receiver<EventRecord>)
where
    T: Transport + 'static,
{
    let (sink, events) = EventSink::new(config.delivery_buffer, STATUS_BUFFER);
    let stop = CancellationToken::new();
    let status = sink.status_sender();
    let event_loop = EventLoop::new(api, queue_config, config, sink);

    let span = info_span!("event_loop", instance = %Uuid::new_v4());
    let task = tokio::spawn(event_loop.run(stop.child_token()).instrument(span));

    (EventLoopHandle { stop, task, status }, events)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use realtime_core::{RetryPolicy, error::BAD_EVENT_QUEUE_ID};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        api::{EVENTS_PATH, REGISTER_PATH},
        testing::{ScriptedTransport, error_response, success_response},
        transport::{ApiRequest, ApiResponse, HttpMethod},
    };

    fn register_reply(queue_id: &str, last_event_id: i64) -> ApiResponse {
        success_response(json!({"queue_id": queue_id, "last_event_id": last_event_id}))
    }

    fn events_reply(events: serde_json::Value) -> ApiResponse {
        success_response(json!({"events": events}))
    }

    fn network_error() -> QueueError {
        QueueError::new(QueueErrorCategory::Network, "connect_failed", "connection refused")
    }

    async fn next_request(requests: &mut UnboundedReceiver<ApiRequest>) -> ApiRequest {
        requests.recv().await.expect("transport should see a request")
    }

    fn assert_poll(request: &ApiRequest, queue_id: &str, last_event_id: i64) {
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.path, EVENTS_PATH);
        assert_eq!(request.get_param("queue_id"), Some(queue_id));
        assert_eq!(
            request.get_param("last_event_id"),
            Some(last_event_id.to_string().as_str())
        );
    }

    fn assert_register(request: &ApiRequest) {
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, REGISTER_PATH);
    }

    fn new_loop(
        transport: ScriptedTransport,
        config: LoopConfig,
    ) -> (
        EventLoop<ScriptedTransport>,
        mpsc::Receiver<EventRecord>,
        StatusStream,
    ) {
        let (sink, events) = EventSink::new(config.delivery_buffer, 256);
        let status = sink.subscribe_status();
        let event_loop = EventLoop::new(
            EventQueueApi::new(transport),
            QueueConfig::default(),
            config,
            sink,
        );
        (event_loop, events, status)
    }

    fn drain(status: &mut StatusStream) -> Vec<LoopStatus> {
        let mut seen = Vec::new();
        while let Ok(update) = status.try_recv() {
            seen.push(update);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_batch_and_polls_from_new_cursor() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 10));
        transport.reply(events_reply(json!([
            {
                "id": 31,
                "type": "message",
                "message": {
                    "id": 900,
                    "sender_id": 7,
                    "content": "hi",
                    "display_recipient": "general",
                    "subject": "greetings",
                    "timestamp": 1_700_000_000,
                    "type": "stream"
                },
                "flags": []
            },
            {"id": 32, "type": "heartbeat"}
        ])));
        transport.hang();

        let (handle, mut events) =
            spawn_event_loop(EventQueueApi::new(transport), QueueConfig::default(), LoopConfig::default());

        let first = events.recv().await.expect("message event");
        assert!(matches!(first, EventRecord::Message(_)));
        assert_eq!(first.wire_id(), Some(31));
        let second = events.recv().await.expect("heartbeat event");
        assert!(matches!(second, EventRecord::Heartbeat(_)));
        assert_eq!(second.wire_id(), Some(32));

        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 10);
        assert_poll(&next_request(&mut requests).await, "Q1", 32);

        let exit = handle.shutdown().await.expect("loop should stop cleanly");
        assert_eq!(exit, LoopExit::Cancelled);

        let teardown = next_request(&mut requests).await;
        assert_eq!(teardown.method, HttpMethod::Delete);
        assert_eq!(teardown.get_param("queue_id"), Some("Q1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_event_types_are_delivered_and_advance_cursor() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 0));
        transport.reply(events_reply(json!([
            {"id": 1, "type": "realm_playgrounds", "realm_playgrounds": []}
        ])));
        transport.hang();

        let (handle, mut events) =
            spawn_event_loop(EventQueueApi::new(transport), QueueConfig::default(), LoopConfig::default());

        let event = events.recv().await.expect("unknown event");
        assert!(event.is_unknown());
        assert_eq!(event.type_tag(), "realm_playgrounds");

        next_request(&mut requests).await;
        next_request(&mut requests).await;
        assert_poll(&next_request(&mut requests).await, "Q1", 1);

        handle.shutdown().await.expect("loop should stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn lost_queue_is_reregistered_without_backoff() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 5));
        transport.reply(error_response(400, BAD_EVENT_QUEUE_ID, "Bad event queue ID: Q1"));
        transport.reply(register_reply("Q2", 40));
        transport.reply(events_reply(json!([{"id": 41, "type": "heartbeat"}])));
        transport.hang();

        let (event_loop, mut events, mut status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        let event = events.recv().await.expect("heartbeat after re-register");
        assert_eq!(event.wire_id(), Some(41));

        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 5);
        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q2", 40);
        assert_poll(&next_request(&mut requests).await, "Q2", 41);

        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");

        let seen = drain(&mut status);
        assert!(seen.contains(&LoopStatus::QueueLost {
            queue_id: "Q1".into()
        }));
        assert!(seen.contains(&LoopStatus::Registered {
            queue_id: "Q2".into(),
            last_event_id: 40
        }));
        assert!(
            !seen
                .iter()
                .any(|update| matches!(update, LoopStatus::BackingOff { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_fatal() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(error_response(401, "UNAUTHORIZED", "Invalid API key"));

        let (event_loop, _events, mut status) = new_loop(transport, LoopConfig::default());
        let err = event_loop
            .run(CancellationToken::new())
            .await
            .expect_err("auth failure must end the loop");
        assert_eq!(err.category, QueueErrorCategory::Auth);

        assert_register(&next_request(&mut requests).await);
        assert!(requests.try_recv().is_err(), "no retry and no teardown");

        let seen = drain(&mut status);
        assert_eq!(
            seen.last(),
            Some(&LoopStatus::Stopped {
                error_code: Some("UNAUTHORIZED".into())
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn register_failures_back_off_exponentially_then_reset() {
        let (transport, _requests) = ScriptedTransport::new();
        for _ in 0..7 {
            transport.fail(network_error());
        }
        transport.reply(register_reply("Q1", 0));
        transport.fail(network_error());
        transport.hang();

        let (event_loop, _events, mut status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        let mut delays = Vec::new();
        while delays.len() < 8 {
            if let LoopStatus::BackingOff { delay_ms, .. } =
                status.recv().await.expect("status stream open")
            {
                delays.push(delay_ms);
            }
        }
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 1_000]
        );

        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_raises_delay() {
        let (transport, _requests) = ScriptedTransport::new();
        transport.fail(
            QueueError::new(QueueErrorCategory::RateLimited, "RATE_LIMIT_HIT", "slow down")
                .with_retry_after(Duration::from_secs(7)),
        );
        transport.hang();

        let (event_loop, _events, mut status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        loop {
            if let LoopStatus::BackingOff {
                delay_ms,
                attempt,
                error_code,
            } = status.recv().await.expect("status stream open")
            {
                assert_eq!(delay_ms, 7_000);
                assert_eq!(attempt, 1);
                assert_eq!(error_code, "RATE_LIMIT_HIT");
                break;
            }
        }

        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_rate_limit_hint_is_capped() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(ApiResponse::from_body(
            429,
            br#"{"result":"error","msg":"slow down","code":"RATE_LIMIT_HIT","retry-after":1e20}"#,
        ));
        transport.reply(ApiResponse::from_body(200, br#"{"msg":""}"#));
        transport.reply(register_reply("Q1", 0));
        transport.hang();

        let (event_loop, _events, mut status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        let mut delays = Vec::new();
        while delays.len() < 2 {
            if let LoopStatus::BackingOff { delay_ms, .. } =
                status.recv().await.expect("status stream open")
            {
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![30_000, 2_000]);

        assert_register(&next_request(&mut requests).await);
        assert_register(&next_request(&mut requests).await);
        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 0);

        cancel.cancel();
        let exit = task.await.expect("loop task must not panic");
        assert_eq!(exit.expect("loop should stop cleanly"), LoopExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failure_resumes_same_queue() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 5));
        transport.fail(network_error());
        transport.reply(events_reply(json!([{"id": 6, "type": "heartbeat"}])));
        transport.hang();

        let (event_loop, mut events, _status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        assert_eq!(events.recv().await.and_then(|ev| ev.wire_id()), Some(6));
        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 5);
        assert_poll(&next_request(&mut requests).await, "Q1", 5);
        assert_poll(&next_request(&mut requests).await, "Q1", 6);

        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_poll_failures_discard_and_reregister() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 5));
        transport.fail(network_error());
        transport.fail(network_error());
        transport.reply(success_response(json!({})));
        transport.reply(register_reply("Q2", 9));
        transport.hang();

        let config = LoopConfig {
            max_transient_poll_failures: 2,
            ..LoopConfig::default()
        };
        let (event_loop, _events, _status) = new_loop(transport, config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 5);
        assert_poll(&next_request(&mut requests).await, "Q1", 5);
        let discard = next_request(&mut requests).await;
        assert_eq!(discard.method, HttpMethod::Delete);
        assert_eq!(discard.get_param("queue_id"), Some("Q1"));
        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q2", 9);

        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pending_poll_and_tears_down() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 3));
        transport.hang();

        let (event_loop, _events, mut status) = new_loop(transport, LoopConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        assert_register(&next_request(&mut requests).await);
        assert_poll(&next_request(&mut requests).await, "Q1", 3);

        cancel.cancel();
        let exit = task.await.expect("join").expect("loop should stop cleanly");
        assert_eq!(exit, LoopExit::Cancelled);

        let teardown = next_request(&mut requests).await;
        assert_eq!(teardown.method, HttpMethod::Delete);
        assert_eq!(teardown.get_param("queue_id"), Some("Q1"));

        let seen = drain(&mut status);
        assert!(seen.contains(&LoopStatus::StateChanged {
            state: LoopState::Disconnected
        }));
        assert_eq!(seen.last(), Some(&LoopStatus::Stopped { error_code: None }));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_can_be_disabled() {
        let (transport, mut requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 3));
        transport.hang();

        let config = LoopConfig {
            teardown_on_exit: false,
            ..LoopConfig::default()
        };
        let (event_loop, _events, _status) = new_loop(transport, config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        next_request(&mut requests).await;
        next_request(&mut requests).await;
        cancel.cancel();
        task.await.expect("join").expect("loop should stop cleanly");

        assert!(requests.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_consumer_stops_loop() {
        let (transport, _requests) = ScriptedTransport::new();
        transport.reply(register_reply("Q1", 0));
        transport.reply(events_reply(json!([{"id": 1, "type": "heartbeat"}])));
        transport.hang();

        let (event_loop, events, _status) = new_loop(transport, LoopConfig::default());
        drop(events);

        let exit = event_loop
            .run(CancellationToken::new())
            .await
            .expect("loop should stop cleanly");
        assert_eq!(exit, LoopExit::ConsumerClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_wait_is_cancellable() {
        let config = LoopConfig {
            retry: RetryPolicy::new(60_000, 60_000),
            ..LoopConfig::default()
        };
        let (transport, _requests) = ScriptedTransport::new();
        transport.fail(network_error());

        let (event_loop, _events, mut status) = new_loop(transport, config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(cancel.clone()));

        loop {
            if matches!(
                status.recv().await.expect("status stream open"),
                LoopStatus::BackingOff { .. }
            ) {
                break;
            }
        }
        cancel.cancel();
        let exit = task.await.expect("join").expect("loop should stop cleanly");
        assert_eq!(exit, LoopExit::Cancelled);
    }
}
