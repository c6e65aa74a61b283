mod config;
mod logging;

use std::process::ExitCode;

use config::TailConfig;
use realtime_core::{EventRecord, LoopStatus};
use realtime_zulip::{EventQueueApi, HttpTransport, LoopExit, TransportConfig, spawn_event_loop};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match TailConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let transport = match TransportConfig::new(config.site.as_str(), &config.email, &config.api_key)
        .and_then(HttpTransport::new)
    {
        Ok(transport) => transport,
        Err(err) => {
            error!(error = %err, "failed to build HTTP transport");
            return ExitCode::FAILURE;
        }
    };

    info!(
        site = %config.site,
        email = %config.email,
        event_types = config.event_types.len(),
        narrow = %config.narrow,
        "tailing event queue"
    );
    let (handle, mut events) = spawn_event_loop(
        EventQueueApi::new(transport),
        config.queue_config(),
        config.loop_config(),
    );
    let mut status = handle.subscribe_status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; stopping");
                handle.stop();
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            update = status.recv() => match update {
                Ok(update) => log_status(&update),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "status updates skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    match handle.join().await {
        Ok(LoopExit::Cancelled) => ExitCode::SUCCESS,
        Ok(LoopExit::ConsumerClosed) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "event loop failed");
            ExitCode::FAILURE
        }
    }
}

fn log_event(event: &EventRecord) {
    match event {
        EventRecord::Message(message) => info!(
            id = message.id,
            sender = %message.message.sender_full_name,
            recipient = ?message.message.display_recipient,
            topic = %message.message.subject,
            content = %message.message.content,
            "message"
        ),
        EventRecord::Heartbeat(heartbeat) => debug!(id = heartbeat.id, "heartbeat"),
        EventRecord::Unknown(unknown) => warn!(
            id = ?unknown.id,
            type_tag = ?unknown.type_tag,
            decode_error = ?unknown.decode_error,
            "unrecognized event"
        ),
        other => info!(
            id = ?other.wire_id(),
            event_type = other.type_tag(),
            op = ?other.op(),
            "event"
        ),
    }
}

fn log_status(update: &LoopStatus) {
    match update {
        LoopStatus::BackingOff {
            delay_ms,
            attempt,
            error_code,
        } => warn!(delay_ms, attempt, %error_code, "backing off"),
        LoopStatus::QueueLost { queue_id } => warn!(%queue_id, "queue lost"),
        other => debug!(status = ?other, "loop status"),
    }
}
