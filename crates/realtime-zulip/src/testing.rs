use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use realtime_core::{QueueError, error::RATE_LIMIT_HIT};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::transport::{ApiRequest, ApiResponse, RESULT_ERROR, RESULT_SUCCESS, Transport};

enum Step {
    Reply(Result<ApiResponse, QueueError>),
    Hang,
}

/// Transport that replays scripted replies in order and reports every
/// request it receives. Once the script runs out it answers with an empty
/// success envelope.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    requests: mpsc::UnboundedSender<ApiRequest>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApiRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                requests,
            },
            rx,
        )
    }

    pub fn reply(&self, response: ApiResponse) {
        self.push(Step::Reply(Ok(response)));
    }

    pub fn fail(&self, err: QueueError) {
        self.push(Step::Reply(Err(err)));
    }

    /// The next request never completes; only cancellation releases it.
    pub fn hang(&self) {
        self.push(Step::Hang);
    }

    fn push(&self, step: Step) {
        self.script.lock().expect("script lock").push_back(step);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, QueueError> {
        let _ = self.requests.send(request);
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(success_response(json!({}))),
        }
    }
}

/// Canned success envelope with `fields` merged in.
pub fn success_response(fields: Value) -> ApiResponse {
    let mut map = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("result".into(), Value::String(RESULT_SUCCESS.into()));
    map.entry("msg").or_insert_with(|| Value::String(String::new()));
    ApiResponse::from_fields(200, map)
}

/// Canned error envelope.
pub fn error_response(http_status: u16, code: &str, msg: &str) -> ApiResponse {
    let mut map = Map::new();
    map.insert("result".into(), Value::String(RESULT_ERROR.into()));
    map.insert("msg".into(), Value::String(msg.into()));
    map.insert("code".into(), Value::String(code.into()));
    if code == RATE_LIMIT_HIT {
        map.insert("retry-after".into(), Value::from(1.0));
    }
    ApiResponse::from_fields(http_status, map)
}
