use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    cursor::CursorTracker,
    error::{QueueError, QueueErrorCategory},
    events::{EventRecord, EventType},
    narrow::NarrowFilter,
};

/// Optional client behaviors declared at registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientCapability {
    NotificationSettingsNull,
    BulkMessageDeletion,
    UserAvatarUrlFieldOptional,
    StreamTypingNotifications,
    UserSettingsObject,
    LinkifierUrlTemplate,
    UserListIncomplete,
    IncludeDeactivatedGroups,
    ArchivedChannels,
}

/// Registration options. `None`/empty fields are left out of the request so
/// the server applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Deliver rendered HTML instead of raw Markdown.
    pub apply_markdown: Option<bool>,
    /// Let the client compute gravatar URLs itself.
    pub client_gravatar: Option<bool>,
    /// Include subscriber lists in stream data.
    pub include_subscribers: Option<bool>,
    /// Use the compact user-id keyed presence format.
    pub slim_presence: Option<bool>,
    /// Limit initial presence data to users active in the last N days.
    pub presence_history_limit_days: Option<u32>,
    /// Event types to subscribe to; empty means all.
    pub event_types: Vec<EventType>,
    /// Receive messages from every public stream, subscribed or not.
    pub all_public_streams: Option<bool>,
    /// Declared client capabilities.
    pub client_capabilities: BTreeMap<ClientCapability, bool>,
    /// Initial-state data to fetch; empty means the same as `event_types`.
    pub fetch_event_types: Vec<EventType>,
    /// Only deliver message events matching this filter.
    pub narrow: NarrowFilter,
}

impl QueueConfig {
    pub fn with_event_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = event_types.into_iter().collect();
        self
    }

    pub fn with_capability(mut self, capability: ClientCapability) -> Self {
        self.client_capabilities.insert(capability, true);
        self
    }

    pub fn with_narrow(mut self, narrow: NarrowFilter) -> Self {
        self.narrow = narrow;
        self
    }

    /// Form fields for the register call.
    pub fn to_form_params(&self) -> Result<Vec<(&'static str, String)>, QueueError> {
        let mut params = Vec::new();

        push_bool(&mut params, "apply_markdown", self.apply_markdown);
        push_bool(&mut params, "client_gravatar", self.client_gravatar);
        push_bool(&mut params, "include_subscribers", self.include_subscribers);
        push_bool(&mut params, "slim_presence", self.slim_presence);
        if let Some(days) = self.presence_history_limit_days {
            params.push(("presence_history_limit_days", days.to_string()));
        }
        if !self.event_types.is_empty() {
            params.push(("event_types", encode_json("event_types", &self.event_types)?));
        }
        push_bool(&mut params, "all_public_streams", self.all_public_streams);
        if !self.client_capabilities.is_empty() {
            params.push((
                "client_capabilities",
                encode_json("client_capabilities", &self.client_capabilities)?,
            ));
        }
        if !self.fetch_event_types.is_empty() {
            params.push((
                "fetch_event_types",
                encode_json("fetch_event_types", &self.fetch_event_types)?,
            ));
        }
        if !self.narrow.is_empty() {
            let narrow = self
                .narrow
                .to_registration_json()
                .map_err(|err| encode_error("narrow", err))?;
            params.push(("narrow", narrow));
        }

        Ok(params)
    }
}

fn push_bool(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<bool>) {
    if let Some(value) = value {
        params.push((key, value.to_string()));
    }
}

fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<String, QueueError> {
    serde_json::to_string(value).map_err(|err| encode_error(key, err))
}

fn encode_error(key: &str, err: serde_json::Error) -> QueueError {
    QueueError::new(
        QueueErrorCategory::Validation,
        "invalid_register_param",
        format!("cannot encode '{key}': {err}"),
    )
}

/// Successful register response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredQueue {
    pub queue_id: String,
    pub last_event_id: i64,
    #[serde(default)]
    pub zulip_feature_level: Option<i64>,
    #[serde(default)]
    pub zulip_version: Option<String>,
    #[serde(default)]
    pub zulip_merge_base: Option<String>,
    #[serde(default)]
    pub max_message_id: Option<i64>,
}

/// A live server-side queue as seen by its owning loop.
#[derive(Debug, Clone)]
pub struct EventQueue {
    queue_id: String,
    cursor: CursorTracker,
    subscribed_event_types: Vec<EventType>,
    narrow: NarrowFilter,
    capabilities: BTreeMap<ClientCapability, bool>,
    created_at_ms: u64,
}

impl EventQueue {
    pub fn new(registered: &RegisteredQueue, config: &QueueConfig) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);

        Self {
            queue_id: registered.queue_id.clone(),
            cursor: CursorTracker::new(registered.last_event_id),
            subscribed_event_types: config.event_types.clone(),
            narrow: config.narrow.clone(),
            capabilities: config.client_capabilities.clone(),
            created_at_ms,
        }
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn last_event_id(&self) -> i64 {
        self.cursor.current()
    }

    pub fn subscribed_event_types(&self) -> &[EventType] {
        &self.subscribed_event_types
    }

    pub fn narrow(&self) -> &NarrowFilter {
        &self.narrow
    }

    pub fn capabilities(&self) -> &BTreeMap<ClientCapability, bool> {
        &self.capabilities
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Move the cursor past a delivered batch.
    pub fn advance(&mut self, batch: &[EventRecord]) -> i64 {
        self.cursor.advance(batch)
    }
}
