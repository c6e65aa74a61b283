//! Tag-driven decoding of raw event records into [`EventRecord`] variants.
//!
//! Every registered tag maps to exactly one parse function. Records with an
//! unregistered tag decode to [`EventRecord::Unknown`], keeping all of their
//! fields, so new server-side event kinds never break a batch.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::events::{
    AlertWordsEvent, AttachmentEvent, CustomProfileFieldsEvent, DeleteMessageEvent, EventRecord,
    EventType, HeartbeatEvent, MessageEvent, PresenceEvent, RealmEmojiEvent, RealmUserEvent,
    SubmessageEvent, TypingEvent, UnknownEvent, UpdateMessageEvent, UserStatusEvent,
    raw_event_id,
};

/// Parse function registered for one event tag.
pub type DecodeFn = fn(&Value) -> Result<EventRecord, serde_json::Error>;

static REGISTRY: &[(EventType, DecodeFn)] = &[
    (EventType::AlertWords, typed::<AlertWordsEvent>),
    (EventType::Attachment, typed::<AttachmentEvent>),
    (
        EventType::CustomProfileFields,
        typed::<CustomProfileFieldsEvent>,
    ),
    (EventType::DeleteMessage, typed::<DeleteMessageEvent>),
    (EventType::Heartbeat, typed::<HeartbeatEvent>),
    (EventType::Message, typed::<MessageEvent>),
    (EventType::Presence, typed::<PresenceEvent>),
    (EventType::RealmEmoji, typed::<RealmEmojiEvent>),
    (EventType::RealmUser, typed::<RealmUserEvent>),
    (EventType::Submessage, typed::<SubmessageEvent>),
    (EventType::Typing, typed::<TypingEvent>),
    (EventType::UpdateMessage, typed::<UpdateMessageEvent>),
    (EventType::UserStatus, typed::<UserStatusEvent>),
];

fn typed<T>(raw: &Value) -> Result<EventRecord, serde_json::Error>
where
    T: DeserializeOwned + Into<EventRecord>,
{
    T::deserialize(raw).map(Into::into)
}

/// The static tag → parse function table.
pub fn registry() -> &'static [(EventType, DecodeFn)] {
    REGISTRY
}

/// Parse function for a wire tag, if one is registered.
pub fn lookup(tag: &str) -> Option<DecodeFn> {
    REGISTRY
        .iter()
        .find(|(ty, _)| ty.as_str() == tag)
        .map(|(_, decode_fn)| *decode_fn)
}

/// Failure to decode a single record. Never aborts a batch.
#[derive(Debug, Error)]
pub enum MalformedEventError {
    #[error("event record is not a JSON object")]
    NotAnObject,
    #[error("event record {id:?} has no 'type' field")]
    MissingType { id: Option<i64> },
    #[error("event record {id:?} has a non-string 'type' field")]
    TypeNotString { id: Option<i64> },
    #[error("event record {id:?} of type '{tag}' failed to decode: {source}")]
    InvalidPayload {
        id: Option<i64>,
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

impl MalformedEventError {
    /// Raw wire id of the offending record, when it had one.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::NotAnObject => None,
            Self::MissingType { id }
            | Self::TypeNotString { id }
            | Self::InvalidPayload { id, .. } => *id,
        }
    }
}

/// Decode one raw record.
pub fn decode(raw: &Value) -> Result<EventRecord, MalformedEventError> {
    let object = raw.as_object().ok_or(MalformedEventError::NotAnObject)?;
    let id = raw_event_id(raw);
    let tag = match object.get("type") {
        Some(Value::String(tag)) => tag,
        Some(_) => return Err(MalformedEventError::TypeNotString { id }),
        None => return Err(MalformedEventError::MissingType { id }),
    };

    let Some(decode_fn) = lookup(tag) else {
        return Ok(EventRecord::Unknown(UnknownEvent::from_raw(raw, None)));
    };

    decode_fn(raw).map_err(|source| MalformedEventError::InvalidPayload {
        id,
        tag: tag.clone(),
        source,
    })
}

/// Decode a batch in order. Malformed records are logged and replaced by an
/// [`EventRecord::Unknown`] carrying their raw fields and wire id.
pub fn decode_batch(raw_events: &[Value]) -> Vec<EventRecord> {
    raw_events
        .iter()
        .map(|raw| {
            decode(raw).unwrap_or_else(|err| {
                warn!(id = ?err.id(), error = %err, "substituting malformed event record");
                EventRecord::Unknown(UnknownEvent::from_raw(raw, Some(err.to_string())))
            })
        })
        .collect()
}
