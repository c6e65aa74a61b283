use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Tag reported for records that carry no usable `type` field.
pub const UNKNOWN_TYPE_TAG: &str = "unknown";

/// Event type tags the decoder knows how to type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AlertWords,
    Attachment,
    CustomProfileFields,
    DeleteMessage,
    Heartbeat,
    Message,
    Presence,
    RealmEmoji,
    RealmUser,
    Submessage,
    Typing,
    UpdateMessage,
    UserStatus,
}

impl EventType {
    pub const ALL: [EventType; 13] = [
        EventType::AlertWords,
        EventType::Attachment,
        EventType::CustomProfileFields,
        EventType::DeleteMessage,
        EventType::Heartbeat,
        EventType::Message,
        EventType::Presence,
        EventType::RealmEmoji,
        EventType::RealmUser,
        EventType::Submessage,
        EventType::Typing,
        EventType::UpdateMessage,
        EventType::UserStatus,
    ];

    /// Wire tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlertWords => "alert_words",
            Self::Attachment => "attachment",
            Self::CustomProfileFields => "custom_profile_fields",
            Self::DeleteMessage => "delete_message",
            Self::Heartbeat => "heartbeat",
            Self::Message => "message",
            Self::Presence => "presence",
            Self::RealmEmoji => "realm_emoji",
            Self::RealmUser => "realm_user",
            Self::Submessage => "submessage",
            Self::Typing => "typing",
            Self::UpdateMessage => "update_message",
            Self::UserStatus => "user_status",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertWordsEvent {
    pub id: i64,
    #[serde(default)]
    pub alert_words: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentEvent {
    pub id: i64,
    /// `add`, `update` or `remove`.
    pub op: String,
    #[serde(default)]
    pub attachment: AttachmentData,
    #[serde(default)]
    pub upload_space_used: Option<i64>,
}

/// Attachment metadata; `remove` events only carry `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttachmentData {
    pub id: i64,
    pub name: String,
    pub path_id: String,
    pub size: i64,
    pub create_time: i64,
    pub messages: Vec<AttachmentMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttachmentMessage {
    pub id: i64,
    pub date_sent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomProfileFieldsEvent {
    pub id: i64,
    #[serde(default)]
    pub fields: Vec<CustomProfileField>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CustomProfileField {
    pub id: i64,
    pub name: String,
    pub hint: String,
    pub field_data: String,
    pub order: i64,
    pub required: bool,
    pub editable_by_user: bool,
    #[serde(rename = "type")]
    pub field_type: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteMessageEvent {
    pub id: i64,
    /// `stream` or `private`.
    #[serde(default)]
    pub message_type: String,
    /// Set unless the client declared `bulk_message_deletion`.
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub message_ids: Vec<i64>,
    #[serde(default)]
    pub stream_id: Option<i64>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatEvent {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEvent {
    pub id: i64,
    pub message: MessageData,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageData {
    pub id: i64,
    /// `stream` or `private`.
    #[serde(rename = "type")]
    pub message_type: String,
    pub display_recipient: DisplayRecipient,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub is_me_message: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub recipient_id: i64,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_full_name: String,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(default)]
    pub sender_realm_str: String,
    #[serde(default)]
    pub stream_id: Option<i64>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub submessages: Vec<Value>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub topic_links: Vec<TopicLink>,
}

/// Channel name for stream messages, participant list for direct messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DisplayRecipient {
    Channel(String),
    Users(Vec<DisplayRecipientUser>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayRecipientUser {
    pub id: i64,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Reaction {
    pub emoji_name: String,
    pub emoji_code: String,
    pub reaction_type: String,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopicLink {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceEvent {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub server_timestamp: f64,
    /// Per-client presence, keyed by client name (for example `website`).
    #[serde(default)]
    pub presence: BTreeMap<String, PresenceDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceDetail {
    pub client: String,
    /// `active` or `idle`.
    pub status: String,
    pub timestamp: i64,
    pub pushable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealmEmojiEvent {
    pub id: i64,
    pub op: String,
    /// Full emoji set keyed by emoji id.
    #[serde(default)]
    pub realm_emoji: BTreeMap<String, RealmEmojiEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealmEmojiEntry {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub deactivated: bool,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealmUserEvent {
    pub id: i64,
    /// `add`, `update` or `remove`.
    pub op: String,
    pub person: RealmUserPerson,
}

/// `update` events only carry `user_id` plus the changed fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealmUserPerson {
    pub user_id: i64,
    pub email: Option<String>,
    pub delivery_email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_version: Option<i64>,
    pub date_joined: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub is_billing_admin: Option<bool>,
    pub is_bot: Option<bool>,
    pub is_guest: Option<bool>,
    pub is_owner: Option<bool>,
    pub role: Option<i64>,
    pub timezone: Option<String>,
    pub profile_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmessageEvent {
    pub id: i64,
    pub message_id: i64,
    pub submessage_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub msg_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingEvent {
    pub id: i64,
    /// `start` or `stop`.
    pub op: String,
    #[serde(default)]
    pub message_type: Option<String>,
    pub sender: TypingUser,
    #[serde(default)]
    pub recipients: Vec<TypingUser>,
    #[serde(default)]
    pub stream_id: Option<i64>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypingUser {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateMessageEvent {
    pub id: i64,
    pub message_id: i64,
    #[serde(default)]
    pub message_ids: Vec<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub rendering_only: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub edit_timestamp: i64,
    #[serde(default)]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub stream_id: Option<i64>,
    #[serde(default)]
    pub new_stream_id: Option<i64>,
    #[serde(default)]
    pub propagate_mode: Option<String>,
    #[serde(default)]
    pub orig_subject: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub topic_links: Vec<TopicLink>,
    #[serde(default)]
    pub orig_content: Option<String>,
    #[serde(default)]
    pub orig_rendered_content: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub rendered_content: Option<String>,
    #[serde(default)]
    pub is_me_message: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStatusEvent {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub away: Option<bool>,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub emoji_name: Option<String>,
    #[serde(default)]
    pub emoji_code: Option<String>,
    #[serde(default)]
    pub reaction_type: Option<String>,
}

/// A record whose tag is not registered, or whose payload failed to decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnknownEvent {
    /// Raw wire `id`, when the record carried an integer one.
    pub id: Option<i64>,
    /// Raw wire `type`, when the record carried a string one.
    pub type_tag: Option<String>,
    /// Every field of the raw record, `id` and `type` included.
    pub fields: Map<String, Value>,
    /// Decode failure that caused the substitution, if any.
    pub decode_error: Option<String>,
}

impl UnknownEvent {
    pub fn from_raw(raw: &Value, decode_error: Option<String>) -> Self {
        let fields = raw.as_object().cloned().unwrap_or_default();
        Self {
            id: raw_event_id(raw),
            type_tag: raw
                .get("type")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            fields,
            decode_error,
        }
    }
}

/// Extract the integer `id` of a raw record regardless of its type.
pub fn raw_event_id(raw: &Value) -> Option<i64> {
    raw.get("id").and_then(Value::as_i64)
}

/// One decoded event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventRecord {
    AlertWords(AlertWordsEvent),
    Attachment(AttachmentEvent),
    CustomProfileFields(CustomProfileFieldsEvent),
    DeleteMessage(DeleteMessageEvent),
    Heartbeat(HeartbeatEvent),
    Message(MessageEvent),
    Presence(PresenceEvent),
    RealmEmoji(RealmEmojiEvent),
    RealmUser(RealmUserEvent),
    Submessage(SubmessageEvent),
    Typing(TypingEvent),
    UpdateMessage(UpdateMessageEvent),
    UserStatus(UserStatusEvent),
    Unknown(UnknownEvent),
}

impl EventRecord {
    /// The record's wire `id`; the only value the cursor may advance to.
    pub fn wire_id(&self) -> Option<i64> {
        match self {
            Self::AlertWords(ev) => Some(ev.id),
            Self::Attachment(ev) => Some(ev.id),
            Self::CustomProfileFields(ev) => Some(ev.id),
            Self::DeleteMessage(ev) => Some(ev.id),
            Self::Heartbeat(ev) => Some(ev.id),
            Self::Message(ev) => Some(ev.id),
            Self::Presence(ev) => Some(ev.id),
            Self::RealmEmoji(ev) => Some(ev.id),
            Self::RealmUser(ev) => Some(ev.id),
            Self::Submessage(ev) => Some(ev.id),
            Self::Typing(ev) => Some(ev.id),
            Self::UpdateMessage(ev) => Some(ev.id),
            Self::UserStatus(ev) => Some(ev.id),
            Self::Unknown(ev) => ev.id,
        }
    }

    /// Typed tag, `None` for [`EventRecord::Unknown`].
    pub fn event_type(&self) -> Option<EventType> {
        let ty = match self {
            Self::AlertWords(_) => EventType::AlertWords,
            Self::Attachment(_) => EventType::Attachment,
            Self::CustomProfileFields(_) => EventType::CustomProfileFields,
            Self::DeleteMessage(_) => EventType::DeleteMessage,
            Self::Heartbeat(_) => EventType::Heartbeat,
            Self::Message(_) => EventType::Message,
            Self::Presence(_) => EventType::Presence,
            Self::RealmEmoji(_) => EventType::RealmEmoji,
            Self::RealmUser(_) => EventType::RealmUser,
            Self::Submessage(_) => EventType::Submessage,
            Self::Typing(_) => EventType::Typing,
            Self::UpdateMessage(_) => EventType::UpdateMessage,
            Self::UserStatus(_) => EventType::UserStatus,
            Self::Unknown(_) => return None,
        };
        Some(ty)
    }

    /// Wire tag as received.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Unknown(ev) => ev.type_tag.as_deref().unwrap_or(UNKNOWN_TYPE_TAG),
            other => other
                .event_type()
                .map(|ty| ty.as_str())
                .unwrap_or(UNKNOWN_TYPE_TAG),
        }
    }

    /// Sub-kind for tags that multiplex several operations.
    pub fn op(&self) -> Option<&str> {
        match self {
            Self::Attachment(ev) => Some(ev.op.as_str()),
            Self::RealmEmoji(ev) => Some(ev.op.as_str()),
            Self::RealmUser(ev) => Some(ev.op.as_str()),
            Self::Typing(ev) => Some(ev.op.as_str()),
            Self::Unknown(ev) => ev.fields.get("op").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

macro_rules! impl_from_payload {
    ($($payload:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$payload> for EventRecord {
                fn from(event: $payload) -> Self {
                    Self::$variant(event)
                }
            }
        )+
    };
}

impl_from_payload! {
    AlertWordsEvent => AlertWords,
    AttachmentEvent => Attachment,
    CustomProfileFieldsEvent => CustomProfileFields,
    DeleteMessageEvent => DeleteMessage,
    HeartbeatEvent => Heartbeat,
    MessageEvent => Message,
    PresenceEvent => Presence,
    RealmEmojiEvent => RealmEmoji,
    RealmUserEvent => RealmUser,
    SubmessageEvent => Submessage,
    TypingEvent => Typing,
    UpdateMessageEvent => UpdateMessage,
    UserStatusEvent => UserStatus,
    UnknownEvent => Unknown,
}
