use serde::{Deserialize, Serialize};

/// Wire `kind` marker carried by chat events.
pub const CHAT_EVENT_KIND: &str = "chat.event";

/// Lifecycle state of a client's poll loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PollLoopState {
    /// No timer has ever been scheduled.
    #[default]
    Idle,
    /// A recurring timer task is scheduled.
    Running,
    /// The timer was cancelled; a new `start` may resume polling.
    Stopped,
}

/// Server-assigned object-type marker (`kind` on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// `chat.event`
    ChatEvent,
    /// `app.user`
    User,
    /// `chat.room`
    Room,
    /// `comment.conversation`
    Conversation,
    /// Any other marker, kept verbatim.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ChatEvent => CHAT_EVENT_KIND,
            Self::User => "app.user",
            Self::Room => "chat.room",
            Self::Conversation => "comment.conversation",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            CHAT_EVENT_KIND => Self::ChatEvent,
            "app.user" => Self::User,
            "chat.room" => Self::Room,
            "comment.conversation" => Self::Conversation,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        value.as_str().to_owned()
    }
}

/// Wire `eventtype` of a chat event. Matching is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Purge,
    Reaction,
    Reply,
    Speech,
    Chat,
    AdminCommand,
    ApiResult,
    /// Unknown or future type, kept verbatim so it still reaches a handler.
    Other(String),
}

impl EventType {
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "purge" => Self::Purge,
            "reaction" => Self::Reaction,
            "reply" => Self::Reply,
            "speech" => Self::Speech,
            "chat" => Self::Chat,
            "admincommand" => Self::AdminCommand,
            "apiresult" => Self::ApiResult,
            _ => Self::Other(value.to_owned()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Purge => "purge",
            Self::Reaction => "reaction",
            Self::Reply => "reply",
            Self::Speech => "speech",
            Self::Chat => "chat",
            Self::AdminCommand => "admincommand",
            Self::ApiResult => "apiresult",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::from_wire(&value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_wire().to_owned()
    }
}

/// Author reference embedded in events; also the identity used for one-shot calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserRef {
    pub user_id: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub profile_url: Option<String>,
}

impl UserRef {
    /// User reference with only an ID.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// One normalized occurrence in a room, created per poll tick and dropped after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Server-assigned ID, unique within the room. Empty only on the lifecycle marker.
    pub id: String,
    pub room_id: String,
    pub kind: EventKind,
    pub event_type: EventType,
    pub body: String,
    /// Creation time in milliseconds since Unix epoch.
    pub added_at_ms: i64,
    pub author: UserRef,
    /// Verbatim `replyto` object, only kept for reply events.
    pub reply_to: Option<serde_json::Value>,
    pub custom_type: Option<String>,
    pub custom_id: Option<String>,
    pub custom_payload: Option<String>,
}

impl Event {
    /// Marker passed to `on_lifecycle` when a poll returned no events.
    pub fn lifecycle_marker(room_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            room_id: room_id.into(),
            kind: EventKind::Other(String::new()),
            event_type: EventType::Other(String::new()),
            body: String::new(),
            added_at_ms: 0,
            author: UserRef::default(),
            reply_to: None,
            custom_type: None,
            custom_id: None,
            custom_payload: None,
        }
    }

    /// Whether this is the empty-batch marker rather than a server event.
    pub fn is_lifecycle_marker(&self) -> bool {
        self.id.is_empty() && self.kind == EventKind::Other(String::new())
    }
}

/// Handler category an event is routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Chat,
    Reaction,
    Reply,
    Speech,
    Purge,
    /// Admin command results (reached through the command path only).
    Admin,
    /// Non-chat objects and the empty-batch marker.
    Lifecycle,
}

/// Decoded result of one-shot command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Server-reported operation (for example `admin`), when present.
    pub op: Option<String>,
    /// Event produced by the command, when the server echoed one.
    pub event: Option<Event>,
    /// Untouched response document.
    pub raw: serde_json::Value,
}
