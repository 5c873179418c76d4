//! Wire decoding of `/updates` batches and command responses.
//!
//! Two document shapes are accepted: `{"data":{"events":[...]}}` and the legacy
//! `{"data":[...]}`. A malformed element is reported and skipped; it never
//! discards the rest of the batch.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{CommandResponse, Event, EventKind, EventType, UserRef};

/// Errors produced while decoding wire payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The document itself has an unusable shape; no events could be read.
    #[error("invalid update document: {reason}")]
    InvalidDocument { reason: String },
    /// An array element is not a JSON object.
    #[error("event #{index} is not an object")]
    NotAnObject { index: usize },
    /// An array element lacks a required field.
    #[error("event #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
    /// An array element has a field of the wrong type.
    #[error("event #{index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
}

impl DecodeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDocument { .. } => "invalid_document",
            Self::NotAnObject { .. } => "not_an_object",
            Self::MissingField { .. } => "missing_field",
            Self::Malformed { .. } => "malformed_event",
        }
    }
}

/// Result of decoding one `/updates` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Successfully decoded events, in server order.
    pub events: Vec<Event>,
    /// Narrowing cursor reported by the server, if any.
    pub cursor: Option<String>,
    /// Elements that were skipped.
    pub errors: Vec<DecodeError>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    userid: Option<String>,
    handle: Option<String>,
    displayname: Option<String>,
    pictureurl: Option<String>,
    profileurl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: Option<String>,
    roomid: Option<String>,
    #[serde(rename = "roomId")]
    room_id: Option<String>,
    body: Option<String>,
    userid: Option<String>,
    added: Option<i64>,
    eventtype: Option<String>,
    kind: Option<String>,
    user: Option<WireUser>,
    replyto: Option<Value>,
    customtype: Option<String>,
    customid: Option<String>,
    custompayload: Option<String>,
}

/// Decode an `/updates` document.
///
/// `room_id` fills in events that omit `roomid`/`roomId`. An absent, null or
/// empty events array yields an empty batch.
pub fn decode_batch(document: &Value, room_id: &str) -> Result<DecodedBatch, DecodeError> {
    let Some(root) = document.as_object() else {
        return Err(DecodeError::InvalidDocument {
            reason: "document is not a JSON object".to_owned(),
        });
    };

    let (elements, cursor) = match root.get("data") {
        None | Some(Value::Null) => (None, None),
        Some(Value::Array(items)) => (Some(items), None),
        Some(Value::Object(data)) => {
            let elements = match data.get("events") {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => Some(items),
                Some(_) => {
                    return Err(DecodeError::InvalidDocument {
                        reason: "'data.events' is not an array".to_owned(),
                    });
                }
            };
            (elements, cursor_from(data.get("cursor")))
        }
        Some(_) => {
            return Err(DecodeError::InvalidDocument {
                reason: "'data' is neither an object nor an array".to_owned(),
            });
        }
    };

    let mut batch = DecodedBatch {
        cursor,
        ..DecodedBatch::default()
    };

    for (index, element) in elements.into_iter().flatten().enumerate() {
        match decode_event(index, element, room_id) {
            Ok(event) => batch.events.push(event),
            Err(err) => {
                warn!(%room_id, index, code = err.code(), error = %err, "skipping undecodable event");
                batch.errors.push(err);
            }
        }
    }

    Ok(batch)
}

/// Decode a single event element. `index` is only used for error reporting.
///
/// `id`, `kind` and `eventtype` must be present and non-empty; other fields
/// default when absent.
pub fn decode_event(index: usize, element: &Value, room_id: &str) -> Result<Event, DecodeError> {
    if !element.is_object() {
        return Err(DecodeError::NotAnObject { index });
    }

    let wire = WireEvent::deserialize(element).map_err(|err| DecodeError::Malformed {
        index,
        reason: err.to_string(),
    })?;

    let id = required(wire.id, index, "id")?;
    let kind = required(wire.kind, index, "kind")?;
    let event_type = EventType::from_wire(&required(wire.eventtype, index, "eventtype")?);
    let reply_to = match event_type {
        EventType::Reply => wire.replyto,
        _ => None,
    };

    let author = match wire.user {
        Some(user) => UserRef {
            user_id: user
                .userid
                .or_else(|| wire.userid.clone())
                .unwrap_or_default(),
            handle: user.handle,
            display_name: user.displayname,
            picture_url: user.pictureurl,
            profile_url: user.profileurl,
        },
        None => UserRef::new(wire.userid.unwrap_or_default()),
    };

    Ok(Event {
        id,
        room_id: wire
            .roomid
            .or(wire.room_id)
            .unwrap_or_else(|| room_id.to_owned()),
        kind: EventKind::from(kind),
        event_type,
        body: wire.body.unwrap_or_default(),
        added_at_ms: wire.added.unwrap_or_default(),
        author,
        reply_to,
        custom_type: wire.customtype,
        custom_id: wire.customid,
        custom_payload: wire.custompayload,
    })
}

fn required(
    value: Option<String>,
    index: usize,
    field: &'static str,
) -> Result<String, DecodeError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or(DecodeError::MissingField { index, field })
}

/// Decode the response of a one-shot command.
///
/// The produced event is looked up in `data.speech` first, then in `data`
/// itself. A response without a decodable event is still a valid response.
pub fn decode_command_response(document: &Value, room_id: &str) -> CommandResponse {
    let data = document.get("data");
    let op = data
        .and_then(|data| data.get("op"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let event = data.and_then(|data| {
        let candidate = data.get("speech").filter(|v| v.is_object()).unwrap_or(data);
        match decode_event(0, candidate, room_id) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(%room_id, error = %err, "command response carries no event");
                None
            }
        }
    });

    CommandResponse {
        op,
        event,
        raw: document.clone(),
    }
}

fn cursor_from(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(cursor) if !cursor.is_empty() => Some(cursor.clone()),
        Value::Number(cursor) => Some(cursor.to_string()),
        _ => None,
    }
}
