use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EventId, RoomId, UserId};

pub const ROOM_MESSAGE_EVENT: &str = "m.room.message";
pub const ROOM_REDACTION_EVENT: &str = "m.room.redaction";

/// A room event as pushed by the homeserver, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<EventId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Notice,
    Emote,
    Audio,
    File,
    Image,
    Video,
    Other(String),
}

impl MessageKind {
    pub fn from_msgtype(msgtype: &str) -> Self {
        match msgtype {
            "m.text" => MessageKind::Text,
            "m.notice" => MessageKind::Notice,
            "m.emote" => MessageKind::Emote,
            "m.audio" => MessageKind::Audio,
            "m.file" => MessageKind::File,
            "m.image" => MessageKind::Image,
            "m.video" => MessageKind::Video,
            other => MessageKind::Other(other.to_string()),
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageKind::Audio | MessageKind::File | MessageKind::Image | MessageKind::Video
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// JSON Web Key carrying the symmetric key of an encrypted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default)]
    pub key_ops: Vec<String>,
    pub alg: String,
    pub k: String,
    #[serde(default)]
    pub ext: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub url: String,
    pub key: JsonWebKey,
    pub iv: String,
    pub hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub v: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub msgtype: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<EncryptedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<MediaInfo>,
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_msgtype(&self.msgtype)
    }

    /// The raw content locator; an encrypted file's own url wins over the plain one.
    pub fn content_uri(&self) -> Option<&str> {
        match &self.file {
            Some(file) => Some(file.url.as_str()),
            None => self.url.as_deref(),
        }
    }

    pub fn mimetype(&self) -> Option<&str> {
        self.info.as_ref().and_then(|info| info.mimetype.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessageEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub redacts: EventId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(RoomMessageEvent),
    Redaction(RedactionEvent),
}

#[derive(Debug, Deserialize)]
struct RedactionContent {
    #[serde(default)]
    redacts: Option<EventId>,
}

/// A handled event type whose payload cannot be interpreted.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("undecodable m.room.message content: {0}")]
    MessageContent(#[source] serde_json::Error),
    #[error("undecodable m.room.redaction content: {0}")]
    RedactionContent(#[source] serde_json::Error),
    #[error("redaction does not name the event it redacts")]
    MissingRedactionTarget,
}

impl InboundEvent {
    /// `Ok(None)` for event types the bridge does not handle; `Err` for
    /// handled types whose content is malformed.
    pub fn from_raw(raw: RawEvent) -> Result<Option<Self>, EventDecodeError> {
        match raw.event_type.as_str() {
            ROOM_MESSAGE_EVENT => {
                let content: MessageContent = serde_json::from_value(raw.content)
                    .map_err(EventDecodeError::MessageContent)?;
                Ok(Some(InboundEvent::Message(RoomMessageEvent {
                    event_id: raw.event_id,
                    room_id: raw.room_id,
                    sender: raw.sender,
                    content,
                })))
            }
            ROOM_REDACTION_EVENT => {
                let redacts = match raw.redacts {
                    Some(redacts) => redacts,
                    None => serde_json::from_value::<RedactionContent>(raw.content)
                        .map_err(EventDecodeError::RedactionContent)?
                        .redacts
                        .ok_or(EventDecodeError::MissingRedactionTarget)?,
                };
                Ok(Some(InboundEvent::Redaction(RedactionEvent {
                    event_id: raw.event_id,
                    room_id: raw.room_id,
                    sender: raw.sender,
                    redacts,
                })))
            }
            _ => Ok(None),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            InboundEvent::Message(event) => &event.room_id,
            InboundEvent::Redaction(event) => &event.room_id,
        }
    }
}
