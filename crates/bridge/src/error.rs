use shared::domain::{EventId, MxcUriError, RoomId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("mapping store lookup failed: {0}")]
    Store(#[source] anyhow::Error),
    #[error("contact creation failed for {identity}: {source}")]
    ContactCreation {
        identity: UserId,
        source: anyhow::Error,
    },
    #[error("failed to create conversation for room {room_id}: {source}")]
    ConversationCreation {
        room_id: RoomId,
        source: anyhow::Error,
    },
    #[error("failed to persist conversation mapping for room {room_id}: {source}")]
    PersistConversationMapping {
        room_id: RoomId,
        source: anyhow::Error,
    },
    #[error("event {event_id} has no content uri")]
    MissingContentUri { event_id: EventId },
    #[error("malformed content uri in {event_id}: {source}")]
    MalformedContentUri {
        event_id: EventId,
        source: MxcUriError,
    },
    #[error("failed to download media in {event_id}: {source}")]
    MediaFetch {
        event_id: EventId,
        source: anyhow::Error,
    },
    #[error("failed to decrypt media in {event_id}: {source}")]
    MediaDecrypt {
        event_id: EventId,
        source: anyhow::Error,
    },
    #[error("failed to send message for {event_id}: {source}")]
    Send {
        event_id: EventId,
        source: anyhow::Error,
    },
    #[error("message sent but mapping for {event_id} was not persisted: {source}")]
    PersistMessageMapping {
        event_id: EventId,
        source: anyhow::Error,
    },
    #[error("failed to delete message for redaction of {redacts}: {source}")]
    Delete {
        redacts: EventId,
        source: anyhow::Error,
    },
}
