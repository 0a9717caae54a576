use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{
        ChatwootMessageId, ContactId, ConversationId, EventId, MessageDirection, MxcUri, RoomId,
        UserId,
    },
    events::EncryptedFile,
};

mod dispatcher;
pub mod error;
mod resolver;
mod send_locks;

pub use dispatcher::{Bridge, MessageOutcome, RedactionOutcome};
pub use error::BridgeError;
pub use resolver::ConversationResolver;
pub use send_locks::SendLocks;

/// Durable room/conversation and event/message associations.
///
/// Lookups return `Ok(None)` on a miss; `Err` is reserved for the store itself
/// failing.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn conversation_for_room(&self, room_id: &RoomId) -> Result<Option<ConversationId>>;
    async fn set_conversation_for_room(
        &self,
        room_id: &RoomId,
        conversation_id: ConversationId,
    ) -> Result<()>;
    async fn message_for_event(&self, event_id: &EventId) -> Result<Option<ChatwootMessageId>>;
    async fn set_message_for_event(
        &self,
        event_id: &EventId,
        message_id: ChatwootMessageId,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SupportApi: Send + Sync {
    async fn find_contact_by_identity(&self, identity: &UserId) -> Result<Option<ContactId>>;
    async fn create_contact(&self, identity: &UserId) -> Result<ContactId>;
    async fn create_conversation(
        &self,
        room_id: &RoomId,
        contact_id: ContactId,
    ) -> Result<ConversationId>;
    async fn send_text(
        &self,
        conversation_id: ConversationId,
        body: &str,
        direction: MessageDirection,
    ) -> Result<ChatwootMessageId>;
    async fn send_attachment(
        &self,
        conversation_id: ConversationId,
        caption: &str,
        attachment: Attachment,
        direction: MessageDirection,
    ) -> Result<ChatwootMessageId>;
    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: ChatwootMessageId,
    ) -> Result<()>;
}

#[async_trait]
pub trait MediaClient: Send + Sync {
    async fn fetch_media(&self, uri: &MxcUri) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8], file: &EncryptedFile) -> Result<Vec<u8>>;
}

#[cfg(test)]
#[path = "tests/fakes.rs"]
pub(crate) mod fakes;
