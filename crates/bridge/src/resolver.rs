use std::sync::Arc;

use shared::domain::{ContactId, ConversationId, RoomId, UserId};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{BridgeError, MappingStore, SupportApi};

/// Finds or creates the support conversation for a room.
///
/// Creation runs inside one process-wide critical section shared by every
/// room, so a room never ends up with two conversations.
pub struct ConversationResolver {
    store: Arc<dyn MappingStore>,
    api: Arc<dyn SupportApi>,
    create_lock: Mutex<()>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn MappingStore>, api: Arc<dyn SupportApi>) -> Self {
        Self {
            store,
            api,
            create_lock: Mutex::new(()),
        }
    }

    pub async fn resolve(
        &self,
        room_id: &RoomId,
        sender: &UserId,
    ) -> Result<ConversationId, BridgeError> {
        if let Some(conversation_id) = self.lookup(room_id).await? {
            return Ok(conversation_id);
        }

        let _guard = self.create_lock.lock().await;

        // Another event for this room may have created it while we waited.
        if let Some(conversation_id) = self.lookup(room_id).await? {
            return Ok(conversation_id);
        }

        let contact_id = match self.api.find_contact_by_identity(sender).await {
            Ok(Some(contact_id)) => contact_id,
            Ok(None) => self.create_contact(sender).await?,
            Err(error) => {
                warn!(%sender, %error, "contact lookup failed; creating a new contact");
                self.create_contact(sender).await?
            }
        };

        let conversation_id = self
            .api
            .create_conversation(room_id, contact_id)
            .await
            .map_err(|source| BridgeError::ConversationCreation {
                room_id: room_id.clone(),
                source,
            })?;
        info!(%room_id, %conversation_id, %contact_id, "created conversation");

        self.store
            .set_conversation_for_room(room_id, conversation_id)
            .await
            .map_err(|source| BridgeError::PersistConversationMapping {
                room_id: room_id.clone(),
                source,
            })?;

        Ok(conversation_id)
    }

    async fn lookup(&self, room_id: &RoomId) -> Result<Option<ConversationId>, BridgeError> {
        self.store
            .conversation_for_room(room_id)
            .await
            .map_err(BridgeError::Store)
    }

    async fn create_contact(&self, sender: &UserId) -> Result<ContactId, BridgeError> {
        let contact_id = self
            .api
            .create_contact(sender)
            .await
            .map_err(|source| BridgeError::ContactCreation {
                identity: sender.clone(),
                source,
            })?;
        info!(%sender, %contact_id, "created contact");
        Ok(contact_id)
    }
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
