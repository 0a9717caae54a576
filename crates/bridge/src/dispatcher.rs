use std::sync::Arc;

use shared::{
    domain::{ChatwootMessageId, ConversationId, EventId, MessageDirection, MxcUri, UserId},
    events::{MessageKind, RedactionEvent, RoomMessageEvent},
};
use tracing::{debug, error, info, warn};

use crate::{
    Attachment, BridgeError, ConversationResolver, MappingStore, MediaClient, SendLocks,
    SupportApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Sent(ChatwootMessageId),
    AlreadyBridged(ChatwootMessageId),
    /// The bridge's own message in a room that has no conversation yet.
    SelfEchoWithoutConversation,
    UnsupportedKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionOutcome {
    Deleted {
        conversation_id: ConversationId,
        message_id: ChatwootMessageId,
    },
    NoConversation,
    NotBridged,
}

/// Entry point for inbound room events.
pub struct Bridge {
    bot_user_id: UserId,
    store: Arc<dyn MappingStore>,
    api: Arc<dyn SupportApi>,
    media: Arc<dyn MediaClient>,
    resolver: ConversationResolver,
    send_locks: SendLocks,
}

impl Bridge {
    pub fn new(
        bot_user_id: UserId,
        store: Arc<dyn MappingStore>,
        api: Arc<dyn SupportApi>,
        media: Arc<dyn MediaClient>,
    ) -> Self {
        Self {
            bot_user_id,
            resolver: ConversationResolver::new(store.clone(), api.clone()),
            store,
            api,
            media,
            send_locks: SendLocks::new(),
        }
    }

    /// Bridges a message event. Every failure is logged and the event dropped.
    pub async fn on_message(&self, event: &RoomMessageEvent) {
        match self.handle_message(event).await {
            Ok(MessageOutcome::Sent(message_id)) => info!(
                event_id = %event.event_id,
                room_id = %event.room_id,
                %message_id,
                "bridged message"
            ),
            Ok(outcome) => debug!(event_id = %event.event_id, ?outcome, "message not sent"),
            Err(error) => error!(
                event_id = %event.event_id,
                room_id = %event.room_id,
                sender = %event.sender,
                %error,
                "dropping message event"
            ),
        }
    }

    pub async fn handle_message(
        &self,
        event: &RoomMessageEvent,
    ) -> Result<MessageOutcome, BridgeError> {
        if let Some(message_id) = self.bridged_message(&event.event_id).await? {
            info!(event_id = %event.event_id, %message_id, "event already has a chatwoot message");
            return Ok(MessageOutcome::AlreadyBridged(message_id));
        }

        let existing = self
            .store
            .conversation_for_room(&event.room_id)
            .await
            .map_err(BridgeError::Store)?;
        let conversation_id = match existing {
            Some(conversation_id) => conversation_id,
            None if event.sender == self.bot_user_id => {
                warn!(
                    sender = %event.sender,
                    room_id = %event.room_id,
                    "not creating conversation for own message"
                );
                return Ok(MessageOutcome::SelfEchoWithoutConversation);
            }
            None => {
                info!(room_id = %event.room_id, "no conversation for room; creating one");
                self.resolver.resolve(&event.room_id, &event.sender).await?
            }
        };

        let direction = self.direction_for(&event.sender);

        self.send_locks
            .with_sender_lock(&event.sender, || {
                self.send_and_record(event, conversation_id, direction)
            })
            .await
    }

    /// Redacts the bridged copy of an event. Missing mappings are not errors.
    pub async fn on_redaction(&self, event: &RedactionEvent) {
        match self.handle_redaction(event).await {
            Ok(RedactionOutcome::Deleted {
                conversation_id,
                message_id,
            }) => info!(
                redacts = %event.redacts,
                %conversation_id,
                %message_id,
                "deleted bridged message"
            ),
            Ok(RedactionOutcome::NoConversation) => {
                warn!(room_id = %event.room_id, "no chatwoot conversation associated with room")
            }
            Ok(RedactionOutcome::NotBridged) => {
                info!(redacts = %event.redacts, "no chatwoot message for redacted event")
            }
            Err(error) => error!(
                event_id = %event.event_id,
                redacts = %event.redacts,
                %error,
                "dropping redaction event"
            ),
        }
    }

    pub async fn handle_redaction(
        &self,
        event: &RedactionEvent,
    ) -> Result<RedactionOutcome, BridgeError> {
        let Some(conversation_id) = self
            .store
            .conversation_for_room(&event.room_id)
            .await
            .map_err(BridgeError::Store)?
        else {
            return Ok(RedactionOutcome::NoConversation);
        };

        let Some(message_id) = self.bridged_message(&event.redacts).await? else {
            return Ok(RedactionOutcome::NotBridged);
        };

        self.api
            .delete_message(conversation_id, message_id)
            .await
            .map_err(|source| BridgeError::Delete {
                redacts: event.redacts.clone(),
                source,
            })?;

        Ok(RedactionOutcome::Deleted {
            conversation_id,
            message_id,
        })
    }

    fn direction_for(&self, sender: &UserId) -> MessageDirection {
        if *sender == self.bot_user_id {
            MessageDirection::Outbound
        } else {
            MessageDirection::Inbound
        }
    }

    async fn bridged_message(
        &self,
        event_id: &EventId,
    ) -> Result<Option<ChatwootMessageId>, BridgeError> {
        self.store
            .message_for_event(event_id)
            .await
            .map_err(BridgeError::Store)
    }

    /// Must run under the sender's lock: the re-check, the send and the
    /// mapping write form one unit against duplicate deliveries.
    async fn send_and_record(
        &self,
        event: &RoomMessageEvent,
        conversation_id: ConversationId,
        direction: MessageDirection,
    ) -> Result<MessageOutcome, BridgeError> {
        if let Some(message_id) = self.bridged_message(&event.event_id).await? {
            return Ok(MessageOutcome::AlreadyBridged(message_id));
        }

        let Some(message_id) = self.send_content(event, conversation_id, direction).await? else {
            debug!(
                event_id = %event.event_id,
                msgtype = %event.content.msgtype,
                "ignoring unsupported message type"
            );
            return Ok(MessageOutcome::UnsupportedKind);
        };

        self.store
            .set_message_for_event(&event.event_id, message_id)
            .await
            .map_err(|source| BridgeError::PersistMessageMapping {
                event_id: event.event_id.clone(),
                source,
            })?;

        Ok(MessageOutcome::Sent(message_id))
    }

    async fn send_content(
        &self,
        event: &RoomMessageEvent,
        conversation_id: ConversationId,
        direction: MessageDirection,
    ) -> Result<Option<ChatwootMessageId>, BridgeError> {
        let content = &event.content;
        let sent = match content.kind() {
            MessageKind::Text | MessageKind::Notice => {
                self.api
                    .send_text(conversation_id, &content.body, direction)
                    .await
            }
            MessageKind::Emote => {
                let body = emote_body(&event.sender, &content.body);
                self.api.send_text(conversation_id, &body, direction).await
            }
            kind if kind.is_media() => {
                let attachment = self.load_attachment(event).await?;
                self.api
                    .send_attachment(conversation_id, &content.body, attachment, direction)
                    .await
            }
            _ => return Ok(None),
        };

        sent.map(Some).map_err(|source| BridgeError::Send {
            event_id: event.event_id.clone(),
            source,
        })
    }

    async fn load_attachment(&self, event: &RoomMessageEvent) -> Result<Attachment, BridgeError> {
        let content = &event.content;
        let raw_uri = content
            .content_uri()
            .ok_or_else(|| BridgeError::MissingContentUri {
                event_id: event.event_id.clone(),
            })?;
        let uri = MxcUri::parse(raw_uri).map_err(|source| BridgeError::MalformedContentUri {
            event_id: event.event_id.clone(),
            source,
        })?;

        let mut bytes = self
            .media
            .fetch_media(&uri)
            .await
            .map_err(|source| BridgeError::MediaFetch {
                event_id: event.event_id.clone(),
                source,
            })?;

        if let Some(file) = &content.file {
            bytes = self
                .media
                .decrypt(&bytes, file)
                .map_err(|source| BridgeError::MediaDecrypt {
                    event_id: event.event_id.clone(),
                    source,
                })?;
        }

        Ok(Attachment {
            filename: content.body.clone(),
            mime_type: content.mimetype().map(str::to_string),
            bytes,
        })
    }
}

pub(crate) fn emote_body(sender: &UserId, body: &str) -> String {
    format!(" * {} {}", sender.localpart(), body)
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
