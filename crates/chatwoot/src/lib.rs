use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bridge::{Attachment, SupportApi};
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder,
};
use shared::domain::{
    ChatwootMessageId, ContactId, ConversationId, MessageDirection, RoomId, UserId,
};
use tracing::debug;

pub mod types;

use types::{
    Contact, ContactSearchResponse, Conversation, CreateContactRequest, CreateContactResponse,
    CreateConversationRequest, CreateMessageRequest, Message,
};

const ACCESS_TOKEN_HEADER: &str = "api_access_token";
const DEFAULT_ATTACHMENT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct ChatwootConfig {
    pub base_url: String,
    pub account_id: i64,
    pub inbox_id: i64,
    pub access_token: String,
    pub timeout: Duration,
}

/// Client for the Chatwoot account API scoped to one account and inbox.
#[derive(Clone)]
pub struct ChatwootClient {
    http: Client,
    config: ChatwootConfig,
}

impl ChatwootClient {
    pub fn new(config: ChatwootConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build chatwoot http client")?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}{path}",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_id
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(ACCESS_TOKEN_HEADER, &self.config.access_token)
    }

    pub async fn search_contacts(&self, query: &str) -> Result<Vec<Contact>> {
        let response: ContactSearchResponse = self
            .authed(self.http.get(self.url("/contacts/search")))
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.payload)
    }

    pub async fn contact_id_for_identity(&self, identity: &UserId) -> Result<Option<ContactId>> {
        let contacts = self
            .search_contacts(identity.as_str())
            .await
            .with_context(|| format!("contact search failed for {identity}"))?;
        Ok(contacts
            .into_iter()
            .find(|contact| contact.identifier.as_deref() == Some(identity.as_str()))
            .map(|contact| ContactId(contact.id)))
    }

    pub async fn create_contact(&self, identity: &UserId) -> Result<ContactId> {
        let response: CreateContactResponse = self
            .authed(self.http.post(self.url("/contacts")))
            .json(&CreateContactRequest {
                inbox_id: self.config.inbox_id,
                name: identity.as_str(),
                identifier: identity.as_str(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ContactId(response.payload.contact.id))
    }

    pub async fn create_conversation(
        &self,
        room_id: &RoomId,
        contact_id: ContactId,
    ) -> Result<Conversation> {
        let conversation: Conversation = self
            .authed(self.http.post(self.url("/conversations")))
            .json(&CreateConversationRequest {
                source_id: room_id.as_str(),
                inbox_id: self.config.inbox_id,
                contact_id: contact_id.0,
                status: "open",
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(conversation)
    }

    pub async fn send_text_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        direction: MessageDirection,
    ) -> Result<Message> {
        let message: Message = self
            .authed(self.http.post(self.url(&format!(
                "/conversations/{}/messages",
                conversation_id.0
            ))))
            .json(&CreateMessageRequest {
                content,
                message_type: direction.as_chatwoot_str(),
                private: false,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(message)
    }

    pub async fn send_attachment_message(
        &self,
        conversation_id: ConversationId,
        caption: &str,
        attachment: Attachment,
        direction: MessageDirection,
    ) -> Result<Message> {
        let mime_type = attachment
            .mime_type
            .as_deref()
            .unwrap_or(DEFAULT_ATTACHMENT_MIME);
        let size = attachment.bytes.len();
        let part = Part::bytes(attachment.bytes)
            .file_name(attachment.filename)
            .mime_str(mime_type)
            .with_context(|| format!("invalid attachment mime type '{mime_type}'"))?;
        let form = Form::new()
            .text("content", caption.to_string())
            .text("message_type", direction.as_chatwoot_str())
            .part("attachments[]", part);
        debug!(%conversation_id, size, "uploading attachment");

        let message: Message = self
            .authed(self.http.post(self.url(&format!(
                "/conversations/{}/messages",
                conversation_id.0
            ))))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: ChatwootMessageId,
    ) -> Result<()> {
        self.authed(self.http.delete(self.url(&format!(
            "/conversations/{}/messages/{}",
            conversation_id.0, message_id.0
        ))))
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl SupportApi for ChatwootClient {
    async fn find_contact_by_identity(&self, identity: &UserId) -> Result<Option<ContactId>> {
        self.contact_id_for_identity(identity).await
    }

    async fn create_contact(&self, identity: &UserId) -> Result<ContactId> {
        ChatwootClient::create_contact(self, identity).await
    }

    async fn create_conversation(
        &self,
        room_id: &RoomId,
        contact_id: ContactId,
    ) -> Result<ConversationId> {
        let conversation = ChatwootClient::create_conversation(self, room_id, contact_id).await?;
        Ok(ConversationId(conversation.id))
    }

    async fn send_text(
        &self,
        conversation_id: ConversationId,
        body: &str,
        direction: MessageDirection,
    ) -> Result<ChatwootMessageId> {
        let message = self
            .send_text_message(conversation_id, body, direction)
            .await?;
        Ok(ChatwootMessageId(message.id))
    }

    async fn send_attachment(
        &self,
        conversation_id: ConversationId,
        caption: &str,
        attachment: Attachment,
        direction: MessageDirection,
    ) -> Result<ChatwootMessageId> {
        let message = self
            .send_attachment_message(conversation_id, caption, attachment, direction)
            .await?;
        Ok(ChatwootMessageId(message.id))
    }

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: ChatwootMessageId,
    ) -> Result<()> {
        ChatwootClient::delete_message(self, conversation_id, message_id).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
