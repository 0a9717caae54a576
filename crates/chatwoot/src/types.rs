use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactSearchResponse {
    #[serde(default)]
    pub(crate) payload: Vec<Contact>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateContactRequest<'a> {
    pub(crate) inbox_id: i64,
    pub(crate) name: &'a str,
    pub(crate) identifier: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateContactResponse {
    pub(crate) payload: CreateContactPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateContactPayload {
    pub(crate) contact: Contact,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateConversationRequest<'a> {
    pub(crate) source_id: &'a str,
    pub(crate) inbox_id: i64,
    pub(crate) contact_id: i64,
    pub(crate) status: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub inbox_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateMessageRequest<'a> {
    pub(crate) content: &'a str,
    pub(crate) message_type: &'a str,
    pub(crate) private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub content: Option<String>,
}
