use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::Request,
};
use bridge::{Attachment, MediaClient, SupportApi};
use serde_json::{json, Value};
use shared::{
    domain::{
        ChatwootMessageId, ContactId, ConversationId, EventId, MessageDirection, MxcUri, RoomId,
    },
    events::EncryptedFile,
};
use std::sync::Mutex;
use tower::ServiceExt;

const HS_TOKEN: &str = "hs-secret";

#[derive(Default)]
struct RecordingChatwoot {
    texts: Mutex<Vec<(ConversationId, String, MessageDirection)>>,
    deleted: Mutex<Vec<(ConversationId, ChatwootMessageId)>>,
    /// Holds back this body so a concurrent send would overtake it.
    slow_body: Option<&'static str>,
}

#[async_trait]
impl SupportApi for RecordingChatwoot {
    async fn find_contact_by_identity(&self, _identity: &UserId) -> Result<Option<ContactId>> {
        Ok(Some(ContactId(5)))
    }

    async fn create_contact(&self, _identity: &UserId) -> Result<ContactId> {
        Ok(ContactId(5))
    }

    async fn create_conversation(
        &self,
        _room_id: &RoomId,
        _contact_id: ContactId,
    ) -> Result<ConversationId> {
        Ok(ConversationId(40))
    }

    async fn send_text(
        &self,
        conversation_id: ConversationId,
        body: &str,
        direction: MessageDirection,
    ) -> Result<ChatwootMessageId> {
        if self.slow_body == Some(body) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let mut texts = self.texts.lock().expect("texts");
        texts.push((conversation_id, body.to_string(), direction));
        Ok(ChatwootMessageId(100 + texts.len() as i64))
    }

    async fn send_attachment(
        &self,
        _conversation_id: ConversationId,
        _caption: &str,
        _attachment: Attachment,
        _direction: MessageDirection,
    ) -> Result<ChatwootMessageId> {
        Err(anyhow!("attachments are not expected here"))
    }

    async fn delete_message(
        &self,
        conversation_id: ConversationId,
        message_id: ChatwootMessageId,
    ) -> Result<()> {
        self.deleted
            .lock()
            .expect("deleted")
            .push((conversation_id, message_id));
        Ok(())
    }
}

struct NoMedia;

#[async_trait]
impl MediaClient for NoMedia {
    async fn fetch_media(&self, uri: &MxcUri) -> Result<Vec<u8>> {
        Err(anyhow!("no media for {uri}"))
    }

    fn decrypt(&self, _ciphertext: &[u8], _file: &EncryptedFile) -> Result<Vec<u8>> {
        Err(anyhow!("no decryption"))
    }
}

async fn test_app() -> (Router, Storage, Arc<RecordingChatwoot>) {
    test_app_with(RecordingChatwoot::default()).await
}

async fn test_app_with(
    chatwoot: RecordingChatwoot,
) -> (Router, Storage, Arc<RecordingChatwoot>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let chatwoot = Arc::new(chatwoot);
    let bridge = Bridge::new(
        UserId::from("@chatwoot:example.org"),
        Arc::new(storage.clone()),
        chatwoot.clone(),
        Arc::new(NoMedia),
    );
    let app = build_router(AppState {
        bridge: Arc::new(bridge),
        storage: storage.clone(),
        hs_token: Arc::from(HS_TOKEN),
    });
    (app, storage, chatwoot)
}

fn text_event(event_id: &str, body: &str) -> Value {
    json!({
        "event_id": event_id,
        "room_id": "!help:example.org",
        "sender": "@alice:example.org",
        "type": "m.room.message",
        "origin_server_ts": 1,
        "content": { "msgtype": "m.text", "body": body }
    })
}

fn transaction(path: &str, events: Value) -> Request<Body> {
    Request::put(path)
        .header("authorization", format!("Bearer {HS_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "events": events }).to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage, _chatwoot) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn transaction_bridges_text_message() {
    let (app, storage, chatwoot) = test_app().await;

    let response = app
        .oneshot(transaction(
            "/_matrix/app/v1/transactions/1",
            json!([text_event("$one", "hello")]),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({}));
    assert_eq!(
        chatwoot.texts.lock().expect("texts").as_slice(),
        &[(ConversationId(40), "hello".to_string(), MessageDirection::Inbound)]
    );
    assert_eq!(
        storage
            .conversation_for_room(&RoomId::from("!help:example.org"))
            .await
            .expect("room"),
        Some(ConversationId(40))
    );
    assert_eq!(
        storage
            .message_for_event(&EventId::from("$one"))
            .await
            .expect("event"),
        Some(ChatwootMessageId(101))
    );
}

#[tokio::test]
async fn retried_transaction_is_not_bridged_twice() {
    let (app, _storage, chatwoot) = test_app().await;
    let events = json!([text_event("$one", "hello"), text_event("$two", "again")]);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(transaction("/_matrix/app/v1/transactions/7", events.clone()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(chatwoot.texts.lock().expect("texts").len(), 2);
}

#[tokio::test]
async fn legacy_transaction_path_and_query_token_are_accepted() {
    let (app, _storage, chatwoot) = test_app().await;
    let request = Request::put(format!("/transactions/3?access_token={HS_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "events": [text_event("$legacy", "hi")] }).to_string(),
        ))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(chatwoot.texts.lock().expect("texts").len(), 1);
}

#[tokio::test]
async fn rejects_missing_or_wrong_token() {
    let (app, _storage, chatwoot) = test_app().await;

    let missing = Request::put("/_matrix/app/v1/transactions/1")
        .body(Body::from(json!({ "events": [] }).to_string()))
        .expect("request");
    let response = app.clone().oneshot(missing).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["errcode"], "M_FORBIDDEN");

    let wrong = Request::put("/_matrix/app/v1/transactions/1")
        .header("authorization", "Bearer nope")
        .body(Body::from(
            json!({ "events": [text_event("$one", "hello")] }).to_string(),
        ))
        .expect("request");
    let response = app.oneshot(wrong).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(chatwoot.texts.lock().expect("texts").is_empty());
}

#[tokio::test]
async fn rejects_unparsable_transaction_body() {
    let (app, _storage, _chatwoot) = test_app().await;
    let request = Request::put("/_matrix/app/v1/transactions/1")
        .header("authorization", format!("Bearer {HS_TOKEN}"))
        .body(Body::from("{not json"))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["errcode"], "M_BAD_JSON");
}

#[tokio::test]
async fn skips_malformed_and_unrelated_events() {
    let (app, _storage, chatwoot) = test_app().await;
    let events = json!([
        { "type": "m.room.message" },
        {
            "event_id": "$member",
            "room_id": "!help:example.org",
            "sender": "@alice:example.org",
            "type": "m.room.member",
            "content": { "membership": "join" }
        },
        text_event("$ok", "still bridged")
    ]);

    let response = app
        .oneshot(transaction("/_matrix/app/v1/transactions/2", events))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        chatwoot.texts.lock().expect("texts").as_slice(),
        &[(
            ConversationId(40),
            "still bridged".to_string(),
            MessageDirection::Inbound
        )]
    );
}

#[tokio::test]
async fn redaction_deletes_bridged_message() {
    let (app, storage, chatwoot) = test_app().await;
    storage
        .insert_room_conversation(&RoomId::from("!help:example.org"), ConversationId(40))
        .await
        .expect("room");
    storage
        .insert_event_message(&EventId::from("$one"), ChatwootMessageId(101))
        .await
        .expect("event");

    let response = app
        .oneshot(transaction(
            "/_matrix/app/v1/transactions/9",
            json!([{
                "event_id": "$redaction",
                "room_id": "!help:example.org",
                "sender": "@alice:example.org",
                "type": "m.room.redaction",
                "redacts": "$one",
                "content": {}
            }]),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        chatwoot.deleted.lock().expect("deleted").as_slice(),
        &[(ConversationId(40), ChatwootMessageId(101))]
    );
}

#[tokio::test]
async fn unknown_endpoints_use_matrix_error_body() {
    let (app, _storage, _chatwoot) = test_app().await;
    let request = Request::get("/_matrix/app/v1/users/@alice:example.org")
        .body(Body::empty())
        .expect("request");

    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["errcode"], "M_NOT_FOUND");
}

#[tokio::test]
async fn undecodable_message_is_dropped_without_failing_transaction() {
    let (app, storage, chatwoot) = test_app().await;
    let events = json!([
        {
            "event_id": "$broken",
            "room_id": "!help:example.org",
            "sender": "@alice:example.org",
            "type": "m.room.message",
            "content": {
                "msgtype": "m.image",
                "body": "cat.png",
                "file": {
                    "url": "mxc://example.org/encrypted",
                    "key": { "kty": "oct", "alg": "A256CTR" },
                    "iv": "AAAAAAAAAAAAAAAAAAAAAA",
                    "hashes": { "sha256": "abc" }
                }
            }
        },
        text_event("$fine", "hello")
    ]);

    let response = app
        .oneshot(transaction("/_matrix/app/v1/transactions/4", events))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(chatwoot.texts.lock().expect("texts").len(), 1);
    assert_eq!(
        storage
            .message_for_event(&EventId::from("$broken"))
            .await
            .expect("event"),
        None
    );
}

#[tokio::test]
async fn events_of_one_room_are_bridged_in_delivery_order() {
    let (app, _storage, chatwoot) = test_app_with(RecordingChatwoot {
        slow_body: Some("first"),
        ..Default::default()
    })
    .await;
    let events = json!([text_event("$a", "first"), text_event("$b", "second")]);

    let response = app
        .oneshot(transaction("/_matrix/app/v1/transactions/5", events))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bodies: Vec<String> = chatwoot
        .texts
        .lock()
        .expect("texts")
        .iter()
        .map(|(_, body, _)| body.clone())
        .collect();
    assert_eq!(bodies, ["first", "second"]);
}
