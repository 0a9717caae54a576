use anyhow::{Context, Result};
use async_trait::async_trait;
use bridge::MappingStore;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ChatwootMessageId, ConversationId, EventId, RoomId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRoomConversation {
    pub room_id: RoomId,
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_database_dir(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn conversation_for_room(&self, room_id: &RoomId) -> Result<Option<ConversationId>> {
        let row = sqlx::query("SELECT conversation_id FROM room_conversations WHERE room_id = ?")
            .bind(room_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to look up conversation for room {room_id}"))?;
        Ok(row.map(|r| ConversationId(r.get::<i64, _>(0))))
    }

    /// Mappings are never rewritten: inserting a room that is already mapped fails.
    pub async fn insert_room_conversation(
        &self,
        room_id: &RoomId,
        conversation_id: ConversationId,
    ) -> Result<()> {
        sqlx::query("INSERT INTO room_conversations (room_id, conversation_id) VALUES (?, ?)")
            .bind(room_id.as_str())
            .bind(conversation_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!("failed to map room {room_id} to conversation {conversation_id}")
            })?;
        Ok(())
    }

    pub async fn room_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<RoomId>> {
        let row = sqlx::query(
            "SELECT room_id FROM room_conversations
             WHERE conversation_id = ?
             ORDER BY created_at LIMIT 1",
        )
        .bind(conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| RoomId(r.get::<String, _>(0))))
    }

    pub async fn list_room_conversations(&self) -> Result<Vec<StoredRoomConversation>> {
        let rows = sqlx::query(
            "SELECT room_id, conversation_id, created_at
             FROM room_conversations
             ORDER BY created_at, room_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredRoomConversation {
                room_id: RoomId(r.get::<String, _>(0)),
                conversation_id: ConversationId(r.get::<i64, _>(1)),
                created_at: r.get::<DateTime<Utc>, _>(2),
            })
            .collect())
    }

    pub async fn message_for_event(&self, event_id: &EventId) -> Result<Option<ChatwootMessageId>> {
        let row = sqlx::query("SELECT message_id FROM event_messages WHERE event_id = ?")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to look up message for event {event_id}"))?;
        Ok(row.map(|r| ChatwootMessageId(r.get::<i64, _>(0))))
    }

    pub async fn insert_event_message(
        &self,
        event_id: &EventId,
        message_id: ChatwootMessageId,
    ) -> Result<()> {
        sqlx::query("INSERT INTO event_messages (event_id, message_id) VALUES (?, ?)")
            .bind(event_id.as_str())
            .bind(message_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to map event {event_id} to message {message_id}"))?;
        Ok(())
    }

    pub async fn count_event_messages(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Creates the directory that will hold a file-backed database.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    match sqlite_file(database_url).as_deref().and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
            .with_context(|| format!("cannot create '{}' for {database_url}", dir.display())),
        _ => Ok(()),
    }
}

fn sqlite_file(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty() && !path.starts_with(":memory:")).then(|| PathBuf::from(path))
}

#[async_trait]
impl MappingStore for Storage {
    async fn conversation_for_room(&self, room_id: &RoomId) -> Result<Option<ConversationId>> {
        Storage::conversation_for_room(self, room_id).await
    }

    async fn set_conversation_for_room(
        &self,
        room_id: &RoomId,
        conversation_id: ConversationId,
    ) -> Result<()> {
        self.insert_room_conversation(room_id, conversation_id).await
    }

    async fn message_for_event(&self, event_id: &EventId) -> Result<Option<ChatwootMessageId>> {
        Storage::message_for_event(self, event_id).await
    }

    async fn set_message_for_event(
        &self,
        event_id: &EventId,
        message_id: ChatwootMessageId,
    ) -> Result<()> {
        self.insert_event_message(event_id, message_id).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
