use async_trait::async_trait;
use sqlx::{postgres::PgRow, Executor, Pool, Row};
use uuid::Uuid;

use super::Database;
use crate::entities::ChatMessage;
use crate::error::Error;
use crate::store::ChatLog;

pub struct PgChatLog {
    pool: Pool<Database>,
}

impl PgChatLog {
    pub fn new(pool: Pool<Database>) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &PgRow) -> Result<ChatMessage, Error> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        ride_id: row.try_get("ride_id")?,
        sender_id: row.try_get("sender_id")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ChatLog for PgChatLog {
    #[tracing::instrument(skip_all, fields(ride_id = %message.ride_id))]
    async fn append(&self, message: &ChatMessage) -> Result<ChatMessage, Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO chat_messages (id, ride_id, sender_id, message, is_read, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&message.id)
            .bind(&message.ride_id)
            .bind(&message.sender_id)
            .bind(&message.message)
            .bind(message.is_read)
            .bind(&message.created_at),
        )
        .await?;

        Ok(message.clone())
    }

    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<ChatMessage>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query(
                    "SELECT * FROM chat_messages WHERE ride_id = $1 ORDER BY created_at ASC, seq ASC",
                )
                .bind(&ride_id),
            )
            .await?;

        rows.iter().map(message_from_row).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn mark_read(&self, ride_id: Uuid, reader_id: Uuid) -> Result<u64, Error> {
        let mut conn = self.pool.acquire().await?;

        let result = conn
            .execute(
                sqlx::query(
                    "UPDATE chat_messages SET is_read = TRUE WHERE ride_id = $1 AND sender_id <> $2 AND is_read = FALSE",
                )
                .bind(&ride_id)
                .bind(&reader_id),
            )
            .await?;

        Ok(result.rows_affected())
    }
}
