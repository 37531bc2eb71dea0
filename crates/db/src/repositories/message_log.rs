use sqlx::Row;

use concierge_core::domain::booking::OutboundRecord;
use concierge_core::domain::message::{MessageRecord, Sender};

use super::{
    decode_err, parse_timestamp, MessageLogRepository, OutboundLogRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlMessageLogRepository {
    pool: DbPool,
}

impl SqlMessageLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_err)?;
    let chat_id: String = row.try_get("chat_id").map_err(decode_err)?;
    let sender_str: String = row.try_get("sender").map_err(decode_err)?;
    let text: String = row.try_get("text").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let sender = Sender::parse(&sender_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender `{sender_str}`")))?;

    Ok(MessageRecord { user_id, chat_id, sender, text, created_at: parse_timestamp(&created_at)? })
}

#[async_trait::async_trait]
impl MessageLogRepository for SqlMessageLogRepository {
    async fn append(&self, record: MessageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO message_log (user_id, chat_id, sender, text, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(&record.chat_id)
        .bind(record.sender.as_str())
        .bind(&record.text)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT user_id, chat_id, sender, text, created_at
             FROM message_log
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }
}

pub struct SqlOutboundLogRepository {
    pool: DbPool,
}

impl SqlOutboundLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboundLogRepository for SqlOutboundLogRepository {
    async fn record(&self, record: OutboundRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO outbound_messages (message_id, user_id, chat_id, text, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(message_id) DO NOTHING",
        )
        .bind(&record.message_id)
        .bind(&record.user_id)
        .bind(&record.chat_id)
        .bind(&record.text)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn exists(&self, message_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 AS found FROM outbound_messages WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}
