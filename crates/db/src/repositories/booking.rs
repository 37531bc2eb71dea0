use sqlx::Row;

use concierge_core::domain::booking::{BookingCooldown, BookingRecord, BookingStatus};

use super::{decode_err, parse_timestamp, BookingRepository, RepositoryError};
use crate::DbPool;

const BOOKING_COLUMNS: &str = "event_id, user_id, chat_id, customer_name, phone_number,
     selected_time, service_type, status, source, created_at";

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_booking(row: &sqlx::sqlite::SqliteRow) -> Result<BookingRecord, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(decode_err)?;
    let selected_time: String = row.try_get("selected_time").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status_str}`")))?;

    Ok(BookingRecord {
        event_id: row.try_get("event_id").map_err(decode_err)?,
        user_id: row.try_get("user_id").map_err(decode_err)?,
        chat_id: row.try_get("chat_id").map_err(decode_err)?,
        customer_name: row.try_get("customer_name").map_err(decode_err)?,
        phone_number: row.try_get("phone_number").map_err(decode_err)?,
        selected_time: parse_timestamp(&selected_time)?,
        service_type: row.try_get("service_type").map_err(decode_err)?,
        status,
        source: row.try_get("source").map_err(decode_err)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn insert(&self, booking: BookingRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bookings (event_id, user_id, chat_id, customer_name, phone_number,
                                   selected_time, service_type, status, source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(event_id) DO UPDATE SET
                 status = excluded.status,
                 customer_name = excluded.customer_name,
                 phone_number = excluded.phone_number",
        )
        .bind(&booking.event_id)
        .bind(&booking.user_id)
        .bind(&booking.chat_id)
        .bind(&booking.customer_name)
        .bind(&booking.phone_number)
        .bind(booking.selected_time.to_rfc3339())
        .bind(&booking.service_type)
        .bind(booking.status.as_str())
        .bind(&booking.source)
        .bind(booking.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_cooldown(&self, cooldown: BookingCooldown) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO booking_cooldowns (user_id, cooldown_end, last_booking_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 cooldown_end = excluded.cooldown_end,
                 last_booking_at = excluded.last_booking_at",
        )
        .bind(&cooldown.user_id)
        .bind(cooldown.cooldown_end.to_rfc3339())
        .bind(cooldown.last_booking_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_cooldown(
        &self,
        user_id: &str,
    ) -> Result<Option<BookingCooldown>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, cooldown_end, last_booking_at
             FROM booking_cooldowns WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let cooldown_end: String = row.try_get("cooldown_end").map_err(decode_err)?;
        let last_booking_at: String = row.try_get("last_booking_at").map_err(decode_err)?;
        Ok(Some(BookingCooldown {
            user_id: row.try_get("user_id").map_err(decode_err)?,
            cooldown_end: parse_timestamp(&cooldown_end)?,
            last_booking_at: parse_timestamp(&last_booking_at)?,
        }))
    }

    async fn list_recent(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = if let Some(user_id) = user_id {
            sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE user_id = ?
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 ORDER BY created_at DESC
                 LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_booking).collect::<Result<Vec<_>, _>>()
    }

    async fn count_cooldowns(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM booking_cooldowns")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")
            .map_err(decode_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
