use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use concierge_core::domain::booking::{BookingCooldown, BookingRecord, OutboundRecord};
use concierge_core::domain::message::MessageRecord;
use concierge_core::domain::session::{ActivitySnapshot, BookingState, Mode, Session, SessionPatch};

pub mod booking;
pub mod memory;
pub mod message_log;
pub mod policy;
pub mod session;

pub use booking::SqlBookingRepository;
pub use memory::{
    InMemoryBookingRepository, InMemoryMessageLogRepository, InMemoryOutboundLogRepository,
    InMemoryPolicyRepository, InMemorySessionRepository,
};
pub use message_log::{SqlMessageLogRepository, SqlOutboundLogRepository};
pub use policy::SqlPolicyRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Rolling conversation counter rules applied by `record_activity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivitySettings {
    pub window: Duration,
    pub threshold: u32,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, RepositoryError>;

    /// Inserts a fresh session or applies the patch to the stored one.
    async fn merge(&self, user_id: &str, patch: SessionPatch) -> Result<(), RepositoryError>;

    /// Advances the conversation counter and stamps the message time.
    async fn record_activity(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        settings: ActivitySettings,
    ) -> Result<ActivitySnapshot, RepositoryError>;

    async fn merge_booking_state(
        &self,
        user_id: &str,
        booking_state: BookingState,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Returns the durable handoff request count after incrementing it.
    async fn increment_handoff_requests(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, RepositoryError>;

    async fn list_by_mode(&self, mode: Mode) -> Result<Vec<Session>, RepositoryError>;

    /// Sessions whose booking step is set and not yet confirmed.
    async fn list_pending_bookings(&self) -> Result<Vec<Session>, RepositoryError>;
}

#[async_trait]
pub trait MessageLogRepository: Send + Sync {
    async fn append(&self, record: MessageRecord) -> Result<(), RepositoryError>;

    /// The last `limit` records for the user, oldest first.
    async fn recent(&self, user_id: &str, limit: u32)
        -> Result<Vec<MessageRecord>, RepositoryError>;
}

#[async_trait]
pub trait OutboundLogRepository: Send + Sync {
    async fn record(&self, record: OutboundRecord) -> Result<(), RepositoryError>;
    async fn exists(&self, message_id: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: BookingRecord) -> Result<(), RepositoryError>;
    async fn save_cooldown(&self, cooldown: BookingCooldown) -> Result<(), RepositoryError>;
    async fn find_cooldown(&self, user_id: &str)
        -> Result<Option<BookingCooldown>, RepositoryError>;

    /// Most recent bookings first, optionally for one user.
    async fn list_recent(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError>;

    async fn count_cooldowns(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Content of the most recently updated active policy document.
    async fn active_policy(&self) -> Result<Option<String>, RepositoryError>;
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
