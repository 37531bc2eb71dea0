use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use concierge_core::domain::booking::{BookingCooldown, BookingRecord, OutboundRecord};
use concierge_core::domain::message::MessageRecord;
use concierge_core::domain::session::{
    advance_activity, ActivitySnapshot, BookingState, Mode, Session, SessionPatch,
};

use super::{
    ActivitySettings, BookingRepository, MessageLogRepository, OutboundLogRepository,
    PolicyRepository, RepositoryError, SessionRepository,
};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.user_id.clone(), session);
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn merge(&self, user_id: &str, patch: SessionPatch) -> Result<(), RepositoryError> {
        let now = patch.last_updated_at;
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session::fresh(user_id, now))
            .apply(&patch);
        Ok(())
    }

    async fn record_activity(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        settings: ActivitySettings,
    ) -> Result<ActivitySnapshot, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let snapshot =
            advance_activity(sessions.get(user_id), now, settings.window, settings.threshold);
        let session =
            sessions.entry(user_id.to_string()).or_insert_with(|| Session::fresh(user_id, now));
        session.conversation_count = snapshot.count;
        session.conversation_state = snapshot.state;
        session.last_message_time = Some(now);
        session.last_updated_at = now;
        Ok(snapshot)
    }

    async fn merge_booking_state(
        &self,
        user_id: &str,
        booking_state: BookingState,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.merge(user_id, SessionPatch::booking(booking_state, now)).await
    }

    async fn increment_handoff_requests(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session =
            sessions.entry(user_id.to_string()).or_insert_with(|| Session::fresh(user_id, now));
        session.handoff_requests = session.handoff_requests.saturating_add(1);
        session.last_updated_at = now;
        Ok(session.handoff_requests)
    }

    async fn list_by_mode(&self, mode: Mode) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> =
            sessions.values().filter(|session| session.mode == mode).cloned().collect();
        matching.sort_by_key(|session| session.last_updated_at);
        Ok(matching)
    }

    async fn list_pending_bookings(&self) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut pending: Vec<Session> = sessions
            .values()
            .filter(|session| session.booking_state.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|session| session.last_updated_at);
        Ok(pending)
    }
}

#[derive(Default)]
pub struct InMemoryMessageLogRepository {
    records: RwLock<Vec<MessageRecord>>,
}

impl InMemoryMessageLogRepository {
    pub async fn all(&self) -> Vec<MessageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl MessageLogRepository for InMemoryMessageLogRepository {
    async fn append(&self, record: MessageRecord) -> Result<(), RepositoryError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut mine: Vec<MessageRecord> =
            records.iter().filter(|record| record.user_id == user_id).cloned().collect();
        mine.sort_by_key(|record| record.created_at);
        let skip = mine.len().saturating_sub(limit as usize);
        Ok(mine.split_off(skip))
    }
}

#[derive(Default)]
pub struct InMemoryOutboundLogRepository {
    message_ids: RwLock<HashSet<String>>,
}

#[async_trait::async_trait]
impl OutboundLogRepository for InMemoryOutboundLogRepository {
    async fn record(&self, record: OutboundRecord) -> Result<(), RepositoryError> {
        self.message_ids.write().await.insert(record.message_id);
        Ok(())
    }

    async fn exists(&self, message_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.message_ids.read().await.contains(message_id))
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<Vec<BookingRecord>>,
    cooldowns: RwLock<HashMap<String, BookingCooldown>>,
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: BookingRecord) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.write().await;
        bookings.retain(|existing| existing.event_id != booking.event_id);
        bookings.push(booking);
        Ok(())
    }

    async fn save_cooldown(&self, cooldown: BookingCooldown) -> Result<(), RepositoryError> {
        self.cooldowns.write().await.insert(cooldown.user_id.clone(), cooldown);
        Ok(())
    }

    async fn find_cooldown(
        &self,
        user_id: &str,
    ) -> Result<Option<BookingCooldown>, RepositoryError> {
        Ok(self.cooldowns.read().await.get(user_id).cloned())
    }

    async fn list_recent(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError> {
        let bookings = self.bookings.read().await;
        let mut matching: Vec<BookingRecord> = bookings
            .iter()
            .filter(|booking| user_id.map_or(true, |user_id| booking.user_id == user_id))
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn count_cooldowns(&self) -> Result<u64, RepositoryError> {
        Ok(self.cooldowns.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    content: RwLock<Option<String>>,
}

impl InMemoryPolicyRepository {
    pub fn with_policy(content: impl Into<String>) -> Self {
        Self { content: RwLock::new(Some(content.into())) }
    }
}

#[async_trait::async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn active_policy(&self) -> Result<Option<String>, RepositoryError> {
        Ok(self.content.read().await.clone())
    }
}
