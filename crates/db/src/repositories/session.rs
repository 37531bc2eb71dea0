use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

use concierge_core::domain::session::{
    advance_activity, ActivitySnapshot, BookingState, ConversationState, IntentState, Mode,
    Session, SessionPatch,
};

use super::{
    decode_err, parse_optional_timestamp, parse_timestamp, ActivitySettings, RepositoryError,
    SessionRepository,
};
use crate::DbPool;

const SESSION_COLUMNS: &str = "user_id, mode, intent_state, conversation_count, conversation_state,
     booking_state_json, handoff_requests, mode_reason, mode_changed_at, last_message_time,
     last_updated_at";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_err)?;
    let mode_str: String = row.try_get("mode").map_err(decode_err)?;
    let intent_str: String = row.try_get("intent_state").map_err(decode_err)?;
    let conversation_count: i64 = row.try_get("conversation_count").map_err(decode_err)?;
    let conversation_state_str: String =
        row.try_get("conversation_state").map_err(decode_err)?;
    let booking_state_json: String = row.try_get("booking_state_json").map_err(decode_err)?;
    let handoff_requests: i64 = row.try_get("handoff_requests").map_err(decode_err)?;
    let mode_reason: Option<String> = row.try_get("mode_reason").map_err(decode_err)?;
    let mode_changed_at: Option<String> = row.try_get("mode_changed_at").map_err(decode_err)?;
    let last_message_time: Option<String> =
        row.try_get("last_message_time").map_err(decode_err)?;
    let last_updated_at: String = row.try_get("last_updated_at").map_err(decode_err)?;

    let mode = Mode::parse(&mode_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session mode `{mode_str}`")))?;

    let booking_state = match serde_json::from_str::<BookingState>(&booking_state_json) {
        Ok(state) => state,
        Err(error) => {
            warn!(
                event_name = "db.session.booking_state_invalid",
                user_id = %user_id,
                error = %error,
                "stored booking state is not decodable; using an empty one"
            );
            BookingState::default()
        }
    };

    Ok(Session {
        mode,
        intent_state: IntentState::parse_or_idle(&intent_str),
        conversation_count: u32::try_from(conversation_count).unwrap_or(0),
        conversation_state: ConversationState::parse(&conversation_state_str).unwrap_or_default(),
        booking_state,
        handoff_requests: u32::try_from(handoff_requests).unwrap_or(0),
        mode_reason,
        mode_changed_at: parse_optional_timestamp(mode_changed_at)?,
        last_message_time: parse_optional_timestamp(last_message_time)?,
        last_updated_at: parse_timestamp(&last_updated_at)?,
        user_id,
    })
}

impl SqlSessionRepository {
    async fn load<'e, E>(executor: E, user_id: &str) -> Result<Option<Session>, RepositoryError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?"))
            .bind(user_id)
            .fetch_optional(executor)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn store<'e, E>(executor: E, session: &Session) -> Result<(), RepositoryError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let booking_state_json = serde_json::to_string(&session.booking_state)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO sessions (user_id, mode, intent_state, conversation_count,
                                   conversation_state, booking_state_json, handoff_requests,
                                   mode_reason, mode_changed_at, last_message_time, last_updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 mode = excluded.mode,
                 intent_state = excluded.intent_state,
                 conversation_count = excluded.conversation_count,
                 conversation_state = excluded.conversation_state,
                 booking_state_json = excluded.booking_state_json,
                 handoff_requests = excluded.handoff_requests,
                 mode_reason = excluded.mode_reason,
                 mode_changed_at = excluded.mode_changed_at,
                 last_message_time = excluded.last_message_time,
                 last_updated_at = excluded.last_updated_at",
        )
        .bind(&session.user_id)
        .bind(session.mode.as_str())
        .bind(session.intent_state.as_str())
        .bind(i64::from(session.conversation_count))
        .bind(session.conversation_state.as_str())
        .bind(booking_state_json)
        .bind(i64::from(session.handoff_requests))
        .bind(&session.mode_reason)
        .bind(session.mode_changed_at.map(|dt| dt.to_rfc3339()))
        .bind(session.last_message_time.map(|dt| dt.to_rfc3339()))
        .bind(session.last_updated_at.to_rfc3339())
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Read-modify-write under the database write lock. `BEGIN IMMEDIATE`
    /// takes the lock before the read, so concurrent writers queue on
    /// `busy_timeout` instead of failing the read-to-write upgrade.
    async fn update<F, T>(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        mutate: F,
    ) -> Result<T, RepositoryError>
    where
        F: FnOnce(Option<&Session>, &mut Session) -> T + Send,
        T: Send,
    {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let existing = Self::load(&mut *tx, user_id).await?;
        let mut session = existing.clone().unwrap_or_else(|| Session::fresh(user_id, now));
        let output = mutate(existing.as_ref(), &mut session);
        Self::store(&mut *tx, &session).await?;
        tx.commit().await?;
        Ok(output)
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get(&self, user_id: &str) -> Result<Option<Session>, RepositoryError> {
        Self::load(&self.pool, user_id).await
    }

    async fn merge(&self, user_id: &str, patch: SessionPatch) -> Result<(), RepositoryError> {
        let now = patch.last_updated_at;
        self.update(user_id, now, |_, session| session.apply(&patch)).await
    }

    async fn record_activity(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        settings: ActivitySettings,
    ) -> Result<ActivitySnapshot, RepositoryError> {
        self.update(user_id, now, |previous, session| {
            let snapshot = advance_activity(previous, now, settings.window, settings.threshold);
            session.conversation_count = snapshot.count;
            session.conversation_state = snapshot.state;
            session.last_message_time = Some(now);
            session.last_updated_at = now;
            snapshot
        })
        .await
    }

    async fn merge_booking_state(
        &self,
        user_id: &str,
        booking_state: BookingState,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.update(user_id, now, |_, session| {
            session.apply(&SessionPatch::booking(booking_state, now));
        })
        .await
    }

    async fn increment_handoff_requests(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        self.update(user_id, now, |_, session| {
            session.handoff_requests = session.handoff_requests.saturating_add(1);
            session.last_updated_at = now;
            session.handoff_requests
        })
        .await
    }

    async fn list_by_mode(&self, mode: Mode) -> Result<Vec<Session>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE mode = ? ORDER BY last_updated_at ASC"
        ))
        .bind(mode.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>()
    }

    async fn list_pending_bookings(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE json_extract(booking_state_json, '$.step') IS NOT NULL
               AND json_extract(booking_state_json, '$.step') != 'confirmed'
             ORDER BY last_updated_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use concierge_core::domain::session::{
        BookingState, BookingStep, ConversationState, IntentState, Mode, SessionPatch,
    };

    use super::SqlSessionRepository;
    use crate::repositories::{ActivitySettings, SessionRepository};
    use crate::{connect_with_settings, migrations};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, minute, 0).single().expect("valid timestamp")
    }

    fn settings() -> ActivitySettings {
        ActivitySettings { window: Duration::minutes(10), threshold: 3 }
    }

    async fn repo() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    #[tokio::test]
    async fn merge_creates_then_partially_updates() {
        let repo = repo().await;

        repo.merge("user-1", SessionPatch::intent(IntentState::AwaitingInfo, at(0)))
            .await
            .expect("create");
        repo.merge("user-1", SessionPatch::mode(Mode::HumanMode, "manager_message", at(1)))
            .await
            .expect("update");

        let session = repo.get("user-1").await.expect("get").expect("session exists");
        assert_eq!(session.mode, Mode::HumanMode);
        assert_eq!(session.intent_state, IntentState::AwaitingInfo);
        assert_eq!(session.mode_reason.as_deref(), Some("manager_message"));
        assert_eq!(session.last_updated_at, at(1));
    }

    #[tokio::test]
    async fn touch_stamps_the_callers_clock_without_other_changes() {
        let repo = repo().await;
        repo.merge("user-1", SessionPatch::intent(IntentState::AwaitingInfo, at(0)))
            .await
            .expect("create");
        repo.merge("user-1", SessionPatch::touch(at(9))).await.expect("touch");

        let session = repo.get("user-1").await.expect("get").expect("session exists");
        assert_eq!(session.last_updated_at, at(9));
        assert_eq!(session.intent_state, IntentState::AwaitingInfo);
        assert_eq!(session.mode, Mode::AiMode);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_a_file_database_all_succeed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("sessions.db").display());
        let pool = connect_with_settings(&url, 5, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = Arc::new(SqlSessionRepository::new(pool));

        let mut tasks = Vec::new();
        for task in 0..40u32 {
            let repo = Arc::clone(&repo);
            tasks.push(tokio::spawn(async move {
                let user_id = format!("user-{}", task % 4);
                if task % 2 == 0 {
                    repo.record_activity(&user_id, at(0), settings()).await.map(|_| ())
                } else {
                    repo.merge(&user_id, SessionPatch::intent(IntentState::AwaitingInfo, at(0)))
                        .await
                }
            }));
        }

        let mut failures = Vec::new();
        for task in tasks {
            if let Err(error) = task.await.expect("task joins") {
                failures.push(error.to_string());
            }
        }
        assert!(failures.is_empty(), "writes failed: {failures:?}");

        for user in 0..4 {
            let session =
                repo.get(&format!("user-{user}")).await.expect("get").expect("session exists");
            assert_eq!(session.conversation_count, 5, "no activity tick may be lost");
            assert_eq!(session.intent_state, IntentState::AwaitingInfo);
        }
    }

    #[tokio::test]
    async fn missing_session_reads_as_none() {
        let repo = repo().await;
        assert_eq!(repo.get("nobody").await.expect("get"), None);
    }

    #[tokio::test]
    async fn record_activity_counts_and_promotes() {
        let repo = repo().await;

        let mut last = None;
        for minute in [0, 2, 4] {
            last = Some(repo.record_activity("user-1", at(minute), settings()).await.expect("tick"));
        }

        let snapshot = last.expect("three ticks");
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.state, ConversationState::ConsultationReady);

        let session = repo.get("user-1").await.expect("get").expect("session exists");
        assert_eq!(session.last_message_time, Some(at(4)));
        assert_eq!(session.conversation_count, 3);
    }

    #[tokio::test]
    async fn record_activity_does_not_reset_mode() {
        let repo = repo().await;
        repo.merge("user-1", SessionPatch::mode(Mode::HumanMode, "attachment", at(0)))
            .await
            .expect("handoff");

        repo.record_activity("user-1", at(1), settings()).await.expect("tick");

        let session = repo.get("user-1").await.expect("get").expect("session exists");
        assert_eq!(session.mode, Mode::HumanMode);
    }

    #[tokio::test]
    async fn booking_state_merges_field_by_field() {
        let repo = repo().await;
        repo.merge_booking_state(
            "user-1",
            BookingState {
                step: Some(BookingStep::AwaitingInfo),
                proposed_time: Some(at(30)),
                ..BookingState::default()
            },
            at(0),
        )
        .await
        .expect("first merge");
        repo.merge_booking_state(
            "user-1",
            BookingState { customer_name: Some("김민지".to_string()), ..BookingState::default() },
            at(1),
        )
        .await
        .expect("second merge");

        let session = repo.get("user-1").await.expect("get").expect("session exists");
        assert_eq!(session.booking_state.step, Some(BookingStep::AwaitingInfo));
        assert_eq!(session.booking_state.proposed_time, Some(at(30)));
        assert_eq!(session.booking_state.customer_name.as_deref(), Some("김민지"));

        let pending = repo.list_pending_bookings().await.expect("pending");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn confirmed_bookings_are_not_pending() {
        let repo = repo().await;
        repo.merge_booking_state(
            "user-1",
            BookingState { step: Some(BookingStep::Confirmed), ..BookingState::default() },
            at(0),
        )
        .await
        .expect("merge");
        repo.merge("user-2", SessionPatch::touch(at(0))).await.expect("touch");

        assert!(repo.list_pending_bookings().await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn handoff_counter_and_mode_listing() {
        let repo = repo().await;
        assert_eq!(repo.increment_handoff_requests("user-1", at(0)).await.expect("first"), 1);
        assert_eq!(repo.increment_handoff_requests("user-1", at(1)).await.expect("second"), 2);

        repo.merge("user-2", SessionPatch::mode(Mode::HumanMode, "handoff", at(2)))
            .await
            .expect("handoff");

        let human = repo.list_by_mode(Mode::HumanMode).await.expect("list");
        let ids: Vec<&str> = human.iter().map(|s| s.user_id.as_str()).collect();
        assert_eq!(ids, vec!["user-2"]);
    }
}
