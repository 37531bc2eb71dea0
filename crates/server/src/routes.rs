use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::error;

use concierge_channel::WebhookPayload;
use concierge_core::config::PolicyConfig;
use concierge_core::domain::booking::BookingRecord;
use concierge_core::domain::session::Mode;
use concierge_core::Clock;
use concierge_db::{BookingRepository, DbPool, RepositoryError, SessionRepository};

use crate::bootstrap::Stores;
use crate::health;
use crate::orchestrator::Orchestrator;

const DEFAULT_BOOKINGS_LIMIT: u32 = 10;
const MAX_BOOKINGS_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    sessions: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        stores: &Stores,
        clock: Arc<dyn Clock>,
        policy: &PolicyConfig,
    ) -> Self {
        Self {
            orchestrator,
            sessions: stores.sessions.clone(),
            bookings: stores.bookings.clone(),
            clock,
            stale_after: policy.human_timeout(),
        }
    }
}

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/status", get(status))
        .route("/bookings", get(bookings))
        .with_state(state)
        .merge(health::router(db_pool))
        .layer(TraceLayer::new_for_http())
}

/// Always answers 200 with a short acknowledgment unless the pipeline hit
/// an unexpected failure. Bodies that are not JSON classify as missing data.
pub async fn webhook(State(state): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    let value = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    match state.orchestrator.handle(&WebhookPayload::from_value(value)).await {
        Ok(ack) => (StatusCode::OK, ack.as_str()),
        Err(failure) => (StatusCode::INTERNAL_SERVER_ERROR, failure.user_message()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
}

type OperatorResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

fn operator_failure(
    event_name: &'static str,
    failure: RepositoryError,
) -> (StatusCode, Json<ErrorBody>) {
    error!(event_name, error = %failure, "operator query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "server_error" }))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HumanModeEntry {
    pub user_id: String,
    pub mode_reason: Option<String>,
    pub last_updated_at: String,
    pub minutes_ago: i64,
    pub needs_timeout: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingBookingEntry {
    pub user_id: String,
    pub step: Option<&'static str>,
    pub proposed_time: Option<String>,
    pub last_updated_at: String,
    pub minutes_ago: i64,
    pub needs_cleanup: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub checked_at: String,
    pub human_mode_sessions: Vec<HumanModeEntry>,
    pub pending_bookings: Vec<PendingBookingEntry>,
    pub booking_cooldowns: u64,
}

/// Operator snapshot: conversations held by staff, bookings stuck before
/// confirmation and the number of active cooldown rows.
pub async fn status(State(state): State<AppState>) -> OperatorResult<StatusResponse> {
    let now = state.clock.now();
    let age = |at: DateTime<Utc>| (now - at, (now - at).num_minutes());

    let human = state
        .sessions
        .list_by_mode(Mode::HumanMode)
        .await
        .map_err(|failure| operator_failure("operator.status.sessions_failed", failure))?;
    let pending = state
        .sessions
        .list_pending_bookings()
        .await
        .map_err(|failure| operator_failure("operator.status.bookings_failed", failure))?;
    let booking_cooldowns = state
        .bookings
        .count_cooldowns()
        .await
        .map_err(|failure| operator_failure("operator.status.cooldowns_failed", failure))?;

    let human_mode_sessions = human
        .into_iter()
        .map(|session| {
            let (elapsed, minutes_ago) = age(session.last_updated_at);
            HumanModeEntry {
                user_id: session.user_id,
                mode_reason: session.mode_reason,
                last_updated_at: session.last_updated_at.to_rfc3339(),
                minutes_ago,
                needs_timeout: elapsed > state.stale_after,
            }
        })
        .collect();
    let pending_bookings = pending
        .into_iter()
        .map(|session| {
            let (elapsed, minutes_ago) = age(session.last_updated_at);
            PendingBookingEntry {
                user_id: session.user_id,
                step: session.booking_state.step.map(|step| step.as_str()),
                proposed_time: session.booking_state.proposed_time.map(|at| at.to_rfc3339()),
                last_updated_at: session.last_updated_at.to_rfc3339(),
                minutes_ago,
                needs_cleanup: elapsed > state.stale_after,
            }
        })
        .collect();

    Ok(Json(StatusResponse {
        checked_at: now.to_rfc3339(),
        human_mode_sessions,
        pending_bookings,
        booking_cooldowns,
    }))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BookingsQuery {
    pub user_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookingsResponse {
    pub count: usize,
    pub bookings: Vec<BookingRecord>,
}

pub async fn bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
) -> OperatorResult<BookingsResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_BOOKINGS_LIMIT).clamp(1, MAX_BOOKINGS_LIMIT);
    let user_id = query.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty());

    let bookings = state
        .bookings
        .list_recent(user_id, limit)
        .await
        .map_err(|failure| operator_failure("operator.bookings.list_failed", failure))?;
    Ok(Json(BookingsResponse { count: bookings.len(), bookings }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use concierge_core::domain::booking::{BookingCooldown, BookingRecord, BookingStatus};
    use concierge_core::domain::session::{
        ActivitySnapshot, BookingState, BookingStep, Mode, Session, SessionPatch,
    };
    use concierge_core::Clock;
    use concierge_db::{
        connect_with_settings, ActivitySettings, BookingRepository, RepositoryError,
        SessionRepository,
    };

    use super::router;
    use crate::routes::AppState;
    use crate::testing::{text_body, Harness};

    async fn app(state: AppState) -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        router(state, pool)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8(bytes.to_vec()).expect("utf-8 body"))
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::post("/webhook")
            .header("content-type", "application/json")
            .body(body.into())
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    fn booking(event_id: &str, user_id: &str, created_at: DateTime<Utc>) -> BookingRecord {
        BookingRecord {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            chat_id: format!("chat-{user_id}"),
            customer_name: "김민지".to_string(),
            phone_number: "010-1234-5678".to_string(),
            selected_time: created_at + Duration::days(1),
            service_type: "일반 상담".to_string(),
            status: BookingStatus::Confirmed,
            source: "chatbot".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn webhook_acknowledges_with_plain_text() {
        let harness = Harness::new();
        harness.llm.push(Ok(json!({"action": "ANSWER", "response": ""}).to_string())).await;
        harness.llm.push(Ok("안녕하세요!".to_string())).await;
        let app = app(harness.state()).await;
        let body = text_body("m1", "user", "안녕하세요").to_string();

        assert_eq!(call(app.clone(), post(body.clone())).await, (StatusCode::OK, "ok".to_string()));
        assert_eq!(
            call(app.clone(), post(body)).await,
            (StatusCode::OK, "already_processed".to_string())
        );
        assert_eq!(
            call(app, post("not json")).await,
            (StatusCode::OK, "ignored: missing data".to_string())
        );
        assert_eq!(harness.transport.sent().await.len(), 1);
    }

    /// Session store that is down.
    struct UnavailableSessions;

    #[async_trait]
    impl SessionRepository for UnavailableSessions {
        async fn get(&self, _: &str) -> Result<Option<Session>, RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn merge(&self, _: &str, _: SessionPatch) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn record_activity(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: ActivitySettings,
        ) -> Result<ActivitySnapshot, RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn merge_booking_state(
            &self,
            _: &str,
            _: BookingState,
            _: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn increment_handoff_requests(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<u32, RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn list_by_mode(&self, _: Mode) -> Result<Vec<Session>, RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }

        async fn list_pending_bookings(&self) -> Result<Vec<Session>, RepositoryError> {
            Err(RepositoryError::Decode("store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_mode_switch_is_a_generic_server_error() {
        let harness = Harness::new();
        let mut stores = harness.stores();
        stores.sessions = Arc::new(UnavailableSessions);
        let orchestrator = Arc::new(harness.assemble(stores.clone()));
        let state =
            AppState::new(orchestrator, &stores, harness.clock.clone(), &harness.config.policy);
        let app = app(state).await;

        let body = text_body("m1", "manager", "제가 도와드릴게요").to_string();
        assert_eq!(
            call(app.clone(), post(body)).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error".to_string())
        );

        let (status, body) = call(app, get("/status")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["error"], "server_error");
    }

    #[tokio::test]
    async fn status_flags_stale_human_sessions_and_bookings() {
        let harness = Harness::new();
        harness.handle_body(text_body("m1", "manager", "상담원입니다")).await;
        let mut waiting = Session::fresh("user-2", harness.clock.now());
        waiting.booking_state = BookingState {
            step: Some(BookingStep::AwaitingInfo),
            proposed_time: Some(harness.clock.now() + Duration::days(1)),
            ..BookingState::default()
        };
        harness.sessions.insert(waiting).await;
        harness
            .bookings
            .save_cooldown(BookingCooldown {
                user_id: "user-3".to_string(),
                cooldown_end: harness.clock.now() + Duration::hours(24),
                last_booking_at: harness.clock.now(),
            })
            .await
            .expect("cooldown");

        harness.clock.advance(Duration::minutes(31));
        let (status, body) = call(app(harness.state()).await, get("/status")).await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).expect("json");
        let human = &body["human_mode_sessions"];
        assert_eq!(human.as_array().map(Vec::len), Some(1));
        assert_eq!(human[0]["user_id"], "user-1");
        assert_eq!(human[0]["minutes_ago"], 31);
        assert_eq!(human[0]["needs_timeout"], true);
        let pending = &body["pending_bookings"];
        assert_eq!(pending.as_array().map(Vec::len), Some(1));
        assert_eq!(pending[0]["user_id"], "user-2");
        assert_eq!(pending[0]["step"], "awaiting_info");
        assert_eq!(pending[0]["needs_cleanup"], true);
        assert_eq!(body["booking_cooldowns"], 1);
    }

    #[tokio::test]
    async fn bookings_are_newest_first_with_optional_user_filter() {
        let harness = Harness::new();
        let now = harness.clock.now();
        for (index, user) in ["user-1", "user-2", "user-1"].iter().enumerate() {
            let created_at = now + Duration::minutes(index as i64);
            harness
                .bookings
                .insert(booking(&format!("evt-{index}"), user, created_at))
                .await
                .expect("insert");
        }
        let app = app(harness.state()).await;

        let (status, body) = call(app.clone(), get("/bookings")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(body["count"], 3);
        assert_eq!(body["bookings"][0]["event_id"], "evt-2");

        let (_, body) = call(app.clone(), get("/bookings?user_id=user-1&limit=1")).await;
        let body: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(body["count"], 1);
        assert_eq!(body["bookings"][0]["event_id"], "evt-2");
        assert_eq!(body["bookings"][0]["status"], "confirmed");

        let (_, body) = call(app, get("/bookings?user_id=nobody")).await;
        let body: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn health_is_mounted_next_to_the_webhook() {
        let harness = Harness::new();
        let (status, body) = call(app(harness.state()).await, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"]["status"], "ready");
    }
}
