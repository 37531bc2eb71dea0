//! In-process pipeline with scripted oracles and in-memory stores.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use concierge_agent::calendar::StaticCalendar;
use concierge_agent::llm::ScriptedLlm;
use concierge_channel::{RecordingTransport, WebhookPayload};
use concierge_core::config::AppConfig;
use concierge_core::domain::session::Session;
use concierge_core::knowledge::KnowledgeBase;
use concierge_core::{ManualClock, MemoryCache};
use concierge_db::{
    InMemoryBookingRepository, InMemoryMessageLogRepository, InMemoryOutboundLogRepository,
    InMemoryPolicyRepository, InMemorySessionRepository, SessionRepository,
};

use crate::bootstrap::{assemble, Oracles, Stores};
use crate::orchestrator::{Ack, Orchestrator};
use crate::routes::AppState;

pub(crate) struct Harness {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<ScriptedLlm>,
    pub calendar: Arc<StaticCalendar>,
    pub transport: Arc<RecordingTransport>,
    pub sessions: Arc<InMemorySessionRepository>,
    pub messages: Arc<InMemoryMessageLogRepository>,
    pub bookings: Arc<InMemoryBookingRepository>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
    stores: Stores,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_calendar(StaticCalendar::default())
    }

    pub fn with_calendar(calendar: StaticCalendar) -> Self {
        let config = AppConfig::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).single().expect("valid timestamp"),
        ));
        let sessions = Arc::new(InMemorySessionRepository::default());
        let messages = Arc::new(InMemoryMessageLogRepository::default());
        let bookings = Arc::new(InMemoryBookingRepository::default());
        let stores = Stores {
            sessions: sessions.clone(),
            messages: messages.clone(),
            outbound_log: Arc::new(InMemoryOutboundLogRepository::default()),
            bookings: bookings.clone(),
            policies: Arc::new(InMemoryPolicyRepository::with_policy("# test clinic policy")),
        };

        let llm = Arc::new(ScriptedLlm::default());
        let calendar = Arc::new(calendar);
        let transport = Arc::new(RecordingTransport::default());
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let oracles = Oracles {
            llm: llm.clone(),
            embedder: None,
            calendar: calendar.clone(),
            transport: transport.clone(),
        };
        let orchestrator =
            Arc::new(assemble(&config, &stores, oracles, corpus(), cache.clone(), clock.clone()));

        Self {
            config,
            orchestrator,
            llm,
            calendar,
            transport,
            sessions,
            messages,
            bookings,
            cache,
            clock,
            stores,
        }
    }

    /// Builds another pipeline over this harness's doubles, with the given
    /// stores.
    pub fn assemble(&self, stores: Stores) -> Orchestrator {
        assemble(
            &self.config,
            &stores,
            Oracles {
                llm: self.llm.clone(),
                embedder: None,
                calendar: self.calendar.clone(),
                transport: self.transport.clone(),
            },
            corpus(),
            self.cache.clone(),
            self.clock.clone(),
        )
    }

    pub fn stores(&self) -> Stores {
        self.stores.clone()
    }

    pub fn state(&self) -> AppState {
        AppState::new(
            self.orchestrator.clone(),
            &self.stores,
            self.clock.clone(),
            &self.config.policy,
        )
    }

    pub async fn handle_body(&self, body: Value) -> Ack {
        self.orchestrator
            .handle(&WebhookPayload::from_value(body))
            .await
            .expect("pipeline should not fail")
    }

    pub async fn session(&self, user_id: &str) -> Session {
        self.sessions.get(user_id).await.expect("session read").expect("session exists")
    }
}

fn corpus() -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::from_json(json!({
        "pricing": [{"name": "슈링크 유니버스", "price_krw": 199000}],
        "clinic": "주차는 건물 지하 2층에서 2시간 무료입니다.",
    })))
}

pub(crate) fn text_body(id: &str, person_type: &str, text: &str) -> Value {
    json!({
        "entity": {"id": id, "personType": person_type, "plainText": text},
        "refers": {"userChat": {"id": "chat-1", "userId": "user-1", "contactKey": "ck-1"}},
    })
}

pub(crate) fn attachment_body(id: &str, blocks: Value) -> Value {
    json!({
        "entity": {"id": id, "personType": "user", "plainText": "", "blocks": blocks},
        "refers": {"userChat": {"id": "chat-1", "userId": "user-1", "contactKey": "ck-1"}},
    })
}
