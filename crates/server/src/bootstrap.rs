use std::sync::Arc;

use concierge_agent::{
    CalendarClient, CalendarError, CreateFinalBooking, DecisionOracle, EmbeddingClient,
    GeminiClient, GeminiEmbedder, GenerationSettings, GoogleCalendarClient, LlmClient, LlmError,
    OracleContext, PromptAssembler, RequestHumanAgent, ResponseAssembler, RetrievalSettings,
    Retriever, SlotSearch, StartBookingProcess, ToolRegistry,
};
use concierge_channel::{ChatTransport, HttpChatTransport, OutboundSender, TransportError};
use concierge_core::config::{AppConfig, ConfigError, LoadOptions};
use concierge_core::knowledge::{KnowledgeBase, KnowledgeError};
use concierge_core::{Clock, IdempotencyMarkers, KeyValueCache, MemoryCache, SystemClock};
use concierge_db::{
    connect_with_settings, migrations, BookingRepository, DbPool, MessageLogRepository,
    OutboundLogRepository, PolicyRepository, SessionRepository, SqlBookingRepository,
    SqlMessageLogRepository, SqlOutboundLogRepository, SqlPolicyRepository, SqlSessionRepository,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::orchestrator::{Collaborators, Orchestrator};
use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    pub cache: Arc<MemoryCache>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("calendar client setup failed: {0}")]
    Calendar(#[from] CalendarError),
    #[error("chat transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Durable collaborators of the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageLogRepository>,
    pub outbound_log: Arc<dyn OutboundLogRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

impl Stores {
    pub fn sql(pool: &DbPool) -> Self {
        Self {
            sessions: Arc::new(SqlSessionRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageLogRepository::new(pool.clone())),
            outbound_log: Arc::new(SqlOutboundLogRepository::new(pool.clone())),
            bookings: Arc::new(SqlBookingRepository::new(pool.clone())),
            policies: Arc::new(SqlPolicyRepository::new(pool.clone())),
        }
    }
}

/// Remote services the pipeline talks to.
pub struct Oracles {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Option<Arc<dyn EmbeddingClient>>,
    pub calendar: Arc<dyn CalendarClient>,
    pub transport: Arc<dyn ChatTransport>,
}

impl Oracles {
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let embedder = GeminiEmbedder::from_config(&config.llm, config.policy.embed_max_chars)?;
        Ok(Self {
            llm: Arc::new(GeminiClient::from_config(&config.llm)?),
            embedder: Some(Arc::new(embedder)),
            calendar: Arc::new(GoogleCalendarClient::from_config(&config.calendar)?),
            transport: Arc::new(HttpChatTransport::from_config(&config.channel)?),
        })
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    warn_missing_credentials(&config);

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let corpus = Arc::new(KnowledgeBase::load(&config.knowledge.effective_corpus_path())?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
    let stores = Stores::sql(&db_pool);
    let orchestrator = assemble(
        &config,
        &stores,
        Oracles::from_config(&config)?,
        corpus,
        cache.clone(),
        clock.clone(),
    );
    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        tools = ?orchestrator.tool_names(),
        "webhook pipeline assembled"
    );

    let state = AppState::new(Arc::new(orchestrator), &stores, clock, &config.policy);
    Ok(Application { config, db_pool, state, cache })
}

fn warn_missing_credentials(config: &AppConfig) {
    for missing in config.missing_credentials() {
        warn!(
            event_name = "system.bootstrap.credential_missing",
            correlation_id = "bootstrap",
            key = missing.key_path(),
            impact = missing.impact(),
            "credential not configured; starting with reduced capability"
        );
    }
}

/// Wires tools, oracle adapters and the echo-guarded sender into one
/// pipeline.
pub fn assemble(
    config: &AppConfig,
    stores: &Stores,
    oracles: Oracles,
    corpus: Arc<KnowledgeBase>,
    cache: Arc<dyn KeyValueCache>,
    clock: Arc<dyn Clock>,
) -> Orchestrator {
    let region = config.region.offset();
    let slots = SlotSearch::new(oracles.calendar, region);

    let mut tools = ToolRegistry::default();
    tools.register(StartBookingProcess::new(
        slots.clone(),
        stores.sessions.clone(),
        clock.clone(),
        region,
    ));
    tools.register(RequestHumanAgent::new(
        stores.sessions.clone(),
        clock.clone(),
        config.policy.handoff_threshold,
    ));
    tools.register(CreateFinalBooking::new(
        slots,
        stores.bookings.clone(),
        stores.sessions.clone(),
        clock.clone(),
        config.region.clone(),
        config.policy.booking_cooldown(),
    ));

    let policy_ttl = config.policy.policy_cache_ttl();
    let prompts = PromptAssembler::new(stores.policies.clone(), clock.clone(), policy_ttl)
        .with_tool_declarations(tools.declarations());
    let retriever =
        Retriever::new(corpus, oracles.embedder, RetrievalSettings::from_policy(&config.policy));
    let context = OracleContext {
        llm: oracles.llm,
        retriever: Arc::new(retriever),
        prompts: Arc::new(prompts),
        history: stores.messages.clone(),
        clock: clock.clone(),
        region,
        history_limit: config.policy.history_limit,
    };
    let oracle = DecisionOracle::new(context.clone(), GenerationSettings::decision(&config.llm));
    let responder = ResponseAssembler::new(
        context,
        GenerationSettings::response(&config.llm),
        config.policy.response_limit,
        config.policy.min_cut,
    );

    let markers = IdempotencyMarkers::new(cache, config.cache.clone());
    let sender = OutboundSender::new(
        oracles.transport,
        markers.clone(),
        stores.outbound_log.clone(),
        clock.clone(),
    );

    Orchestrator::new(
        Collaborators {
            markers,
            sessions: stores.sessions.clone(),
            messages: stores.messages.clone(),
            outbound_log: stores.outbound_log.clone(),
            sender,
            oracle,
            tools,
            responder,
            clock,
        },
        &config.policy,
    )
}
