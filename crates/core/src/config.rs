use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub calendar: CalendarConfig,
    pub server: ServerConfig,
    pub region: RegionConfig,
    pub policy: PolicyConfig,
    pub cache: CacheConfig,
    pub knowledge: KnowledgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub base_url: String,
    pub access_key: Option<SecretString>,
    pub access_secret: Option<SecretString>,
    pub bot_name: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub decision_max_tokens: u32,
    pub response_max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub calendar_id: String,
    pub access_token: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Local time zone used for business hours, natural-language dates and
/// rendering booking times.
#[derive(Clone, Debug)]
pub struct RegionConfig {
    pub time_zone: String,
    pub utc_offset_minutes: i32,
}

/// Conversation policy knobs. Defaults reproduce production behavior.
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub human_timeout_mins: u64,
    pub conversation_window_mins: u64,
    pub consultation_threshold: u32,
    pub handoff_threshold: u32,
    pub reset_token: String,
    pub history_limit: u32,
    pub response_limit: usize,
    pub min_cut: usize,
    pub similarity_threshold: f32,
    pub snippet_max_chars: usize,
    pub embed_max_chars: usize,
    pub policy_cache_secs: u64,
    pub booking_cooldown_hours: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub inbound_ttl_secs: u64,
    pub outbound_ttl_secs: u64,
    pub debounce_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub corpus_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub channel_access_key: Option<String>,
    pub channel_access_secret: Option<String>,
    pub calendar_id: Option<String>,
    pub server_port: Option<u16>,
    pub corpus_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// A credential the process can start without, at reduced capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingCredential {
    ChannelAccessKey,
    ChannelAccessSecret,
    LlmApiKey,
    CalendarAccessToken,
}

impl MissingCredential {
    pub fn key_path(self) -> &'static str {
        match self {
            Self::ChannelAccessKey => "channel.access_key",
            Self::ChannelAccessSecret => "channel.access_secret",
            Self::LlmApiKey => "llm.api_key",
            Self::CalendarAccessToken => "calendar.access_token",
        }
    }

    pub fn impact(self) -> &'static str {
        match self {
            Self::ChannelAccessKey | Self::ChannelAccessSecret => "outbound chat replies disabled",
            Self::LlmApiKey => "decisions fall back to apology replies",
            Self::CalendarAccessToken => "availability checks fail open, bookings fail",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                base_url: "https://api.channel.io/open/v5".to_string(),
                access_key: None,
                access_secret: None,
                bot_name: "케어커넥트 AI".to_string(),
                timeout_secs: 10,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.5-flash".to_string(),
                embedding_model: "text-embedding-004".to_string(),
                timeout_secs: 30,
                decision_max_tokens: 500,
                response_max_tokens: 400,
                temperature: 0.7,
                top_p: 0.9,
                top_k: 50,
            },
            calendar: CalendarConfig {
                calendar_id: "primary".to_string(),
                access_token: None,
                base_url: "https://www.googleapis.com/calendar/v3".to_string(),
                timeout_secs: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            region: RegionConfig { time_zone: "Asia/Seoul".to_string(), utc_offset_minutes: 540 },
            policy: PolicyConfig {
                human_timeout_mins: 30,
                conversation_window_mins: 10,
                consultation_threshold: 3,
                handoff_threshold: 3,
                reset_token: "//".to_string(),
                history_limit: 10,
                response_limit: 250,
                min_cut: 100,
                similarity_threshold: 0.7,
                snippet_max_chars: 800,
                embed_max_chars: 2048,
                policy_cache_secs: 300,
                booking_cooldown_hours: 24,
            },
            cache: CacheConfig {
                inbound_ttl_secs: 600,
                outbound_ttl_secs: 60,
                debounce_secs: 2,
                sweep_interval_secs: 60,
            },
            knowledge: KnowledgeConfig { corpus_path: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn has_secret(value: &Option<SecretString>) -> bool {
    value.as_ref().map(|secret| !secret.expose_secret().trim().is_empty()).unwrap_or(false)
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl RegionConfig {
    /// Falls back to UTC for out-of-range offsets; `validate` rejects those.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

impl PolicyConfig {
    pub fn human_timeout(&self) -> ChronoDuration {
        minutes(self.human_timeout_mins)
    }

    pub fn conversation_window(&self) -> ChronoDuration {
        minutes(self.conversation_window_mins)
    }

    pub fn booking_cooldown(&self) -> ChronoDuration {
        minutes(self.booking_cooldown_hours.saturating_mul(60))
    }

    pub fn policy_cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.policy_cache_secs).unwrap_or(i64::MAX / 1_000))
    }
}

impl KnowledgeConfig {
    pub const DEFAULT_CORPUS_PATH: &'static str = "knowledge/clinic.json";

    pub fn effective_corpus_path(&self) -> PathBuf {
        self.corpus_path.clone().unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CORPUS_PATH))
    }
}

impl CacheConfig {
    pub fn inbound_ttl(&self) -> Duration {
        Duration::from_secs(self.inbound_ttl_secs)
    }

    pub fn outbound_ttl(&self) -> Duration {
        Duration::from_secs(self.outbound_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn minutes(value: u64) -> ChronoDuration {
    ChronoDuration::minutes(i64::try_from(value).unwrap_or(i64::MAX / 60_000))
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Credentials that are absent. The process still starts; callers log
    /// one warning per entry.
    pub fn missing_credentials(&self) -> Vec<MissingCredential> {
        let mut missing = Vec::new();
        if !has_secret(&self.channel.access_key) {
            missing.push(MissingCredential::ChannelAccessKey);
        }
        if !has_secret(&self.channel.access_secret) {
            missing.push(MissingCredential::ChannelAccessSecret);
        }
        if !has_secret(&self.llm.api_key) {
            missing.push(MissingCredential::LlmApiKey);
        }
        if !has_secret(&self.calendar.access_token) {
            missing.push(MissingCredential::CalendarAccessToken);
        }
        missing
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(base_url) = channel.base_url {
                self.channel.base_url = base_url;
            }
            if let Some(access_key) = channel.access_key {
                self.channel.access_key = Some(secret_value(access_key));
            }
            if let Some(access_secret) = channel.access_secret {
                self.channel.access_secret = Some(secret_value(access_secret));
            }
            if let Some(bot_name) = channel.bot_name {
                self.channel.bot_name = bot_name;
            }
            if let Some(timeout_secs) = channel.timeout_secs {
                self.channel.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(decision_max_tokens) = llm.decision_max_tokens {
                self.llm.decision_max_tokens = decision_max_tokens;
            }
            if let Some(response_max_tokens) = llm.response_max_tokens {
                self.llm.response_max_tokens = response_max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(top_p) = llm.top_p {
                self.llm.top_p = top_p;
            }
            if let Some(top_k) = llm.top_k {
                self.llm.top_k = top_k;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(calendar_id) = calendar.calendar_id {
                self.calendar.calendar_id = calendar_id;
            }
            if let Some(access_token) = calendar.access_token {
                self.calendar.access_token = Some(secret_value(access_token));
            }
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = base_url;
            }
            if let Some(timeout_secs) = calendar.timeout_secs {
                self.calendar.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(region) = patch.region {
            if let Some(time_zone) = region.time_zone {
                self.region.time_zone = time_zone;
            }
            if let Some(utc_offset_minutes) = region.utc_offset_minutes {
                self.region.utc_offset_minutes = utc_offset_minutes;
            }
        }

        if let Some(policy) = patch.policy {
            self.policy.apply_patch(policy);
        }

        if let Some(cache) = patch.cache {
            if let Some(inbound_ttl_secs) = cache.inbound_ttl_secs {
                self.cache.inbound_ttl_secs = inbound_ttl_secs;
            }
            if let Some(outbound_ttl_secs) = cache.outbound_ttl_secs {
                self.cache.outbound_ttl_secs = outbound_ttl_secs;
            }
            if let Some(debounce_secs) = cache.debounce_secs {
                self.cache.debounce_secs = debounce_secs;
            }
            if let Some(sweep_interval_secs) = cache.sweep_interval_secs {
                self.cache.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(corpus_path) = knowledge.corpus_path {
                self.knowledge.corpus_path = Some(corpus_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let access_key =
            read_env("CONCIERGE_CHANNEL_ACCESS_KEY").or_else(|| read_env("CHANNELTALK_ACCESS_KEY"));
        if let Some(value) = access_key {
            self.channel.access_key = Some(secret_value(value));
        }
        let access_secret = read_env("CONCIERGE_CHANNEL_ACCESS_SECRET")
            .or_else(|| read_env("CHANNELTALK_ACCESS_SECRET"));
        if let Some(value) = access_secret {
            self.channel.access_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_CHANNEL_BASE_URL") {
            self.channel.base_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_CHANNEL_BOT_NAME") {
            self.channel.bot_name = value;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("CONCIERGE_LLM_API_KEY").or_else(|| read_env("GEMINI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }

        let calendar_id =
            read_env("CONCIERGE_CALENDAR_ID").or_else(|| read_env("GOOGLE_CALENDAR_ID"));
        if let Some(value) = calendar_id {
            self.calendar.calendar_id = value;
        }
        if let Some(value) = read_env("CONCIERGE_CALENDAR_ACCESS_TOKEN") {
            self.calendar.access_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_PORT") {
            self.server.port = parse_u16("CONCIERGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_POLICY_HUMAN_TIMEOUT_MINS") {
            self.policy.human_timeout_mins =
                parse_u64("CONCIERGE_POLICY_HUMAN_TIMEOUT_MINS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_POLICY_HANDOFF_THRESHOLD") {
            self.policy.handoff_threshold =
                parse_u32("CONCIERGE_POLICY_HANDOFF_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_KNOWLEDGE_CORPUS_PATH") {
            self.knowledge.corpus_path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(access_key) = overrides.channel_access_key {
            self.channel.access_key = Some(secret_value(access_key));
        }
        if let Some(access_secret) = overrides.channel_access_secret {
            self.channel.access_secret = Some(secret_value(access_secret));
        }
        if let Some(calendar_id) = overrides.calendar_id {
            self.calendar.calendar_id = calendar_id;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(corpus_path) = overrides.corpus_path {
            self.knowledge.corpus_path = Some(corpus_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_llm(&self.llm)?;
        validate_calendar(&self.calendar)?;
        validate_server(&self.server)?;
        validate_region(&self.region)?;
        validate_policy(&self.policy)?;
        validate_cache(&self.cache)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl PolicyConfig {
    fn apply_patch(&mut self, patch: PolicyPatch) {
        if let Some(value) = patch.human_timeout_mins {
            self.human_timeout_mins = value;
        }
        if let Some(value) = patch.conversation_window_mins {
            self.conversation_window_mins = value;
        }
        if let Some(value) = patch.consultation_threshold {
            self.consultation_threshold = value;
        }
        if let Some(value) = patch.handoff_threshold {
            self.handoff_threshold = value;
        }
        if let Some(value) = patch.reset_token {
            self.reset_token = value;
        }
        if let Some(value) = patch.history_limit {
            self.history_limit = value;
        }
        if let Some(value) = patch.response_limit {
            self.response_limit = value;
        }
        if let Some(value) = patch.min_cut {
            self.min_cut = value;
        }
        if let Some(value) = patch.similarity_threshold {
            self.similarity_threshold = value;
        }
        if let Some(value) = patch.snippet_max_chars {
            self.snippet_max_chars = value;
        }
        if let Some(value) = patch.embed_max_chars {
            self.embed_max_chars = value;
        }
        if let Some(value) = patch.policy_cache_secs {
            self.policy_cache_secs = value;
        }
        if let Some(value) = patch.booking_cooldown_hours {
            self.booking_cooldown_hours = value;
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_timeout(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    validate_http_url("channel.base_url", &channel.base_url)?;
    validate_timeout("channel.timeout_secs", channel.timeout_secs)?;
    if channel.bot_name.trim().is_empty() {
        return Err(ConfigError::Validation("channel.bot_name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    validate_http_url("llm.base_url", &llm.base_url)?;
    validate_timeout("llm.timeout_secs", llm.timeout_secs)?;

    if llm.model.trim().is_empty() || llm.embedding_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.model and llm.embedding_model must not be empty".to_string(),
        ));
    }
    if llm.decision_max_tokens == 0 || llm.response_max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm max token limits must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&llm.top_p) {
        return Err(ConfigError::Validation("llm.top_p must be in range 0.0..=1.0".to_string()));
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    validate_http_url("calendar.base_url", &calendar.base_url)?;
    validate_timeout("calendar.timeout_secs", calendar.timeout_secs)?;
    if calendar.calendar_id.trim().is_empty() {
        return Err(ConfigError::Validation("calendar.calendar_id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_region(region: &RegionConfig) -> Result<(), ConfigError> {
    // chrono accepts offsets strictly inside one day.
    if region.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(ConfigError::Validation(
            "region.utc_offset_minutes must be within -1439..=1439".to_string(),
        ));
    }
    if region.time_zone.trim().is_empty() {
        return Err(ConfigError::Validation("region.time_zone must not be empty".to_string()));
    }
    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.human_timeout_mins == 0 || policy.conversation_window_mins == 0 {
        return Err(ConfigError::Validation(
            "policy timeouts and windows must be greater than zero".to_string(),
        ));
    }
    if policy.consultation_threshold == 0 || policy.handoff_threshold == 0 {
        return Err(ConfigError::Validation(
            "policy thresholds must be greater than zero".to_string(),
        ));
    }
    if policy.reset_token.trim().is_empty() {
        return Err(ConfigError::Validation("policy.reset_token must not be empty".to_string()));
    }
    if policy.response_limit <= 3 || policy.min_cut >= policy.response_limit {
        return Err(ConfigError::Validation(
            "policy.min_cut must be smaller than policy.response_limit (which must exceed 3)"
                .to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&policy.similarity_threshold) {
        return Err(ConfigError::Validation(
            "policy.similarity_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }
    if policy.snippet_max_chars == 0 || policy.embed_max_chars == 0 {
        return Err(ConfigError::Validation(
            "policy snippet and embed limits must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.inbound_ttl_secs == 0
        || cache.outbound_ttl_secs == 0
        || cache.debounce_secs == 0
        || cache.sweep_interval_secs == 0
    {
        return Err(ConfigError::Validation(
            "cache TTLs and sweep interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    llm: Option<LlmPatch>,
    calendar: Option<CalendarPatch>,
    server: Option<ServerPatch>,
    region: Option<RegionPatch>,
    policy: Option<PolicyPatch>,
    cache: Option<CachePatch>,
    knowledge: Option<KnowledgePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    base_url: Option<String>,
    access_key: Option<String>,
    access_secret: Option<String>,
    bot_name: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
    decision_max_tokens: Option<u32>,
    response_max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    calendar_id: Option<String>,
    access_token: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegionPatch {
    time_zone: Option<String>,
    utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    human_timeout_mins: Option<u64>,
    conversation_window_mins: Option<u64>,
    consultation_threshold: Option<u32>,
    handoff_threshold: Option<u32>,
    reset_token: Option<String>,
    history_limit: Option<u32>,
    response_limit: Option<usize>,
    min_cut: Option<usize>,
    similarity_threshold: Option<f32>,
    snippet_max_chars: Option<usize>,
    embed_max_chars: Option<usize>,
    policy_cache_secs: Option<u64>,
    booking_cooldown_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    inbound_ttl_secs: Option<u64>,
    outbound_ttl_secs: Option<u64>,
    debounce_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    corpus_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, MissingCredential};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: &[&str] = &[
        "CONCIERGE_CHANNEL_ACCESS_KEY",
        "CONCIERGE_CHANNEL_ACCESS_SECRET",
        "CHANNELTALK_ACCESS_KEY",
        "CHANNELTALK_ACCESS_SECRET",
        "CONCIERGE_LLM_API_KEY",
        "GEMINI_API_KEY",
        "CONCIERGE_CALENDAR_ACCESS_TOKEN",
        "CONCIERGE_CALENDAR_ID",
        "GOOGLE_CALENDAR_ID",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_credentials_and_report_them_missing() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let missing = config.missing_credentials();

        ensure(missing.len() == 4, "all four credentials should be reported missing")?;
        ensure(
            missing.contains(&MissingCredential::LlmApiKey),
            "llm api key should be reported missing",
        )?;
        ensure(config.calendar.calendar_id == "primary", "calendar id should default to primary")?;
        ensure(config.policy.response_limit == 250, "response limit should default to 250")?;
        ensure(config.cache.inbound_ttl_secs == 600, "inbound ttl should default to 600s")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("TEST_CHANNEL_KEY", "key-from-env");
        env::set_var("TEST_CHANNEL_SECRET", "secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[channel]
access_key = "${TEST_CHANNEL_KEY}"
access_secret = "${TEST_CHANNEL_SECRET}"

[policy]
human_timeout_mins = 45
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let key = config.channel.access_key.as_ref().map(|value| value.expose_secret().to_string());
            ensure(key.as_deref() == Some("key-from-env"), "access key should be interpolated")?;
            ensure(config.policy.human_timeout_mins == 45, "policy patch should apply")?;
            ensure(
                !config.missing_credentials().contains(&MissingCredential::ChannelAccessSecret),
                "access secret should not be reported missing",
            )
        })();

        clear_vars(&["TEST_CHANNEL_KEY", "TEST_CHANNEL_SECRET"]);
        result
    }

    #[test]
    fn legacy_credential_names_are_accepted() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("GEMINI_API_KEY", "gemini-legacy");
        env::set_var("GOOGLE_CALENDAR_ID", "clinic@group.calendar.google.com");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let api_key = config.llm.api_key.as_ref().map(|value| value.expose_secret().to_string());

            ensure(api_key.as_deref() == Some("gemini-legacy"), "legacy gemini key should load")?;
            ensure(
                config.calendar.calendar_id == "clinic@group.calendar.google.com",
                "legacy calendar id should load",
            )
        })();

        clear_vars(CREDENTIAL_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("CONCIERGE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CONCIERGE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
model = "gemini-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.database.url == "sqlite://from-env.db", "env database url should win")?;
            ensure(config.llm.model == "gemini-from-file", "file model should override default")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            ensure(matches!(config.logging.format, LogFormat::Json), "env log format should apply")
        })();

        clear_vars(&["CONCIERGE_DATABASE_URL", "CONCIERGE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn validation_rejects_min_cut_above_limit() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("concierge.toml");
        fs::write(
            &path,
            r#"
[policy]
response_limit = 120
min_cut = 150
"#,
        )
        .map_err(|err| err.to_string())?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("policy.min_cut")),
            "validation failure should mention policy.min_cut",
        )
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        env::set_var("CONCIERGE_SERVER_PORT", "not-a-port");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid env override".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "CONCIERGE_SERVER_PORT", "error should name the offending key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["CONCIERGE_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(CREDENTIAL_VARS);

        env::set_var("CONCIERGE_CHANNEL_ACCESS_SECRET", "channel-secret-value");
        env::set_var("CONCIERGE_LLM_API_KEY", "llm-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("channel-secret-value"), "debug should not contain secret")?;
            ensure(!debug.contains("llm-secret-value"), "debug should not contain api key")
        })();

        clear_vars(CREDENTIAL_VARS);
        result
    }

    #[test]
    fn region_offset_matches_configured_minutes() {
        let config = AppConfig::default();
        assert_eq!(config.region.offset().local_minus_utc(), 9 * 3600);
    }
}
