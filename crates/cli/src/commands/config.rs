use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// One reported setting: its dotted key, rendered value and the
/// environment variables that can override it, primary name first.
struct Entry {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Entry {
    fn new(
        key_path: &'static str,
        value: impl Into<String>,
        env_keys: &'static [&'static str],
    ) -> Self {
        Self { key_path, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key_path,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key_path, entry.value));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let corpus_path = config.knowledge.effective_corpus_path().display().to_string();
    vec![
        Entry::new("database.url", &config.database.url, &["CONCIERGE_DATABASE_URL"]),
        Entry::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        Entry::new("channel.base_url", &config.channel.base_url, &["CONCIERGE_CHANNEL_BASE_URL"]),
        Entry::new("channel.bot_name", &config.channel.bot_name, &["CONCIERGE_CHANNEL_BOT_NAME"]),
        Entry::new(
            "channel.access_key",
            redact(config.channel.access_key.as_ref()),
            &["CONCIERGE_CHANNEL_ACCESS_KEY", "CHANNELTALK_ACCESS_KEY"],
        ),
        Entry::new(
            "channel.access_secret",
            redact(config.channel.access_secret.as_ref()),
            &["CONCIERGE_CHANNEL_ACCESS_SECRET", "CHANNELTALK_ACCESS_SECRET"],
        ),
        Entry::new(
            "llm.provider",
            format!("{:?}", config.llm.provider),
            &["CONCIERGE_LLM_PROVIDER"],
        ),
        Entry::new("llm.model", &config.llm.model, &["CONCIERGE_LLM_MODEL"]),
        Entry::new("llm.base_url", &config.llm.base_url, &["CONCIERGE_LLM_BASE_URL"]),
        Entry::new(
            "llm.api_key",
            redact(config.llm.api_key.as_ref()),
            &["CONCIERGE_LLM_API_KEY", "GEMINI_API_KEY"],
        ),
        Entry::new(
            "calendar.calendar_id",
            &config.calendar.calendar_id,
            &["CONCIERGE_CALENDAR_ID", "GOOGLE_CALENDAR_ID"],
        ),
        Entry::new(
            "calendar.access_token",
            redact(config.calendar.access_token.as_ref()),
            &["CONCIERGE_CALENDAR_ACCESS_TOKEN"],
        ),
        Entry::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        Entry::new("server.port", config.server.port.to_string(), &["CONCIERGE_SERVER_PORT"]),
        Entry::new(
            "policy.human_timeout_mins",
            config.policy.human_timeout_mins.to_string(),
            &["CONCIERGE_POLICY_HUMAN_TIMEOUT_MINS"],
        ),
        Entry::new(
            "policy.handoff_threshold",
            config.policy.handoff_threshold.to_string(),
            &["CONCIERGE_POLICY_HANDOFF_THRESHOLD"],
        ),
        Entry::new("knowledge.corpus_path", corpus_path, &["CONCIERGE_KNOWLEDGE_CORPUS_PATH"]),
        Entry::new(
            "logging.level",
            &config.logging.level,
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
