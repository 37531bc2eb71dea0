use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use concierge_core::config::LlmConfig;
use concierge_core::domain::message::{HistoryRole, HistoryTurn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("llm api key is not configured")]
    MissingApiKey,
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

/// Sampling limits for one oracle call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl GenerationSettings {
    pub fn decision(config: &LlmConfig) -> Self {
        Self::with_max_tokens(config, config.decision_max_tokens)
    }

    pub fn response(config: &LlmConfig) -> Self {
        Self::with_max_tokens(config, config.response_max_tokens)
    }

    fn with_max_tokens(config: &LlmConfig, max_tokens: u32) -> Self {
        Self { max_tokens, temperature: config.temperature, top_p: config.top_p, top_k: config.top_k }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub history: Vec<HistoryTurn>,
    pub turn_text: String,
    pub settings: GenerationSettings,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Raw model text. An empty string is a valid answer; callers decide
    /// what to do with it.
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// `Ok(None)` when there is nothing to embed or the provider returned no
    /// vector.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, LlmError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Instruction<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Instruction<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: String,
    content: Instruction<'a>,
}

fn role_name(role: HistoryRole) -> &'static str {
    match role {
        HistoryRole::User => "user",
        HistoryRole::Model => "model",
    }
}

fn http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|error| LlmError::Request(error.to_string()))
}

fn usable_key(key: Option<&SecretString>) -> Option<&str> {
    key.map(|secret| secret.expose_secret()).filter(|key| !key.trim().is_empty())
}

async fn execute_json(client: &Client, request: reqwest::Request) -> Result<Value, LlmError> {
    let response =
        client.execute(request).await.map_err(|error| LlmError::Request(error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status { status: status.as_u16(), body });
    }
    response.json::<Value>().await.map_err(|error| LlmError::Decode(error.to_string()))
}

/// `generateContent` client for Gemini models.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl GeminiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> Result<reqwest::Request, LlmError> {
        let key = usable_key(self.api_key.as_ref()).ok_or(LlmError::MissingApiKey)?;

        let mut contents: Vec<Content<'_>> = request
            .history
            .iter()
            .map(|turn| Content { role: role_name(turn.role), parts: [Part { text: &turn.text }] })
            .collect();
        contents.push(Content { role: "user", parts: [Part { text: &request.turn_text }] });

        let body = GenerateBody {
            contents,
            system_instruction: Instruction {
                parts: [Part { text: &request.system_instruction }],
            },
            generation_config: GenerationConfig {
                max_output_tokens: request.settings.max_tokens,
                temperature: request.settings.temperature,
                top_p: request.settings.top_p,
                top_k: request.settings.top_k,
            },
        };

        self.client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", key)])
            .json(&body)
            .build()
            .map_err(|error| LlmError::Request(error.to_string()))
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let http_request = self.build_request(&request)?;
        let value = execute_json(&self.client, http_request).await?;
        Ok(candidate_text(&value))
    }
}

/// First text part of the first candidate, or empty.
pub fn candidate_text(response: &Value) -> String {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `embedContent` client. Input is trimmed and capped before sending.
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_chars: usize,
}

impl GeminiEmbedder {
    pub fn from_config(config: &LlmConfig, max_chars: usize) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            api_key: config.api_key.clone(),
            max_chars,
        })
    }

    fn build_request(&self, text: &str) -> Result<reqwest::Request, LlmError> {
        let key = usable_key(self.api_key.as_ref()).ok_or(LlmError::MissingApiKey)?;
        let body = EmbedBody {
            model: format!("models/{}", self.model),
            content: Instruction { parts: [Part { text }] },
        };

        self.client
            .post(format!("{}/models/{}:embedContent", self.base_url, self.model))
            .query(&[("key", key)])
            .json(&body)
            .build()
            .map_err(|error| LlmError::Request(error.to_string()))
    }
}

#[async_trait]
impl EmbeddingClient for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, LlmError> {
        let Some(input) = prepare_embedding_input(text, self.max_chars) else {
            return Ok(None);
        };
        let request = self.build_request(&input)?;
        let value = execute_json(&self.client, request).await?;
        Ok(embedding_values(&value))
    }
}

pub fn prepare_embedding_input(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

fn embedding_values(response: &Value) -> Option<Vec<f32>> {
    let values = response.pointer("/embedding/values")?.as_array()?;
    let vector: Vec<f32> = values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
    (!vector.is_empty()).then_some(vector)
}

/// Cosine similarity clamped to `0.0..=1.0`. Mismatched lengths and zero
/// vectors score zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Oracle double that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    pub fn with_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self { replies: Mutex::new(replies.into_iter().collect()), ..Self::default() }
    }

    pub async fn push(&self, reply: Result<String, LlmError>) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        self.requests.lock().await.push(request);
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("no scripted reply left".to_string())))
    }
}

/// Embedding double: the first rule whose needle occurs in the text decides
/// the vector.
#[derive(Default)]
pub struct ScriptedEmbedder {
    rules: Vec<(String, Vec<f32>)>,
    failure: Option<LlmError>,
}

impl ScriptedEmbedder {
    pub fn rule(mut self, needle: impl Into<String>, vector: Vec<f32>) -> Self {
        self.rules.push((needle.into(), vector));
        self
    }

    pub fn failing(error: LlmError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }
}

#[async_trait]
impl EmbeddingClient for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, LlmError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, vector)| vector.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use concierge_core::config::AppConfig;
    use concierge_core::domain::message::{HistoryRole, HistoryTurn};

    use super::{
        candidate_text, cosine_similarity, prepare_embedding_input, GeminiClient, GeminiEmbedder,
        GenerationRequest, GenerationSettings, LlmClient, LlmError, ScriptedLlm,
    };

    fn request() -> GenerationRequest {
        let config = AppConfig::default().llm;
        GenerationRequest {
            system_instruction: "system rules".to_string(),
            history: vec![
                HistoryTurn { role: HistoryRole::User, text: "가격 알려주세요".to_string() },
                HistoryTurn { role: HistoryRole::Model, text: "어떤 시술이요?".to_string() },
            ],
            turn_text: "슈링크요".to_string(),
            settings: GenerationSettings::decision(&config),
        }
    }

    fn body_of(request: &reqwest::Request) -> Value {
        let bytes = request.body().and_then(|body| body.as_bytes()).expect("buffered body");
        serde_json::from_slice(bytes).expect("json body")
    }

    #[test]
    fn generate_request_carries_history_instruction_and_sampling() {
        let mut config = AppConfig::default().llm;
        config.api_key = Some("gem-key".to_string().into());
        let client = GeminiClient::from_config(&config).expect("client builds");

        let built = client.build_request(&request()).expect("request builds");

        assert!(built
            .url()
            .as_str()
            .ends_with("/models/gemini-2.5-flash:generateContent?key=gem-key"));
        let body = body_of(&built);
        assert_eq!(body["contents"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["contents"][1]["role"], json!("model"));
        assert_eq!(body["contents"][2]["parts"][0]["text"], json!("슈링크요"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], json!("system rules"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(500));
        assert_eq!(body["generationConfig"]["topK"], json!(50));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client =
            GeminiClient::from_config(&AppConfig::default().llm).expect("client builds");
        assert_eq!(client.generate(request()).await, Err(LlmError::MissingApiKey));
    }

    #[test]
    fn embed_request_names_the_model() {
        let mut config = AppConfig::default().llm;
        config.api_key = Some("gem-key".to_string().into());
        let embedder = GeminiEmbedder::from_config(&config, 2048).expect("client builds");

        let built = embedder.build_request("보톡스").expect("request builds");

        assert!(built.url().path().ends_with("/models/text-embedding-004:embedContent"));
        assert_eq!(body_of(&built)["model"], json!("models/text-embedding-004"));
    }

    #[test]
    fn candidate_text_tolerates_missing_parts() {
        let full = json!({"candidates": [{"content": {"parts": [{"text": "{\"action\":\"ANSWER\"}"}]}}]});
        assert_eq!(candidate_text(&full), "{\"action\":\"ANSWER\"}");
        assert_eq!(candidate_text(&json!({"candidates": []})), "");
    }

    #[test]
    fn embedding_input_is_trimmed_and_capped() {
        assert_eq!(prepare_embedding_input("   ", 10), None);
        assert_eq!(prepare_embedding_input("  가나다라마  ", 3), Some("가나다".to_string()));
    }

    #[test]
    fn cosine_similarity_is_clamped() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn scripted_llm_replays_then_reports_exhaustion() {
        let llm = ScriptedLlm::with_replies([Ok("first".to_string())]);

        assert_eq!(llm.generate(request()).await, Ok("first".to_string()));
        assert!(matches!(llm.generate(request()).await, Err(LlmError::Request(_))));
        assert_eq!(llm.requests().await.len(), 2);
    }
}
