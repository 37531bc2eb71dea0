use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use concierge_core::config::ChannelConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("chat transport credentials are not configured")]
    MissingCredentials,
    #[error("chat transport request failed: {0}")]
    Request(String),
    #[error("chat transport rejected message with status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: &str, message_id: &str, text: &str)
        -> Result<(), TransportError>;

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage<'a> {
    message_id: &'a str,
    blocks: [TextBlock<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

/// Posts bot messages into a user chat through the channel's open API.
pub struct HttpChatTransport {
    client: Client,
    base_url: String,
    bot_name: String,
    access_key: Option<SecretString>,
    access_secret: Option<SecretString>,
}

impl HttpChatTransport {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_name: config.bot_name.clone(),
            access_key: config.access_key.clone(),
            access_secret: config.access_secret.clone(),
        })
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.access_key.as_ref()?.expose_secret();
        let secret = self.access_secret.as_ref()?.expose_secret();
        (!key.trim().is_empty() && !secret.trim().is_empty()).then_some((key, secret))
    }

    fn build_request(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<reqwest::Request, TransportError> {
        let (key, secret) = self.credentials().ok_or(TransportError::MissingCredentials)?;
        let body = OutgoingMessage {
            message_id,
            blocks: [TextBlock { kind: "text", value: text }],
        };

        self.client
            .post(format!("{}/user-chats/{chat_id}/messages", self.base_url))
            .query(&[("botName", self.bot_name.as_str())])
            .header("X-Access-Key", key)
            .header("X-Access-Secret", secret)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let request = self.build_request(chat_id, message_id, text)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status { status: status.as_u16(), body })
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
}

/// In-process transport that keeps every send; used by pipeline tests and
/// local dry runs.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    failure: Option<TransportError>,
    unconfigured: bool,
}

impl RecordingTransport {
    pub fn failing(error: TransportError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    pub fn unconfigured() -> Self {
        Self { unconfigured: true, ..Self::default() }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.sent.lock().await.push(SentMessage {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn is_configured(&self) -> bool {
        !self.unconfigured
    }
}
