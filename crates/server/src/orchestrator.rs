//! Webhook pipeline for one inbound chat event.
//!
//! Stages run in a fixed order and each may end the event early with an
//! [`Ack`]: classification, attachment hand-off, inbound dedup, bot and echo
//! filters, inbound logging, manager routing, the human-mode gate and finally
//! the decision → tool → response turn. Every stage before the turn is
//! enforced without touching the language model.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use concierge_agent::{
    DecisionInput, DecisionOracle, ResponseAssembler, ResponseInput, ToolContext, ToolRegistry,
};
use concierge_channel::{
    classify, AttachmentKind, Classification, IgnoreReason, InboundMessage, OutboundSender,
    PersonType, WebhookPayload,
};
use concierge_core::config::PolicyConfig;
use concierge_core::domain::message::{MessageRecord, Sender};
use concierge_core::domain::session::{Mode, Session, SessionPatch};
use concierge_core::domain::tool::ToolResult;
use concierge_core::errors::{ApplicationError, DomainError, InterfaceError};
use concierge_core::flows::{
    resolve_next_intent, FlowAction, FlowEngine, FlowTransitionError, ModeEvent, ModeFlow,
};
use concierge_core::language;
use concierge_core::locale::catalog;
use concierge_core::{Clock, IdempotencyMarkers};
use concierge_db::{
    ActivitySettings, MessageLogRepository, OutboundLogRepository, RepositoryError,
    SessionRepository,
};

/// Plain-text acknowledgment returned to the chat platform with HTTP 200.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Ignored(IgnoreReason),
    AttachmentHandled,
    AlreadyProcessed,
    BotMessageIgnored,
    OutboundEchoIgnored,
    OutboundDbIgnored,
    AiModeActivated,
    HumanModeActivated,
    HumanModeTimeoutRecovered,
    HumanModeActive,
    Ok,
}

impl Ack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored(reason) => reason.ack(),
            Self::AttachmentHandled => "attachment_handled",
            Self::AlreadyProcessed => "already_processed",
            Self::BotMessageIgnored => "bot_message_ignored",
            Self::OutboundEchoIgnored => "outbound_echo_ignored",
            Self::OutboundDbIgnored => "outbound_db_ignored",
            Self::AiModeActivated => "ai_mode_activated",
            Self::HumanModeActivated => "human_mode_activated",
            Self::HumanModeTimeoutRecovered => "human_mode_timeout_recovered",
            Self::HumanModeActive => "human_mode_active",
            Self::Ok => "ok",
        }
    }
}

/// Why a stage stopped the pipeline.
enum Halt {
    Ack(Ack),
    Failed(ApplicationError),
}

impl From<ApplicationError> for Halt {
    fn from(error: ApplicationError) -> Self {
        Self::Failed(error)
    }
}

impl From<RepositoryError> for Halt {
    fn from(error: RepositoryError) -> Self {
        Self::Failed(ApplicationError::Persistence(error.to_string()))
    }
}

impl From<FlowTransitionError> for Halt {
    fn from(error: FlowTransitionError) -> Self {
        Self::Failed(ApplicationError::from(DomainError::from(error)))
    }
}

pub struct Collaborators {
    pub markers: IdempotencyMarkers,
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageLogRepository>,
    pub outbound_log: Arc<dyn OutboundLogRepository>,
    pub sender: OutboundSender,
    pub oracle: DecisionOracle,
    pub tools: ToolRegistry,
    pub responder: ResponseAssembler,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    markers: IdempotencyMarkers,
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageLogRepository>,
    outbound_log: Arc<dyn OutboundLogRepository>,
    sender: OutboundSender,
    oracle: DecisionOracle,
    tools: ToolRegistry,
    responder: ResponseAssembler,
    clock: Arc<dyn Clock>,
    flow: FlowEngine<ModeFlow>,
    reset_token: String,
    human_timeout: Duration,
    activity: ActivitySettings,
}

impl Orchestrator {
    pub fn new(parts: Collaborators, policy: &PolicyConfig) -> Self {
        Self {
            markers: parts.markers,
            sessions: parts.sessions,
            messages: parts.messages,
            outbound_log: parts.outbound_log,
            sender: parts.sender,
            oracle: parts.oracle,
            tools: parts.tools,
            responder: parts.responder,
            clock: parts.clock,
            flow: FlowEngine::default(),
            reset_token: policy.reset_token.clone(),
            human_timeout: policy.human_timeout(),
            activity: ActivitySettings {
                window: policy.conversation_window(),
                threshold: policy.consultation_threshold,
            },
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    /// Runs the pipeline. Only unexpected failures come back as errors; the
    /// HTTP layer turns those into a 500 with a generic body.
    pub async fn handle(&self, payload: &WebhookPayload) -> Result<Ack, InterfaceError> {
        let (message, attachment) = match classify(payload) {
            Classification::Ignored(reason) => {
                debug!(
                    event_name = "webhook.inbound.ignored",
                    reason = reason.ack(),
                    "webhook event ignored"
                );
                return Ok(Ack::Ignored(reason));
            }
            Classification::Attachment { message, kind } => (message, Some(kind)),
            Classification::Text(message) => (message, None),
        };

        match self.dispatch(&message, attachment).await {
            Ok(ack) | Err(Halt::Ack(ack)) => {
                debug!(
                    event_name = "webhook.inbound.acknowledged",
                    correlation_id = %message.message_id,
                    user_id = %message.user_id,
                    ack = ack.as_str(),
                    "webhook event acknowledged"
                );
                Ok(ack)
            }
            Err(Halt::Failed(failure)) => {
                let correlation_id = if message.message_id.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    message.message_id.clone()
                };
                error!(
                    event_name = "webhook.inbound.failed",
                    correlation_id = %correlation_id,
                    user_id = %message.user_id,
                    chat_id = %message.chat_id,
                    error = %failure,
                    "webhook pipeline failed"
                );
                Err(failure.into_interface(correlation_id))
            }
        }
    }

    async fn dispatch(
        &self,
        message: &InboundMessage,
        attachment: Option<AttachmentKind>,
    ) -> Result<Ack, Halt> {
        self.screen(message).await?;
        match attachment {
            Some(kind) => self.on_attachment(message, kind).await,
            None => self.on_text(message).await,
        }
    }

    async fn on_attachment(
        &self,
        message: &InboundMessage,
        kind: AttachmentKind,
    ) -> Result<Ack, Halt> {
        let session = self.load_session(&message.user_id).await;
        let outcome = self.flow.apply(session.mode, ModeEvent::AttachmentReceived)?;
        let now = self.clock.now();
        self.sessions
            .merge(
                &message.user_id,
                SessionPatch::mode(
                    outcome.to,
                    format!("{}:{}", ModeEvent::AttachmentReceived.as_str(), kind.as_str()),
                    now,
                ),
            )
            .await?;
        self.append(MessageRecord::new(
            &message.user_id,
            &message.chat_id,
            Sender::User,
            kind.log_placeholder(),
            now,
        ))
        .await;

        if outcome.requires(FlowAction::NotifyAttachmentReceived) {
            let messages = catalog(language::detect(&message.text));
            let notice = match kind {
                AttachmentKind::Image => messages.attachment_image_notice,
                AttachmentKind::File => messages.attachment_file_notice,
            };
            self.reply(message, notice).await;
        }

        info!(
            event_name = "webhook.attachment.handled",
            correlation_id = %message.message_id,
            user_id = %message.user_id,
            attachment = kind.as_str(),
            "attachment received; conversation handed to staff"
        );
        Ok(Ack::AttachmentHandled)
    }

    async fn on_text(&self, message: &InboundMessage) -> Result<Ack, Halt> {
        self.append(MessageRecord::new(
            &message.user_id,
            &message.chat_id,
            message.person_type.inbound_sender(),
            &message.text,
            self.clock.now(),
        ))
        .await;

        let session = self.load_session(&message.user_id).await;
        self.route_manager(message, &session).await?;
        self.gate_human_mode(message, &session).await?;
        self.converse(message, &session).await
    }

    /// Dedup and the bot and echo filters, ahead of text and attachments alike.
    async fn screen(&self, message: &InboundMessage) -> Result<(), Halt> {
        if !self.markers.mark_inbound(&message.message_id) {
            debug!(
                event_name = "webhook.inbound.duplicate",
                correlation_id = %message.message_id,
                "message id already processed"
            );
            return Err(Halt::Ack(Ack::AlreadyProcessed));
        }

        if message.person_type == PersonType::Bot {
            return Err(Halt::Ack(Ack::BotMessageIgnored));
        }

        if let Some(external_id) = &message.external_message_id {
            if self.markers.is_echo(external_id) {
                debug!(
                    event_name = "webhook.inbound.echo",
                    correlation_id = %message.message_id,
                    external_message_id = %external_id,
                    "own outbound message echoed back"
                );
                return Err(Halt::Ack(Ack::OutboundEchoIgnored));
            }
        }

        match self.outbound_log.exists(&message.message_id).await {
            Ok(true) => Err(Halt::Ack(Ack::OutboundDbIgnored)),
            Ok(false) => Ok(()),
            Err(error) => {
                warn!(
                    event_name = "webhook.outbound_log.lookup_failed",
                    correlation_id = %message.message_id,
                    error = %error,
                    "outbound log lookup failed; continuing"
                );
                Ok(())
            }
        }
    }

    /// Manager messages switch the conversation mode and never reach the
    /// oracle. The reset token hands the chat back to the assistant.
    async fn route_manager(
        &self,
        message: &InboundMessage,
        session: &Session,
    ) -> Result<(), Halt> {
        if message.person_type != PersonType::Manager {
            return Ok(());
        }

        let (event, ack) = if message.text.trim() == self.reset_token {
            (ModeEvent::ResetToken, Ack::AiModeActivated)
        } else {
            (ModeEvent::ManagerMessage, Ack::HumanModeActivated)
        };
        let outcome = self.flow.apply(session.mode, event)?;
        self.sessions
            .merge(
                &message.user_id,
                SessionPatch::mode(outcome.to, event.as_str(), self.clock.now()),
            )
            .await?;

        info!(
            event_name = "webhook.mode.manager",
            correlation_id = %message.message_id,
            user_id = %message.user_id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "manager changed the conversation mode"
        );
        Err(Halt::Ack(ack))
    }

    async fn gate_human_mode(
        &self,
        message: &InboundMessage,
        session: &Session,
    ) -> Result<(), Halt> {
        if session.mode != Mode::HumanMode {
            return Ok(());
        }

        let now = self.clock.now();
        if !session.human_mode_expired(now, self.human_timeout) {
            self.sessions.merge(&message.user_id, SessionPatch::touch(now)).await?;
            debug!(
                event_name = "webhook.mode.human_active",
                correlation_id = %message.message_id,
                user_id = %message.user_id,
                "staff is handling this conversation"
            );
            return Err(Halt::Ack(Ack::HumanModeActive));
        }

        let outcome = self.flow.apply(session.mode, ModeEvent::InactivityTimeout)?;
        self.sessions
            .merge(
                &message.user_id,
                SessionPatch::mode(outcome.to, ModeEvent::InactivityTimeout.as_str(), now),
            )
            .await?;
        if outcome.requires(FlowAction::NotifyTimeoutRecovery) {
            let notice = catalog(language::detect(&message.text)).human_timeout_notice;
            self.reply(message, notice).await;
        }

        info!(
            event_name = "webhook.mode.timeout_recovered",
            correlation_id = %message.message_id,
            user_id = %message.user_id,
            idle_minutes = (now - session.last_updated_at).num_minutes(),
            "human mode timed out; assistant resumed"
        );
        Err(Halt::Ack(Ack::HumanModeTimeoutRecovered))
    }

    /// One assistant turn: decide, run the named tool, phrase the reply,
    /// send it and persist the next intent state.
    async fn converse(&self, message: &InboundMessage, session: &Session) -> Result<Ack, Halt> {
        let user_id = message.user_id.as_str();
        let conversation =
            match self.sessions.record_activity(user_id, self.clock.now(), self.activity).await {
                Ok(snapshot) => snapshot.state,
                Err(error) => {
                    warn!(
                        event_name = "webhook.activity.record_failed",
                        correlation_id = %message.message_id,
                        user_id,
                        error = %error,
                        "conversation counter not updated"
                    );
                    session.conversation_state
                }
            };
        if self.markers.recently_sent(user_id) {
            debug!(
                event_name = "webhook.debounce.recent_send",
                correlation_id = %message.message_id,
                user_id,
                "reply sent to this user moments ago"
            );
        }

        let language = language::detect(&message.text);
        let current = session.intent_state;
        let decision = self
            .oracle
            .decide(&DecisionInput {
                user_id: user_id.to_string(),
                text: message.text.clone(),
                language,
                intent_state: current,
                conversation_state: conversation,
            })
            .await;

        let tool_result = match decision.tool_call() {
            Some(call) => {
                let context = ToolContext {
                    user_id: user_id.to_string(),
                    chat_id: message.chat_id.clone(),
                    language,
                };
                Some(self.tools.dispatch(call, &context).await)
            }
            None => None,
        };

        let declared = (decision.next_state != current).then_some(decision.next_state);
        let resolution = resolve_next_intent(
            current,
            tool_result.as_ref().and_then(ToolResult::forced_intent),
            declared,
        );

        let reply = self
            .responder
            .respond(&ResponseInput {
                user_id,
                text: &message.text,
                language,
                intent_state: resolution.current_turn,
                conversation_state: conversation,
                decision: &decision,
                tool_result: tool_result.as_ref(),
            })
            .await;
        self.reply(message, &reply).await;

        if resolution.persisted != current {
            self.sessions
                .merge(user_id, SessionPatch::intent(resolution.persisted, self.clock.now()))
                .await?;
            info!(
                event_name = "webhook.intent.updated",
                correlation_id = %message.message_id,
                user_id,
                from = current.as_str(),
                to = resolution.persisted.as_str(),
                "intent state advanced"
            );
        }
        Ok(Ack::Ok)
    }

    /// Missing or unreadable sessions read as a fresh AI-mode session.
    async fn load_session(&self, user_id: &str) -> Session {
        match self.sessions.get(user_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::fresh(user_id, self.clock.now()),
            Err(error) => {
                warn!(
                    event_name = "webhook.session.load_failed",
                    user_id,
                    error = %error,
                    "session unavailable; using defaults"
                );
                Session::fresh(user_id, self.clock.now())
            }
        }
    }

    async fn append(&self, record: MessageRecord) {
        let user_id = record.user_id.clone();
        if let Err(error) = self.messages.append(record).await {
            warn!(
                event_name = "webhook.message_log.append_failed",
                user_id = %user_id,
                error = %error,
                "conversation log write failed"
            );
        }
    }

    /// Sends through the echo-guarded sender; only delivered replies enter
    /// the conversation log.
    async fn reply(&self, message: &InboundMessage, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let sent = self.sender.send(&message.user_id, &message.chat_id, text).await;
        if sent {
            self.append(MessageRecord::new(
                &message.user_id,
                &message.chat_id,
                Sender::Bot,
                text,
                self.clock.now(),
            ))
            .await;
        }
        sent
    }
}
