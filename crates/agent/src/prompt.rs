use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use concierge_core::clock::Clock;
use concierge_core::domain::session::{ConversationState, IntentState};
use concierge_core::language::Language;
use concierge_db::PolicyRepository;

/// Used when no active policy document exists or the store cannot be read.
pub const DEFAULT_POLICY: &str = "\
# CareConnect AI 긴급 fallback 정책
- 사용자 언어와 동일한 언어로 응답
- 250글자 이내 완전한 문장
- 정확하고 안전한 의료/미용 정보
- 3회+ 대화 시 예약 유도 허용
- \"개인차가 있을 수 있습니다\" 필수 언급";

struct CachedPolicy {
    text: String,
    loaded_at: DateTime<Utc>,
}

/// Builds the single system instruction shared by the decision and
/// response calls.
pub struct PromptAssembler {
    policies: Arc<dyn PolicyRepository>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    tool_declarations: Option<Value>,
    cached: RwLock<Option<CachedPolicy>>,
}

impl PromptAssembler {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self { policies, clock, cache_ttl, tool_declarations: None, cached: RwLock::new(None) }
    }

    pub fn with_tool_declarations(mut self, declarations: Value) -> Self {
        self.tool_declarations = Some(declarations);
        self
    }

    pub async fn system_instruction(
        &self,
        intent: IntentState,
        conversation: ConversationState,
        language: Language,
        today: NaiveDate,
    ) -> String {
        let mut technical = technical_instructions(today);
        if let Some(declarations) = &self.tool_declarations {
            let rendered = serde_json::to_string_pretty(declarations)
                .unwrap_or_else(|_| declarations.to_string());
            technical.push_str("\n\n# Function declarations\n");
            technical.push_str(&rendered);
        }
        let policy = self.policy_text().await;

        format!(
            "{technical}\n\n{policy}\n\nCurrentIntentState: {}\nCurrentConversationState: {}\n{}\n\
             Language: {}\n\n{}",
            intent.as_str(),
            conversation.as_str(),
            conversation_rules(conversation),
            language.as_str(),
            language_rules(language)
        )
    }

    /// Active policy text, cached for the configured window. Lookup failures
    /// fall back to the default policy without caching it.
    pub async fn policy_text(&self) -> String {
        let now = self.clock.now();
        if let Some(cached) = self.cached.read().await.as_ref() {
            if now - cached.loaded_at < self.cache_ttl {
                return cached.text.clone();
            }
        }

        let text = match self.policies.active_policy().await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(event_name = "prompt.policy.default", "no active policy document");
                DEFAULT_POLICY.to_string()
            }
            Err(error) => {
                warn!(
                    event_name = "prompt.policy.load_failed",
                    error = %error,
                    "policy lookup failed; using the default policy"
                );
                return DEFAULT_POLICY.to_string();
            }
        };

        *self.cached.write().await = Some(CachedPolicy { text: text.clone(), loaded_at: now });
        text
    }
}

pub fn technical_instructions(today: NaiveDate) -> String {
    let tomorrow = today.succ_opt().unwrap_or(today);
    format!(
        "\
MANDATORY FUNCTION CALLING RULES - OVERRIDE ALL OTHER INSTRUCTIONS

[RULE 1] Strictly follow the function schemas. Never invent parameter names.
[RULE 2] Compute dates from the current date. \"Tomorrow\" is the day after today.
[RULE 3] dateTime values are ISO 8601 (YYYY-MM-DDTHH:MM:SS). Never natural language.

# Output format
Reply with one JSON object and nothing else:
{{\"action\": \"ANSWER\", \"response\": \"...\", \"nextState\": \"IDLE\"}}
or
{{\"action\": \"CALL_FUNCTION\", \"functionName\": \"...\", \"parameters\": {{...}}, \"nextState\": \"AWAITING_INFO\"}}

# DateTime conversion
Today's date: {today}
Tomorrow's date: {tomorrow}
- \"내일 2시\" -> {tomorrow}T14:00:00
- \"오후 3시\" -> {today}T15:00:00
- \"tomorrow 2pm\" -> {tomorrow}T14:00:00

# Functions
- startBookingProcess: the user names a time or asks to book. Parameter: dateTime.
- createFinalBooking: name and phone number are known. Parameter: selectedTime (take it from the conversation).
- requestHumanAgent: the user explicitly asks for a staff member.

# Booking flow
1. Specific time mentioned -> CALL_FUNCTION startBookingProcess, nextState AWAITING_INFO.
2. Time confirmed, details missing -> ANSWER asking for name and phone, stay AWAITING_INFO.
3. Name and phone known -> CALL_FUNCTION createFinalBooking, nextState IDLE.

# Parsing booking details
- Extract customerName, phoneNumber and selectedTime from the conversation.
- Normalize Korean phone numbers to 010-XXXX-XXXX."
    )
}

/// Booking-invitation stance for the rolling conversation state.
pub fn conversation_rules(conversation: ConversationState) -> &'static str {
    match conversation {
        ConversationState::Normal => {
            "- Inform only. Do not invite the user to book or to send photos yet."
        }
        ConversationState::ConsultationReady => {
            "- The user is engaged: offer a consultation booking and, for pricing or \
             treatment questions, invite photos of the treatment area."
        }
    }
}

pub fn language_rules(language: Language) -> String {
    let base = format!(
        "MULTI-LANGUAGE SUPPORT - ABSOLUTE REQUIREMENT:\nYou MUST respond ONLY in {} ({}).",
        language.display_name(),
        language.as_str()
    );
    let extra = match language {
        Language::Th => Some("- Thai only, never mix in Korean or English.\n- Keep the polite particles ค่ะ/ครับ."),
        Language::Ko => Some("- Keep formal Korean endings (습니다/입니다)."),
        Language::Ja => Some("- Keep polite Japanese (です/ます)."),
        _ => None,
    };
    match extra {
        Some(extra) => format!("{base}\n{extra}"),
        None => base,
    }
}
