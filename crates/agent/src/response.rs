use serde_json::Value;
use tracing::{debug, warn};

use concierge_core::domain::decision::Decision;
use concierge_core::domain::session::{ConversationState, IntentState};
use concierge_core::domain::tool::{ToolAction, ToolResult};
use concierge_core::language::Language;
use concierge_core::locale::{catalog, render_booking_confirmed};
use concierge_core::text::truncate::truncate_response;
use concierge_core::time::{format_for_language, parse_iso8601};

use crate::decision::OracleContext;
use crate::llm::{GenerationRequest, GenerationSettings, LlmError};

pub struct ResponseInput<'a> {
    pub user_id: &'a str,
    pub text: &'a str,
    pub language: Language,
    pub intent_state: IntentState,
    pub conversation_state: ConversationState,
    pub decision: &'a Decision,
    pub tool_result: Option<&'a ToolResult>,
}

/// Second oracle call of a turn: turns the decision and any tool outcome
/// into the user-facing reply.
pub struct ResponseAssembler {
    context: OracleContext,
    settings: GenerationSettings,
    limit: usize,
    min_cut: usize,
}

impl ResponseAssembler {
    pub fn new(
        context: OracleContext,
        settings: GenerationSettings,
        limit: usize,
        min_cut: usize,
    ) -> Self {
        Self { context, settings, limit, min_cut }
    }

    /// Always yields something sendable. Oracle failures become the localized
    /// AI-error message, blank output the localized default.
    pub async fn respond(&self, input: &ResponseInput<'_>) -> String {
        let messages = catalog(input.language);
        let raw = match self.generate(input).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "response.oracle.failed",
                    user_id = input.user_id,
                    error = %error,
                    "response oracle failed; sending the ai error message"
                );
                return messages.ai_error.to_string();
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            debug!(
                event_name = "response.empty",
                user_id = input.user_id,
                "oracle returned no text"
            );
            return messages.empty_default.to_string();
        }
        truncate_response(trimmed, input.language, self.limit, self.min_cut)
    }

    async fn generate(&self, input: &ResponseInput<'_>) -> Result<String, LlmError> {
        let grounding = match &input.decision.grounding {
            Some(grounding) => Some(grounding.clone()),
            None => self.context.retriever.retrieve(input.text).await,
        };
        let tool_json = input.tool_result.map(|result| self.tool_context(result, input.language));

        let system_instruction = self
            .context
            .system_instruction(input.intent_state, input.conversation_state, input.language)
            .await;
        let history = self.context.history_for(input.user_id).await;

        self.context
            .llm
            .generate(GenerationRequest {
                system_instruction,
                history,
                turn_text: response_turn_text(input.text, grounding.as_deref(), tool_json.as_ref()),
                settings: self.settings,
            })
            .await
    }

    /// Tool outcome as handed to the oracle. A confirmed booking also
    /// carries the localized confirmation with the time in region format.
    fn tool_context(&self, result: &ToolResult, language: Language) -> Value {
        let mut value = result.to_json();
        if result.action != ToolAction::BookingConfirmed {
            return value;
        }

        let details = result.field("bookingDetails");
        let selected = details
            .and_then(|details| details.get("selectedTime"))
            .and_then(Value::as_str)
            .and_then(|raw| parse_iso8601(raw, self.context.region));
        let Some(selected) = selected else {
            return value;
        };
        let name = details
            .and_then(|details| details.get("customerName"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let time = format_for_language(selected, language, self.context.region);

        if let Value::Object(object) = &mut value {
            object.insert(
                "formattedResponse".to_string(),
                Value::String(render_booking_confirmed(language, name, &time)),
            );
        }
        value
    }
}

pub fn response_turn_text(
    input: &str,
    grounding: Option<&str>,
    tool_result: Option<&Value>,
) -> String {
    let mut text = format!("사용자 입력: {input}\n참고정보: {}", grounding.unwrap_or_default());
    if let Some(tool_result) = tool_result {
        let rendered =
            serde_json::to_string_pretty(tool_result).unwrap_or_else(|_| tool_result.to_string());
        text.push_str("\n도구 실행 결과: ");
        text.push_str(&rendered);
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map};

    use concierge_core::config::AppConfig;
    use concierge_core::domain::decision::{Decision, ToolCall};
    use concierge_core::domain::session::{ConversationState, IntentState};
    use concierge_core::domain::tool::{ToolAction, ToolResult};
    use concierge_core::language::Language;
    use concierge_core::locale::{catalog, render_booking_confirmed};

    use super::{ResponseAssembler, ResponseInput};
    use crate::decision::tests::context;
    use crate::llm::{GenerationSettings, LlmError, ScriptedLlm};

    fn assembler(llm: Arc<ScriptedLlm>) -> ResponseAssembler {
        let config = AppConfig::default();
        ResponseAssembler::new(
            context(llm, Arc::default()),
            GenerationSettings::response(&config.llm),
            config.policy.response_limit,
            config.policy.min_cut,
        )
    }

    fn input<'a>(
        text: &'a str,
        language: Language,
        decision: &'a Decision,
        tool_result: Option<&'a ToolResult>,
    ) -> ResponseInput<'a> {
        ResponseInput {
            user_id: "u1",
            text,
            language,
            intent_state: IntentState::Idle,
            conversation_state: ConversationState::Normal,
            decision,
            tool_result,
        }
    }

    #[tokio::test]
    async fn reply_uses_decision_grounding() {
        let llm = Arc::new(ScriptedLlm::with_replies([Ok("  슈링크는 199,000원입니다.  ".to_string())]));
        let decision = Decision::answer("초안", IntentState::Idle)
            .with_grounding(Some("슈링크 유니버스: 199,000원".to_string()));

        let reply =
            assembler(llm.clone()).respond(&input("슈링크 얼마예요", Language::Ko, &decision, None)).await;

        assert_eq!(reply, "슈링크는 199,000원입니다.");
        let requests = llm.requests().await;
        assert_eq!(requests[0].turn_text, "사용자 입력: 슈링크 얼마예요\n참고정보: 슈링크 유니버스: 199,000원");
        assert_eq!(requests[0].settings.max_tokens, 400);
    }

    #[tokio::test]
    async fn blank_output_becomes_localized_default() {
        let llm = Arc::new(ScriptedLlm::with_replies([Ok("   ".to_string())]));
        let decision = Decision::answer("", IntentState::Idle);

        let reply = assembler(llm).respond(&input("hello", Language::En, &decision, None)).await;

        assert_eq!(reply, catalog(Language::En).empty_default);
    }

    #[tokio::test]
    async fn oracle_failure_becomes_ai_error() {
        let llm = Arc::new(ScriptedLlm::with_replies([Err(LlmError::Request("timeout".to_string()))]));
        let decision = Decision::answer("", IntentState::Idle);

        let reply = assembler(llm).respond(&input("สวัสดีค่ะ", Language::Th, &decision, None)).await;

        assert_eq!(reply, catalog(Language::Th).ai_error);
    }

    #[tokio::test]
    async fn long_reply_is_cut_at_a_sentence_end() {
        let long = "가".repeat(150) + "입니다. " + &"나".repeat(200);
        let llm = Arc::new(ScriptedLlm::with_replies([Ok(long)]));
        let decision = Decision::answer("", IntentState::Idle);

        let reply = assembler(llm).respond(&input("질문", Language::Ko, &decision, None)).await;

        assert!(reply.chars().count() <= 250);
        assert!(reply.ends_with("입니다."));
    }

    #[tokio::test]
    async fn confirmed_booking_carries_localized_confirmation() {
        let llm = Arc::new(ScriptedLlm::with_replies([Ok("예약 완료!".to_string())]));
        let decision = Decision::call(
            ToolCall { name: "createFinalBooking".to_string(), arguments: json!({}) },
            IntentState::Idle,
        );
        let result = ToolResult::success(ToolAction::BookingConfirmed, Map::new()).with_field(
            "bookingDetails",
            json!({"customerName": "김민지", "selectedTime": "2026-03-03T14:00:00+09:00", "eventId": "evt-1"}),
        );

        assembler(llm.clone())
            .respond(&input("김민지 010-1234-5678", Language::Ko, &decision, Some(&result)))
            .await;

        let requests = llm.requests().await;
        let turn = &requests[0].turn_text;
        assert!(turn.contains("\n도구 실행 결과: {"));
        assert!(turn.contains("\"action\": \"booking_confirmed\""));
        let config = AppConfig::default();
        let time = concierge_core::time::format_for_language(
            chrono::DateTime::parse_from_rfc3339("2026-03-03T14:00:00+09:00")
                .expect("valid timestamp")
                .with_timezone(&chrono::Utc),
            Language::Ko,
            config.region.offset(),
        );
        let expected = render_booking_confirmed(Language::Ko, "김민지", &time);
        let encoded = serde_json::to_string(&expected).expect("encodes");
        assert!(turn.contains(&format!("\"formattedResponse\": {encoded}")));
    }
}
