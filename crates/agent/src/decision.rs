use std::sync::Arc;

use chrono::FixedOffset;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use concierge_core::clock::Clock;
use concierge_core::domain::decision::{Decision, ToolCall};
use concierge_core::domain::message::{history_from_records, HistoryTurn};
use concierge_core::domain::session::{ConversationState, IntentState};
use concierge_core::language::Language;
use concierge_core::locale::catalog;
use concierge_core::text::json_repair::extract_json;
use concierge_db::MessageLogRepository;

use crate::llm::{GenerationRequest, GenerationSettings, LlmClient, LlmError};
use crate::prompt::PromptAssembler;
use crate::retrieval::Retriever;

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionInput {
    pub user_id: String,
    pub text: String,
    pub language: Language,
    pub intent_state: IntentState,
    pub conversation_state: ConversationState,
}

/// Collaborators shared by the decision and response calls.
#[derive(Clone)]
pub struct OracleContext {
    pub llm: Arc<dyn LlmClient>,
    pub retriever: Arc<Retriever>,
    pub prompts: Arc<PromptAssembler>,
    pub history: Arc<dyn MessageLogRepository>,
    pub clock: Arc<dyn Clock>,
    pub region: FixedOffset,
    pub history_limit: u32,
}

impl OracleContext {
    pub(crate) async fn system_instruction(
        &self,
        intent: IntentState,
        conversation: ConversationState,
        language: Language,
    ) -> String {
        let today = self.clock.now().with_timezone(&self.region).date_naive();
        self.prompts.system_instruction(intent, conversation, language, today).await
    }

    /// Recent turns without operator messages. A failing log read yields an
    /// empty history rather than failing the turn.
    pub(crate) async fn history_for(&self, user_id: &str) -> Vec<HistoryTurn> {
        match self.history.recent(user_id, self.history_limit).await {
            Ok(records) => history_from_records(&records),
            Err(error) => {
                warn!(
                    event_name = "oracle.history.load_failed",
                    user_id,
                    error = %error,
                    "conversation history unavailable; continuing without it"
                );
                Vec::new()
            }
        }
    }
}

/// First oracle call of a turn: answer directly or name a tool.
pub struct DecisionOracle {
    context: OracleContext,
    settings: GenerationSettings,
}

impl DecisionOracle {
    pub fn new(context: OracleContext, settings: GenerationSettings) -> Self {
        Self { context, settings }
    }

    /// Never fails: model errors become the localized AI-error answer.
    pub async fn decide(&self, input: &DecisionInput) -> Decision {
        match self.try_decide(input).await {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    event_name = "decision.oracle.failed",
                    user_id = %input.user_id,
                    error = %error,
                    "decision oracle failed; answering with the ai error message"
                );
                Decision::answer(catalog(input.language).ai_error, input.intent_state)
            }
        }
    }

    async fn try_decide(&self, input: &DecisionInput) -> Result<Decision, LlmError> {
        let grounding = self.context.retriever.retrieve(&input.text).await;
        let system_instruction = self
            .context
            .system_instruction(input.intent_state, input.conversation_state, input.language)
            .await;
        let history = self.context.history_for(&input.user_id).await;

        let raw = self
            .context
            .llm
            .generate(GenerationRequest {
                system_instruction,
                history,
                turn_text: decision_turn_text(&input.text, grounding.as_deref()),
                settings: self.settings,
            })
            .await?;

        let decision = parse_decision(&raw, input.intent_state, input.language)
            .with_grounding(grounding);
        info!(
            event_name = "decision.parsed",
            user_id = %input.user_id,
            function = decision.tool_call().map(|call| call.name.as_str()).unwrap_or("-"),
            next_state = decision.next_state.as_str(),
            "decision ready"
        );
        Ok(decision)
    }
}

pub fn decision_turn_text(input: &str, grounding: Option<&str>) -> String {
    format!(
        "User Input: {input}\nRAG Context (optional): {}\nReturn STRICT JSON.",
        grounding.unwrap_or("N/A")
    )
}

/// Interprets the oracle's raw output. Anything without a usable action
/// becomes the localized rephrase answer.
pub fn parse_decision(raw: &str, current: IntentState, language: Language) -> Decision {
    let rephrase = || Decision::answer(catalog(language).rephrase, current);

    let Some(Value::Object(mut object)) = extract_json(raw) else {
        debug!(event_name = "decision.unparsed", "oracle output was not a JSON object");
        return rephrase();
    };

    if !object.contains_key("action") {
        if let Some(Value::Object(function_call)) = object.remove("function_call") {
            object = remap_function_call(function_call, &object);
        }
    }

    let next_state = object
        .get("nextState")
        .and_then(Value::as_str)
        .map(IntentState::parse_or_idle)
        .unwrap_or(current);

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .map(|action| action.trim().to_ascii_uppercase());

    match action.as_deref() {
        Some("ANSWER") => {
            let response = object.get("response").and_then(Value::as_str).unwrap_or_default();
            Decision::answer(response, next_state)
        }
        Some("CALL_FUNCTION") => {
            let Some(name) = object
                .get("functionName")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
            else {
                return rephrase();
            };
            let arguments = object
                .get("parameters")
                .or_else(|| object.get("args"))
                .filter(|value| value.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            Decision::call(ToolCall { name: name.to_string(), arguments }, next_state)
        }
        _ => rephrase(),
    }
}

/// Native function-call shape: `{"function_call": {"name", "parameters"}}`.
fn remap_function_call(call: Map<String, Value>, outer: &Map<String, Value>) -> Map<String, Value> {
    let mut remapped = Map::new();
    remapped.insert("action".to_string(), Value::String("CALL_FUNCTION".to_string()));
    if let Some(name) = call.get("name") {
        remapped.insert("functionName".to_string(), name.clone());
    }
    let parameters = call
        .get("parameters")
        .or_else(|| call.get("arguments"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    remapped.insert("parameters".to_string(), parameters);
    let next_state =
        outer.get("nextState").cloned().unwrap_or_else(|| Value::String("IDLE".to_string()));
    remapped.insert("nextState".to_string(), next_state);
    remapped
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use concierge_core::clock::ManualClock;
    use concierge_core::config::AppConfig;
    use concierge_core::domain::message::{HistoryRole, MessageRecord, Sender};
    use concierge_core::domain::session::{ConversationState, IntentState};
    use concierge_core::knowledge::KnowledgeBase;
    use concierge_core::language::Language;
    use concierge_core::locale::catalog;
    use concierge_db::{InMemoryMessageLogRepository, InMemoryPolicyRepository, MessageLogRepository};

    use super::{parse_decision, DecisionInput, DecisionOracle, OracleContext};
    use crate::llm::{GenerationSettings, LlmError, ScriptedLlm};
    use crate::prompt::PromptAssembler;
    use crate::retrieval::{RetrievalSettings, Retriever};

    pub(crate) fn context(
        llm: Arc<ScriptedLlm>,
        log: Arc<InMemoryMessageLogRepository>,
    ) -> OracleContext {
        let config = AppConfig::default();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).single().expect("valid timestamp"),
        ));
        let corpus = Arc::new(KnowledgeBase::from_json(json!({
            "pricing": [{"name": "슈링크 유니버스", "price_krw": 199000}]
        })));
        OracleContext {
            llm,
            retriever: Arc::new(Retriever::keyword_only(
                corpus,
                RetrievalSettings::from_policy(&config.policy),
            )),
            prompts: Arc::new(PromptAssembler::new(
                Arc::new(InMemoryPolicyRepository::with_policy("# test policy")),
                clock.clone(),
                Duration::seconds(300),
            )),
            history: log,
            clock,
            region: config.region.offset(),
            history_limit: config.policy.history_limit,
        }
    }

    fn input(text: &str) -> DecisionInput {
        DecisionInput {
            user_id: "u1".to_string(),
            text: text.to_string(),
            language: Language::Ko,
            intent_state: IntentState::AwaitingInfo,
            conversation_state: ConversationState::Normal,
        }
    }

    fn oracle(llm: Arc<ScriptedLlm>, log: Arc<InMemoryMessageLogRepository>) -> DecisionOracle {
        DecisionOracle::new(
            context(llm, log),
            GenerationSettings::decision(&AppConfig::default().llm),
        )
    }

    #[test]
    fn prose_output_becomes_rephrase_answer() {
        let decision = parse_decision("I think you should book.", IntentState::Idle, Language::En);
        assert_eq!(decision.response(), Some(catalog(Language::En).rephrase));
        assert_eq!(decision.next_state, IntentState::Idle);
    }

    #[test]
    fn missing_action_becomes_rephrase_answer() {
        let decision =
            parse_decision(r#"{"response": "hello"}"#, IntentState::AwaitingInfo, Language::Ko);
        assert_eq!(decision.response(), Some(catalog(Language::Ko).rephrase));
        assert_eq!(decision.next_state, IntentState::AwaitingInfo);
    }

    #[test]
    fn call_function_reads_parameters_and_next_state() {
        let raw = "```json\n{\"action\": \"CALL_FUNCTION\", \"functionName\": \"startBookingProcess\", \
                   \"parameters\": {\"dateTime\": \"2026-03-03T14:00:00\"}, \"nextState\": \"AWAITING_INFO\"}\n```";
        let decision = parse_decision(raw, IntentState::Idle, Language::Ko);

        let call = decision.tool_call().expect("call decision");
        assert_eq!(call.name, "startBookingProcess");
        assert_eq!(call.arguments, json!({"dateTime": "2026-03-03T14:00:00"}));
        assert_eq!(decision.next_state, IntentState::AwaitingInfo);
    }

    #[test]
    fn native_function_call_shape_is_remapped() {
        let raw = r#"{"function_call": {"name": "requestHumanAgent", "arguments": {"reason": "user_request"}}}"#;
        let decision = parse_decision(raw, IntentState::AwaitingInfo, Language::Ko);

        let call = decision.tool_call().expect("remapped call");
        assert_eq!(call.name, "requestHumanAgent");
        assert_eq!(call.arguments, json!({"reason": "user_request"}));
        assert_eq!(decision.next_state, IntentState::Idle);
    }

    #[test]
    fn answer_without_next_state_keeps_current_state() {
        let decision = parse_decision(
            r#"{"action": "answer", "response": "네, 가능합니다."}"#,
            IntentState::AwaitingInfo,
            Language::Ko,
        );
        assert_eq!(decision.response(), Some("네, 가능합니다."));
        assert_eq!(decision.next_state, IntentState::AwaitingInfo);
    }

    #[tokio::test]
    async fn llm_failure_answers_with_ai_error() {
        let llm = Arc::new(ScriptedLlm::with_replies([Err(LlmError::Status {
            status: 500,
            body: "boom".to_string(),
        })]));
        let decision = oracle(llm, Arc::default()).decide(&input("안녕하세요")).await;

        assert_eq!(decision.response(), Some(catalog(Language::Ko).ai_error));
        assert_eq!(decision.next_state, IntentState::AwaitingInfo);
    }

    #[tokio::test]
    async fn turn_carries_grounding_and_history_without_manager_turns() {
        let log = Arc::new(InMemoryMessageLogRepository::default());
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 0, 50, 0).single().expect("valid timestamp");
        for (sender, text) in
            [(Sender::User, "안녕하세요"), (Sender::Manager, "담당자입니다"), (Sender::Bot, "반갑습니다")]
        {
            log.append(MessageRecord::new("u1", "c1", sender, text, at)).await.expect("append");
        }
        let llm = Arc::new(ScriptedLlm::with_replies([Ok(
            r#"{"action": "ANSWER", "response": "199,000원입니다.", "nextState": "IDLE"}"#.to_string(),
        )]));

        let decision = oracle(llm.clone(), log).decide(&input("슈링크 가격")).await;

        assert_eq!(decision.grounding.as_deref(), Some("슈링크 유니버스: 199,000원"));
        let requests = llm.requests().await;
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(
            request.turn_text,
            "User Input: 슈링크 가격\nRAG Context (optional): 슈링크 유니버스: 199,000원\nReturn STRICT JSON."
        );
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[1].role, HistoryRole::Model);
        assert!(request.system_instruction.contains("CurrentIntentState: AWAITING_INFO"));
        assert!(request.system_instruction.contains("Today's date: 2026-03-02"));
    }
}
