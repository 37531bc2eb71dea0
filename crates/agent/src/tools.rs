use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use concierge_core::clock::Clock;
use concierge_core::config::RegionConfig;
use concierge_core::domain::booking::{BookingCooldown, BookingRecord, BookingStatus};
use concierge_core::domain::decision::ToolCall;
use concierge_core::domain::session::{BookingState, BookingStep, Mode, SessionPatch};
use concierge_core::domain::tool::{ToolAction, ToolResult};
use concierge_core::flows::{FlowEngine, ModeEvent, ModeFlow};
use concierge_core::language::Language;
use concierge_core::locale::catalog;
use concierge_core::time::{is_valid_iso8601, looks_natural, parse_iso8601, parse_natural_time};
use concierge_db::{BookingRepository, SessionRepository};

use crate::calendar::{NewEvent, SlotSearch, SLOT_MINUTES};

pub const START_BOOKING_PROCESS: &str = "startBookingProcess";
pub const REQUEST_HUMAN_AGENT: &str = "requestHumanAgent";
pub const CREATE_FINAL_BOOKING: &str = "createFinalBooking";

const DEFAULT_SERVICE_TYPE: &str = "일반 상담";
const NEAREST_SLOT_HORIZON_HOURS: i64 = 4;

/// Conversation identity the registry injects into every call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolContext {
    pub user_id: String,
    pub chat_id: String,
    pub language: Language,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub context: ToolContext,
    pub arguments: Value,
}

impl ToolInvocation {
    fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Tools compute a result and may touch storage; they never talk to the
/// chat channel.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    /// Function declaration advertised to the oracle.
    fn declaration(&self) -> Value;
    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolResult>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn declarations(&self) -> Value {
        let declarations: Vec<Value> = self
            .names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.declaration())
            .collect();
        json!({ "functionDeclarations": declarations })
    }

    /// Runs the named tool with the conversation identity merged into its
    /// arguments. Unknown names and tool errors come back as failed results.
    pub async fn dispatch(&self, call: &ToolCall, context: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(
                event_name = "tool.unknown",
                function = %call.name,
                "oracle named an unknown function"
            );
            return ToolResult::failure(
                ToolAction::UnknownFunction,
                format!("unknown function `{}`", call.name),
            );
        };

        let mut arguments = match &call.arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        arguments.insert("userId".to_string(), Value::String(context.user_id.clone()));
        arguments.insert("userChatId".to_string(), Value::String(context.chat_id.clone()));

        let invocation =
            ToolInvocation { context: context.clone(), arguments: Value::Object(arguments) };
        match tool.execute(invocation).await {
            Ok(result) => {
                info!(
                    event_name = "tool.executed",
                    function = %call.name,
                    user_id = %context.user_id,
                    success = result.success,
                    action = result.action.as_str(),
                    "tool executed"
                );
                result
            }
            Err(error) => {
                warn!(
                    event_name = "tool.failed",
                    function = %call.name,
                    user_id = %context.user_id,
                    error = %error,
                    "tool execution failed"
                );
                ToolResult::system_error(error.to_string())
            }
        }
    }
}

fn korean_mobile() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^010-\d{4}-\d{4}$").expect("mobile number regex must compile"))
}

fn region_rfc3339(instant: DateTime<Utc>, region: FixedOffset) -> String {
    instant.with_timezone(&region).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Availability check for a requested time.
pub struct StartBookingProcess {
    slots: SlotSearch,
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    region: FixedOffset,
}

impl StartBookingProcess {
    pub fn new(
        slots: SlotSearch,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        region: FixedOffset,
    ) -> Self {
        Self { slots, sessions, clock, region }
    }

    fn requested_instant(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ToolResult> {
        if looks_natural(raw) {
            return parse_natural_time(raw, now, self.region)
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    ToolResult::failure(
                        ToolAction::NaturalLanguageParseFailed,
                        "시간을 이해할 수 없습니다. ISO 8601 형식으로 제공해주세요.",
                    )
                });
        }
        if !is_valid_iso8601(raw) {
            return Err(invalid_iso());
        }
        parse_iso8601(raw, self.region).ok_or_else(invalid_iso)
    }
}

fn invalid_iso() -> ToolResult {
    ToolResult::failure(
        ToolAction::InvalidIsoFormat,
        "ISO 8601 형식(YYYY-MM-DDTHH:MM:SS)이 필요합니다.",
    )
}

#[async_trait]
impl Tool for StartBookingProcess {
    fn name(&self) -> &'static str {
        START_BOOKING_PROCESS
    }

    fn declaration(&self) -> Value {
        json!({
            "name": START_BOOKING_PROCESS,
            "description": "사용자가 요청한 시간에 대해 캘린더 가용성을 확인합니다. 구체적인 시간이 언급되면 호출합니다.",
            "parameters": {
                "type": "object",
                "properties": {
                    "dateTime": {
                        "type": "string",
                        "description": "예약 희망 시간. ISO 8601 형식(YYYY-MM-DDTHH:MM:SS+09:00)"
                    }
                },
                "required": ["dateTime"]
            }
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolResult> {
        let Some(raw) = invocation.str_arg("dateTime").filter(|value| *value != "undefined") else {
            return Ok(ToolResult::failure(
                ToolAction::InvalidDatetimeFormat,
                "구체적인 예약 시간이 필요합니다. 예: \"내일 2시\", \"오후 3시\"",
            ));
        };

        let now = self.clock.now();
        let requested = match self.requested_instant(raw, now) {
            Ok(instant) => instant,
            Err(failure) => return Ok(failure),
        };

        if self.slots.is_range_available(requested, SLOT_MINUTES).await {
            let booking = BookingState {
                step: Some(BookingStep::AwaitingInfo),
                proposed_time: Some(requested),
                ..BookingState::default()
            };
            if let Err(error) =
                self.sessions.merge_booking_state(&invocation.context.user_id, booking, now).await
            {
                warn!(
                    event_name = "tool.booking_state.save_failed",
                    user_id = %invocation.context.user_id,
                    error = %error,
                    "proposed time could not be stored on the session"
                );
            }
            return Ok(ToolResult::success(ToolAction::TimeSlotAvailable, Map::new())
                .with_field("isAvailable", Value::Bool(true))
                .with_field("confirmedTime", json!(region_rfc3339(requested, self.region))));
        }

        let nearest =
            self.slots.find_nearest_available_slot(requested, NEAREST_SLOT_HORIZON_HOURS).await;
        let mut result = ToolResult::success(ToolAction::TimeSlotUnavailable, Map::new())
            .with_field("isAvailable", Value::Bool(false))
            .with_field(
                "nearestSlot",
                nearest.map_or(Value::Null, |slot| json!(region_rfc3339(slot, self.region))),
            );
        if nearest.is_none() {
            let alternatives: Vec<String> = self
                .slots
                .available_slots(now, 7, 3)
                .await
                .into_iter()
                .map(|slot| slot.display)
                .collect();
            result = result.with_field("availableSlots", json!(alternatives));
        }
        Ok(result)
    }
}

/// Hand-off request, rate limited by how often the user asked.
pub struct RequestHumanAgent {
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    flow: FlowEngine<ModeFlow>,
    threshold: u32,
}

impl RequestHumanAgent {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        threshold: u32,
    ) -> Self {
        Self { sessions, clock, flow: FlowEngine::default(), threshold }
    }
}

#[async_trait]
impl Tool for RequestHumanAgent {
    fn name(&self) -> &'static str {
        REQUEST_HUMAN_AGENT
    }

    fn declaration(&self) -> Value {
        json!({
            "name": REQUEST_HUMAN_AGENT,
            "description": "사용자가 명시적으로 상담원 연결을 요청할 때 호출합니다.",
            "parameters": {
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "enum": [
                            "user_request",
                            "complex_consultation",
                            "knowledge_gap",
                            "technical_issue"
                        ],
                        "description": "상담원 연결 사유"
                    },
                    "context": {"type": "string", "description": "상황 설명"},
                    "requestCount": {"type": "integer", "description": "사용자의 연결 요청 횟수"}
                },
                "required": ["reason"]
            }
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolResult> {
        let user_id = invocation.context.user_id.as_str();
        let reason = invocation.str_arg("reason").unwrap_or("user_request").to_string();
        let context = invocation.str_arg("context").unwrap_or_default().to_string();
        let declared = invocation
            .arguments
            .get("requestCount")
            .and_then(Value::as_u64)
            .map_or(1, |count| u32::try_from(count).unwrap_or(u32::MAX));
        let messages = catalog(invocation.context.language);
        let now = self.clock.now();

        let durable = self.sessions.increment_handoff_requests(user_id, now).await?;
        let request_count = durable.max(declared);
        if request_count < self.threshold {
            debug!(
                event_name = "tool.handoff.rate_limited",
                user_id,
                request_count,
                "handoff request below threshold"
            );
            return Ok(ToolResult::failure(ToolAction::RateLimited, messages.handoff_rate_limited)
                .with_field("requestCount", json!(request_count))
                .with_field("reason", json!("rate_limiting")));
        }

        let current =
            self.sessions.get(user_id).await?.map_or(Mode::AiMode, |session| session.mode);
        if let Err(error) = self.flow.apply(current, ModeEvent::HandoffApproved) {
            debug!(
                event_name = "tool.handoff.already_human",
                user_id,
                error = %error,
                "session already with staff"
            );
        }
        self.sessions
            .merge(user_id, SessionPatch::mode(Mode::HumanMode, reason.clone(), now))
            .await?;

        info!(event_name = "tool.handoff.approved", user_id, reason = %reason, "handoff approved");
        Ok(ToolResult::success(ToolAction::HumanAgentRequested, Map::new())
            .with_message(messages.handoff_accepted)
            .with_field("mode", json!(Mode::HumanMode.as_str()))
            .with_field("reason", json!(reason))
            .with_field("context", json!(context)))
    }
}

/// Validated booking details ready for the calendar.
struct BookingRequest {
    user_id: String,
    chat_id: String,
    customer_name: String,
    phone_number: String,
    selected_time_raw: String,
    selected_time: DateTime<Utc>,
    service_type: String,
}

/// Creates the calendar event and the durable booking record.
pub struct CreateFinalBooking {
    slots: SlotSearch,
    bookings: Arc<dyn BookingRepository>,
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    region: RegionConfig,
    cooldown: chrono::Duration,
}

impl CreateFinalBooking {
    pub fn new(
        slots: SlotSearch,
        bookings: Arc<dyn BookingRepository>,
        sessions: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        region: RegionConfig,
        cooldown: chrono::Duration,
    ) -> Self {
        Self { slots, bookings, sessions, clock, region, cooldown }
    }

    fn validate(&self, invocation: &ToolInvocation) -> Result<BookingRequest, &'static str> {
        let user_id = invocation.str_arg("userId").ok_or("사용자 ID가 필요합니다.")?;
        let chat_id = invocation.str_arg("userChatId").ok_or("채팅방 ID가 필요합니다.")?;
        let customer_name = invocation
            .str_arg("customerName")
            .filter(|name| name.chars().count() >= 2)
            .ok_or("이름은 2글자 이상 입력해주세요.")?;
        let phone_number = invocation
            .str_arg("phoneNumber")
            .filter(|phone| korean_mobile().is_match(phone))
            .ok_or("연락처는 '010-XXXX-YYYY' 형식이어야 합니다.")?;
        let (selected_time_raw, selected_time) = invocation
            .str_arg("selectedTime")
            .filter(|value| is_valid_iso8601(value))
            .and_then(|value| Some((value, parse_iso8601(value, self.region.offset())?)))
            .ok_or("예약 시간은 유효한 ISO 8601 형식이어야 합니다.")?;
        let service_type = invocation.str_arg("serviceType").unwrap_or(DEFAULT_SERVICE_TYPE);

        Ok(BookingRequest {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            customer_name: customer_name.to_string(),
            phone_number: phone_number.to_string(),
            selected_time_raw: selected_time_raw.to_string(),
            selected_time,
            service_type: service_type.to_string(),
        })
    }

    /// Storage after the calendar accepted the event. Failures here are
    /// logged; the event exists either way.
    async fn persist(&self, request: &BookingRequest, event_id: &str, now: DateTime<Utc>) {
        let record = BookingRecord {
            event_id: event_id.to_string(),
            user_id: request.user_id.clone(),
            chat_id: request.chat_id.clone(),
            customer_name: request.customer_name.clone(),
            phone_number: request.phone_number.clone(),
            selected_time: request.selected_time,
            service_type: request.service_type.clone(),
            status: BookingStatus::Confirmed,
            source: "chatbot".to_string(),
            created_at: now,
        };
        if let Err(error) = self.bookings.insert(record).await {
            warn!(
                event_name = "tool.booking.save_failed",
                event_id,
                error = %error,
                "booking record not saved"
            );
        }

        let cooldown = BookingCooldown {
            user_id: request.user_id.clone(),
            cooldown_end: now + self.cooldown,
            last_booking_at: now,
        };
        if let Err(error) = self.bookings.save_cooldown(cooldown).await {
            warn!(
                event_name = "tool.booking.cooldown_failed",
                error = %error,
                "booking cooldown not saved"
            );
        }

        let state = BookingState {
            step: Some(BookingStep::Confirmed),
            selected_time: Some(request.selected_time),
            customer_name: Some(request.customer_name.clone()),
            ..BookingState::default()
        };
        if let Err(error) = self.sessions.merge_booking_state(&request.user_id, state, now).await {
            warn!(
                event_name = "tool.booking_state.save_failed",
                error = %error,
                "booking step not updated"
            );
        }
    }
}

#[async_trait]
impl Tool for CreateFinalBooking {
    fn name(&self) -> &'static str {
        CREATE_FINAL_BOOKING
    }

    fn declaration(&self) -> Value {
        json!({
            "name": CREATE_FINAL_BOOKING,
            "description": "예약 정보를 받아 캘린더에 예약을 생성하고 데이터베이스에 저장합니다.",
            "parameters": {
                "type": "object",
                "properties": {
                    "userId": {"type": "string", "description": "사용자 ID"},
                    "userChatId": {"type": "string", "description": "채팅방 ID"},
                    "customerName": {"type": "string", "description": "고객 이름 (2글자 이상)"},
                    "phoneNumber": {
                        "type": "string",
                        "description": "고객 연락처. 010-XXXX-YYYY 형식으로 정규화"
                    },
                    "selectedTime": {
                        "type": "string",
                        "description": "확정된 예약 시간 (ISO 8601)"
                    },
                    "serviceType": {"type": "string", "description": "서비스 유형 (기본값: 일반 상담)"}
                },
                "required": ["customerName", "phoneNumber", "selectedTime"]
            }
        })
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolResult> {
        let request = match self.validate(&invocation) {
            Ok(request) => request,
            Err(message) => {
                debug!(event_name = "tool.booking.invalid", message, "booking details rejected");
                return Ok(ToolResult::failure(ToolAction::ValidationFailed, message));
            }
        };

        let event = NewEvent::consultation(
            &request.customer_name,
            &request.phone_number,
            request.selected_time,
            &self.region,
        );
        let event_id = match self.slots.calendar().insert_event(&event).await {
            Ok(event_id) if !event_id.trim().is_empty() => event_id,
            Ok(_) => {
                return Ok(ToolResult::failure(
                    ToolAction::CalendarBookingFailed,
                    "캘린더 예약 생성에 실패했습니다.",
                ));
            }
            Err(error) => {
                warn!(
                    event_name = "tool.booking.calendar_failed",
                    error = %error,
                    "calendar insert failed"
                );
                return Ok(ToolResult::failure(
                    ToolAction::FinalBookingError,
                    "예약 생성 중 시스템 오류가 발생했습니다.",
                )
                .with_field("error", json!(error.to_string())));
            }
        };

        self.persist(&request, &event_id, self.clock.now()).await;
        info!(
            event_name = "tool.booking.confirmed",
            user_id = %request.user_id,
            event_id = %event_id,
            "booking confirmed"
        );

        Ok(ToolResult::success(ToolAction::BookingConfirmed, Map::new()).with_field(
            "bookingDetails",
            json!({
                "userId": request.user_id,
                "customerName": request.customer_name,
                "phoneNumber": request.phone_number,
                "selectedTime": request.selected_time_raw,
                "serviceType": request.service_type,
                "eventId": event_id,
            }),
        ))
    }
}
