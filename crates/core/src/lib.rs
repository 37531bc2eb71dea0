pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod idempotency;
pub mod knowledge;
pub mod language;
pub mod locale;
pub mod text;
pub mod time;

pub use cache::{KeyValueCache, MemoryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::booking::{BookingCooldown, BookingRecord, BookingStatus, OutboundRecord};
pub use domain::decision::{Decision, DecisionAction, ToolCall};
pub use domain::message::{HistoryRole, HistoryTurn, MessageRecord, Sender};
pub use domain::session::{
    BookingState, BookingStep, ConversationState, IntentState, Mode, Session, SessionPatch,
};
pub use domain::tool::{ToolAction, ToolResult};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use idempotency::IdempotencyMarkers;
pub use language::Language;
