//! Conversation agent for the clinic concierge.
//!
//! Each inbound message runs a two-call loop against the language model:
//! 1. **Decision** (`decision`) - answer directly or name a tool, with
//!    knowledge-base grounding from `retrieval`
//! 2. **Tool execution** (`tools`) - availability checks, hand-off requests
//!    and final bookings against the calendar (`calendar`) and storage
//! 3. **Response** (`response`) - phrase the reply from the decision and the
//!    tool outcome, bounded to the configured length
//!
//! Both calls share one system instruction built by `prompt` from the
//! technical rules, the active clinic policy and the user's language.
//!
//! The model never books anything itself. Tools validate every argument and
//! report outcomes as structured results.

pub mod calendar;
pub mod decision;
pub mod llm;
pub mod prompt;
pub mod response;
pub mod retrieval;
pub mod tools;

pub use calendar::{CalendarClient, CalendarError, GoogleCalendarClient, SlotSearch};
pub use decision::{DecisionInput, DecisionOracle, OracleContext};
pub use llm::{
    EmbeddingClient, GeminiClient, GeminiEmbedder, GenerationSettings, LlmClient, LlmError,
};
pub use prompt::PromptAssembler;
pub use response::{ResponseAssembler, ResponseInput};
pub use retrieval::{RetrievalSettings, Retriever};
pub use tools::{
    CreateFinalBooking, RequestHumanAgent, StartBookingProcess, Tool, ToolContext, ToolRegistry,
};
