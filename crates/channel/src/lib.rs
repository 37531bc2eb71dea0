//! Chat channel integration.
//!
//! - **Payload** (`payload`) - webhook body model and classification into
//!   ignored, attachment and text messages
//! - **Transport** (`transport`) - `ChatTransport` trait and the HTTP client
//!   that posts bot messages into a user chat
//! - **Outbound** (`outbound`) - `OutboundSender`, which wraps every send with
//!   echo-guard markers and the durable outbound log
//!
//! ```text
//! webhook body → classify → orchestrator → OutboundSender → ChatTransport
//!                                               ↓
//!                                   echo markers + outbound log
//! ```

pub mod outbound;
pub mod payload;
pub mod transport;

pub use outbound::OutboundSender;
pub use payload::{
    classify, AttachmentKind, Classification, IgnoreReason, InboundMessage, PersonType,
    WebhookPayload,
};
pub use transport::{ChatTransport, HttpChatTransport, RecordingTransport, TransportError};
