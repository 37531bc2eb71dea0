use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Durable booking, keyed by the calendar event id. Only written after the
/// calendar confirmed the event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub event_id: String,
    pub user_id: String,
    pub chat_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub selected_time: DateTime<Utc>,
    pub service_type: String,
    pub status: BookingStatus,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCooldown {
    pub user_id: String,
    pub cooldown_end: DateTime<Utc>,
    pub last_booking_at: DateTime<Utc>,
}

/// Durable record of a message this process sent, used to recognize echoes
/// after the short-lived cache markers expire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub message_id: String,
    pub user_id: String,
    pub chat_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
