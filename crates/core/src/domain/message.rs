use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Manager,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Manager => "manager",
            Self::Bot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "manager" => Some(Self::Manager),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }
}

/// Append-only conversation log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub user_id: String,
    pub chat_id: String,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            sender,
            text: text.into(),
            created_at,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub text: String,
}

/// Builds oracle history from chronological records. Manager turns are
/// dropped so operator interventions never reach model context.
pub fn history_from_records(records: &[MessageRecord]) -> Vec<HistoryTurn> {
    records
        .iter()
        .filter_map(|record| {
            let role = match record.sender {
                Sender::User => HistoryRole::User,
                Sender::Bot => HistoryRole::Model,
                Sender::Manager => return None,
            };
            Some(HistoryTurn { role, text: record.text.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{history_from_records, HistoryRole, MessageRecord, Sender};

    #[test]
    fn manager_turns_are_excluded_from_history() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).single().expect("valid timestamp");
        let records = vec![
            MessageRecord::new("u1", "c1", Sender::User, "가격 알려주세요", at),
            MessageRecord::new("u1", "c1", Sender::Manager, "담당자입니다", at),
            MessageRecord::new("u1", "c1", Sender::Bot, "슈링크는 ...", at),
        ];

        let history = history_from_records(&records);

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, HistoryRole::User);
        assert_eq!(history[1].role, HistoryRole::Model);
        assert_eq!(history[1].text, "슈링크는 ...");
    }

    #[test]
    fn sender_round_trips_through_storage_form() {
        for sender in [Sender::User, Sender::Manager, Sender::Bot] {
            assert_eq!(Sender::parse(sender.as_str()), Some(sender));
        }
        assert_eq!(Sender::parse("system"), None);
    }
}
