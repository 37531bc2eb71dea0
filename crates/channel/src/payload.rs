use serde::Deserialize;
use serde_json::Value;

use concierge_core::domain::message::Sender;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entity: Option<MessageEntity>,
    #[serde(default)]
    pub refers: Option<Refers>,
}

impl WebhookPayload {
    /// Lenient decode: a body that does not fit the model reads as empty and
    /// classifies as missing data.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub person_type: Option<String>,
    #[serde(default)]
    pub plain_text: Option<String>,
    #[serde(default)]
    pub log: Option<Value>,
    #[serde(default)]
    pub blocks: Option<Vec<Block>>,
    #[serde(default)]
    pub files: Option<Value>,
    #[serde(default)]
    pub attachments: Option<Value>,
    #[serde(default)]
    pub external_message_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Block {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub file: Option<BlockFile>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockFile {
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refers {
    #[serde(default)]
    pub user_chat: Option<UserChat>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChat {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub contact_key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersonType {
    User,
    Manager,
    Bot,
}

impl PersonType {
    /// Unknown or absent author roles are treated as end users.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("manager") => Self::Manager,
            Some("bot") => Self::Bot,
            _ => Self::User,
        }
    }

    pub fn inbound_sender(&self) -> Sender {
        match self {
            Self::Manager => Sender::Manager,
            _ => Sender::User,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Text stored in the message log in place of the attachment.
    pub fn log_placeholder(&self) -> &'static str {
        match self {
            Self::Image => "[이미지 첨부 수신]",
            Self::File => "[파일 첨부 수신]",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingData,
    SystemMessage,
    EmptyMessage,
}

impl IgnoreReason {
    pub fn ack(&self) -> &'static str {
        match self {
            Self::MissingData => "ignored: missing data",
            Self::SystemMessage => "ignored: system message",
            Self::EmptyMessage => "ignored: empty message",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub person_type: PersonType,
    pub text: String,
    pub user_id: String,
    pub chat_id: String,
    pub chat_key: String,
    pub external_message_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Ignored(IgnoreReason),
    Attachment { message: InboundMessage, kind: AttachmentKind },
    Text(InboundMessage),
}

/// Sorts a webhook body into the first pipeline stage's three outcomes.
pub fn classify(payload: &WebhookPayload) -> Classification {
    let (Some(entity), Some(chat)) =
        (payload.entity.as_ref(), payload.refers.as_ref().and_then(|r| r.user_chat.as_ref()))
    else {
        return Classification::Ignored(IgnoreReason::MissingData);
    };
    let (Some(message_id), Some(user_id), Some(chat_id)) =
        (non_empty(&entity.id), non_empty(&chat.user_id), non_empty(&chat.id))
    else {
        return Classification::Ignored(IgnoreReason::MissingData);
    };

    if entity.log.as_ref().is_some_and(is_truthy) {
        return Classification::Ignored(IgnoreReason::SystemMessage);
    }

    let text = entity.plain_text.clone().unwrap_or_default();
    let attachment = attachment_kind(entity);
    if text.trim().is_empty() && attachment.is_none() {
        return Classification::Ignored(IgnoreReason::EmptyMessage);
    }

    let message = InboundMessage {
        message_id: message_id.to_string(),
        person_type: PersonType::parse(entity.person_type.as_deref()),
        text,
        user_id: user_id.to_string(),
        chat_id: chat_id.to_string(),
        chat_key: chat.contact_key.clone().unwrap_or_default(),
        external_message_id: non_empty(&entity.external_message_id).map(str::to_string),
    };

    match attachment {
        Some(kind) => Classification::Attachment { message, kind },
        None => Classification::Text(message),
    }
}

/// Image blocks win over file blocks; legacy `files`/`attachments` arrays
/// count as files.
pub fn attachment_kind(entity: &MessageEntity) -> Option<AttachmentKind> {
    let blocks = entity.blocks.as_deref().unwrap_or_default();
    let mime_of = |block: &Block| {
        block.file.as_ref().and_then(|file| file.mime.clone()).unwrap_or_default()
    };

    let has_image = blocks.iter().any(|block| {
        matches!(block.kind.as_deref(), Some("image" | "image_link"))
            || mime_of(block).starts_with("image/")
    });
    if has_image {
        return Some(AttachmentKind::Image);
    }

    let has_file = blocks.iter().any(|block| {
        matches!(block.kind.as_deref(), Some("file" | "video" | "audio"))
            || (block.file.is_some() && !mime_of(block).starts_with("image/"))
    });
    let has_legacy = entity.files.as_ref().is_some_and(Value::is_array)
        || entity.attachments.as_ref().is_some_and(Value::is_array);

    (has_file || has_legacy).then_some(AttachmentKind::File)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{classify, AttachmentKind, Classification, IgnoreReason, PersonType, WebhookPayload};

    fn body(entity: Value) -> WebhookPayload {
        WebhookPayload::from_value(json!({
            "entity": entity,
            "refers": {"userChat": {"id": "chat-1", "userId": "user-1", "contactKey": "ck"}}
        }))
    }

    #[test]
    fn missing_chat_reference_is_ignored() {
        let payload = WebhookPayload::from_value(json!({"entity": {"id": "m1", "plainText": "hi"}}));
        assert_eq!(classify(&payload), Classification::Ignored(IgnoreReason::MissingData));
        assert_eq!(
            classify(&WebhookPayload::from_value(json!("not an object"))),
            Classification::Ignored(IgnoreReason::MissingData)
        );
    }

    #[test]
    fn system_log_and_empty_text_are_ignored() {
        let system = body(json!({"id": "m1", "plainText": "joined", "log": {"action": "invite"}}));
        assert_eq!(classify(&system), Classification::Ignored(IgnoreReason::SystemMessage));

        let empty = body(json!({"id": "m2", "plainText": "   "}));
        assert_eq!(classify(&empty), Classification::Ignored(IgnoreReason::EmptyMessage));
        assert_eq!(IgnoreReason::EmptyMessage.ack(), "ignored: empty message");
    }

    #[test]
    fn text_message_carries_identity_and_role() {
        let payload = body(json!({
            "id": "m1",
            "personType": "manager",
            "plainText": "//",
            "externalMessageId": "out-9"
        }));

        let Classification::Text(message) = classify(&payload) else {
            panic!("expected a text message");
        };
        assert_eq!(message.person_type, PersonType::Manager);
        assert_eq!(message.user_id, "user-1");
        assert_eq!(message.chat_id, "chat-1");
        assert_eq!(message.external_message_id.as_deref(), Some("out-9"));
    }

    #[test]
    fn image_blocks_and_image_mime_are_images() {
        for entity in [
            json!({"id": "m1", "blocks": [{"type": "image"}]}),
            json!({"id": "m1", "blocks": [{"type": "custom", "file": {"mime": "image/png"}}]}),
            json!({"id": "m1", "blocks": [{"type": "file"}, {"type": "image_link"}]}),
        ] {
            assert!(matches!(
                classify(&body(entity)),
                Classification::Attachment { kind: AttachmentKind::Image, .. }
            ));
        }
    }

    #[test]
    fn other_files_and_legacy_arrays_are_files() {
        for entity in [
            json!({"id": "m1", "blocks": [{"type": "video"}]}),
            json!({"id": "m1", "blocks": [{"type": "x", "file": {"mime": "application/pdf"}}]}),
            json!({"id": "m1", "plainText": "참고", "files": []}),
            json!({"id": "m1", "attachments": [{"name": "a.pdf"}]}),
        ] {
            assert!(matches!(
                classify(&body(entity)),
                Classification::Attachment { kind: AttachmentKind::File, .. }
            ));
        }
    }
}
