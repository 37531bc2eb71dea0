//! Best-effort repair of near-JSON model output.
//!
//! Each step is a pure string transform. `extract_json` tries a strict parse
//! first and only falls back to the repair steps when that fails, so valid
//! payloads are never rewritten.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[A-Za-z]*\s*").expect("fence regex must compile"))
}

fn missing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([}"\]\d]|true|false|null)\s+"([A-Za-z0-9_]+)"\s*:"#)
            .expect("missing comma regex must compile")
    })
}

fn bare_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([{,]\s*)([A-Za-z0-9_]+)\s*:").expect("bare key regex must compile")
    })
}

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex must compile"))
}

/// Removes a surrounding markdown code fence.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let without_open = fence_open().replace(trimmed, "");
    without_open.trim_end().trim_end_matches("```").trim().to_string()
}

/// Keeps the text between the first `{` and the last `}`.
pub fn slice_outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// `"a": "x" "b": 1` becomes `"a": "x", "b": 1`.
pub fn insert_missing_commas(text: &str) -> String {
    missing_comma().replace_all(text, r#"$1, "$2":"#).into_owned()
}

/// `{key: 1}` becomes `{"key": 1}`.
pub fn quote_bare_keys(text: &str) -> String {
    bare_key().replace_all(text, r#"$1"$2":"#).into_owned()
}

pub fn strip_trailing_commas(text: &str) -> String {
    trailing_comma().replace_all(text, "$1").into_owned()
}

/// Parses model output into a JSON value, repairing common defects.
/// Returns `None` when nothing usable can be recovered.
pub fn extract_json(text: &str) -> Option<Value> {
    let unfenced = strip_code_fence(text);
    let object = slice_outer_object(&unfenced)?;

    if let Ok(value) = serde_json::from_str::<Value>(object) {
        return Some(value);
    }

    let repaired = strip_trailing_commas(&quote_bare_keys(&insert_missing_commas(object)));
    serde_json::from_str::<Value>(&repaired).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        extract_json, insert_missing_commas, quote_bare_keys, slice_outer_object,
        strip_code_fence, strip_trailing_commas,
    };

    #[test]
    fn code_fence_is_removed() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn outer_object_requires_both_braces() {
        assert_eq!(slice_outer_object("note: {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(slice_outer_object("no json here"), None);
        assert_eq!(slice_outer_object("} backwards {"), None);
    }

    #[test]
    fn individual_repairs() {
        assert_eq!(
            quote_bare_keys("{action: \"ANSWER\", nextState: \"IDLE\"}"),
            "{\"action\": \"ANSWER\", \"nextState\": \"IDLE\"}"
        );
        assert_eq!(strip_trailing_commas("{\"a\": [1, 2,], }"), "{\"a\": [1, 2]}");
        assert_eq!(insert_missing_commas("{\"a\": \"x\" \"b\": 1}"), "{\"a\": \"x\", \"b\": 1}");
    }

    #[test]
    fn near_json_model_output_is_recovered() {
        let raw = "```json\n{action: \"CALL_FUNCTION\", functionName: \"startBookingProcess\", \
                   parameters: {dateTime: \"2026-03-03T14:00:00+09:00\",},}\n```";

        let value = extract_json(raw).expect("repairable output");

        assert_eq!(value["action"], json!("CALL_FUNCTION"));
        assert_eq!(value["parameters"]["dateTime"], json!("2026-03-03T14:00:00+09:00"));
    }

    #[test]
    fn valid_json_is_not_rewritten() {
        let raw = r#"{"action":"ANSWER","response":"오전 10:30, 11:00 가능합니다"}"#;
        let value = extract_json(raw).expect("valid json");
        assert_eq!(value["response"], json!("오전 10:30, 11:00 가능합니다"));
    }

    #[test]
    fn prose_gives_up() {
        assert_eq!(extract_json("슈링크는 리프팅 시술입니다."), None);
        assert_eq!(extract_json("{this is: not, json at all"), None);
    }
}
