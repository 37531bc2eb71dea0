use crate::language::Language;
use crate::locale::{ellipsis, sentence_enders};

/// Bounds `text` to `limit` characters, preferring to end on a sentence
/// boundary.
///
/// Every ending pattern for `language` is searched for its last occurrence
/// starting at or before `limit`; occurrences starting before `min_cut` are
/// ignored. The furthest-right end wins. Without any boundary in range the
/// text is hard-cut to `limit - 3` characters plus an ellipsis.
pub fn truncate_response(text: &str, language: Language, limit: usize, min_cut: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }

    let best_end = sentence_enders(language)
        .iter()
        .filter_map(|ender| {
            let pattern: Vec<char> = ender.chars().collect();
            last_occurrence_at_or_before(&chars, &pattern, limit)
                .filter(|start| *start >= min_cut)
                .map(|start| start + pattern.len())
        })
        .max();

    match best_end {
        Some(end) => chars[..end].iter().collect(),
        None => {
            let keep = limit.saturating_sub(3);
            let mut truncated: String = chars[..keep].iter().collect();
            truncated.push_str(ellipsis(language));
            truncated
        }
    }
}

fn last_occurrence_at_or_before(
    haystack: &[char],
    needle: &[char],
    max_start: usize,
) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let last_start = (haystack.len() - needle.len()).min(max_start);
    (0..=last_start).rev().find(|start| &haystack[*start..*start + needle.len()] == needle)
}

/// Plain character cap with a trailing `...`.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
