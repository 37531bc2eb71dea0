//! Clinic knowledge corpus and the deterministic keyword scorer used when
//! semantic retrieval is unavailable.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::text::truncate_with_ellipsis;

pub const SECTION_NAMES: [&str; 5] = ["promotions", "pricing", "faqs", "clinic", "reviews"];

const COMMON_PROCEDURES: &[&str] =
    &["슈링크", "인모드", "보톡스", "필러", "리프팅", "레이저", "필링", "마사지", "케어"];

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge corpus `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse knowledge corpus `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeSection {
    pub name: String,
    /// Flattened text used for scoring and embedding.
    pub text: String,
    pub structured: Option<Value>,
}

impl KnowledgeSection {
    pub fn from_value(name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        match value {
            Value::String(text) => {
                let structured = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(|parsed| parsed.is_array() || parsed.is_object());
                Self { name, text, structured }
            }
            other => Self { name, text: other.to_string(), structured: Some(other) },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Records of a structured section: the top-level array, or the first
    /// array found among an object's values.
    pub fn items(&self) -> Option<&Vec<Value>> {
        match self.structured.as_ref()? {
            Value::Array(items) => Some(items),
            Value::Object(map) => map.values().find_map(Value::as_array),
            _ => None,
        }
    }

    /// Procedure name keywords: parenthetical text stripped, words longer
    /// than one character.
    pub fn procedure_keywords(&self) -> Vec<String> {
        let Some(items) = self.items() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .flat_map(|name| {
                strip_parentheticals(name)
                    .split_whitespace()
                    .filter(|word| word.chars().count() > 1)
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn strip_parentheticals(value: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KnowledgeBase {
    sections: Vec<KnowledgeSection>,
}

impl KnowledgeBase {
    pub fn new(sections: Vec<KnowledgeSection>) -> Self {
        Self { sections }
    }

    /// Builds the corpus from a JSON object keyed by section name. Unknown
    /// keys are kept after the known sections.
    pub fn from_json(value: Value) -> Self {
        let mut map: Map<String, Value> = match value {
            Value::Object(map) => map,
            _ => return Self::default(),
        };
        let mut sections = Vec::new();
        for name in SECTION_NAMES {
            if let Some(value) = map.remove(name) {
                sections.push(KnowledgeSection::from_value(name, value));
            }
        }
        for (name, value) in map {
            sections.push(KnowledgeSection::from_value(name, value));
        }
        sections.retain(|section| !section.is_empty());
        Self { sections }
    }

    /// Loads the corpus file. A missing file yields an empty corpus.
    pub fn load(path: &Path) -> Result<Self, KnowledgeError> {
        if !path.exists() {
            info!(
                event_name = "knowledge.corpus.absent",
                path = %path.display(),
                "knowledge corpus file not found; starting with an empty corpus"
            );
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|source| KnowledgeError::Read { path: path.to_path_buf(), source })?;
        let value = serde_json::from_str::<Value>(&raw)
            .map_err(|source| KnowledgeError::Parse { path: path.to_path_buf(), source })?;
        let corpus = Self::from_json(value);
        info!(
            event_name = "knowledge.corpus.loaded",
            path = %path.display(),
            sections = corpus.sections.len(),
            "knowledge corpus loaded"
        );
        Ok(corpus)
    }

    pub fn sections(&self) -> &[KnowledgeSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Keyword tier of retrieval: best-scoring section above zero,
    /// summarized to `max_len` characters.
    pub fn search_keywords(&self, query: &str, max_len: usize) -> Option<String> {
        if query.trim().is_empty() {
            return None;
        }
        let mut best: Option<(&KnowledgeSection, u32)> = None;
        for section in &self.sections {
            let score = keyword_score(query, section);
            if score > best.map_or(0, |(_, top)| top) {
                best = Some((section, score));
            }
        }
        best.map(|(section, _)| summarize(section, max_len))
    }
}

/// Unique whitespace tokens counted by substring occurrence, plus bonuses
/// for price questions against priced sections and for procedure names.
pub fn keyword_score(query: &str, section: &KnowledgeSection) -> u32 {
    let query = query.to_lowercase();
    let document = section.text.to_lowercase();

    let tokens: HashSet<&str> = query.split_whitespace().collect();
    let mut score: u32 = tokens
        .iter()
        .map(|token| u32::try_from(document.matches(token).count()).unwrap_or(u32::MAX))
        .fold(0, u32::saturating_add);

    if (query.contains("가격") || query.contains("price")) && document.contains("price_krw") {
        score = score.saturating_add(10);
    }

    if section.items().is_some() {
        for keyword in section.procedure_keywords() {
            if query.contains(&keyword) {
                score = score.saturating_add(8);
            }
        }
    } else {
        for procedure in COMMON_PROCEDURES {
            if query.contains(procedure) && document.contains(procedure) {
                score = score.saturating_add(5);
            }
        }
    }

    score
}

/// Renders priced records as `name: 12,345원` lines; other sections keep
/// their flattened text. The result is capped at `max_len` characters.
pub fn summarize(section: &KnowledgeSection, max_len: usize) -> String {
    let priced: Vec<String> = section
        .items()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?;
                    let price = price_of(item.get("price_krw")?)?;
                    Some(format!("{name}: {}원", group_thousands(price)))
                })
                .collect()
        })
        .unwrap_or_default();

    let rendered = if priced.is_empty() { section.text.clone() } else { priced.join("\n") };
    truncate_with_ellipsis(&rendered, max_len)
}

fn price_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => {
            let digits: String = text.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, c) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
