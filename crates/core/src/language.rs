use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ko,
    En,
    Th,
    Ja,
    Zh,
    Vi,
    Es,
    Pt,
    Fr,
    De,
    Id,
    Ms,
    Ar,
    Hi,
    Ru,
}

impl Language {
    pub const ALL: [Language; 15] = [
        Self::Ko,
        Self::En,
        Self::Th,
        Self::Ja,
        Self::Zh,
        Self::Vi,
        Self::Es,
        Self::Pt,
        Self::Fr,
        Self::De,
        Self::Id,
        Self::Ms,
        Self::Ar,
        Self::Hi,
        Self::Ru,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::En => "en",
            Self::Th => "th",
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::Vi => "vi",
            Self::Es => "es",
            Self::Pt => "pt",
            Self::Fr => "fr",
            Self::De => "de",
            Self::Id => "id",
            Self::Ms => "ms",
            Self::Ar => "ar",
            Self::Hi => "hi",
            Self::Ru => "ru",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|language| language.as_str() == normalized)
    }

    /// Human-readable name used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ko => "Korean",
            Self::En => "English",
            Self::Th => "Thai",
            Self::Ja => "Japanese",
            Self::Zh => "Chinese",
            Self::Vi => "Vietnamese",
            Self::Es => "Spanish",
            Self::Pt => "Portuguese",
            Self::Fr => "French",
            Self::De => "German",
            Self::Id => "Indonesian",
            Self::Ms => "Malay",
            Self::Ar => "Arabic",
            Self::Hi => "Hindi",
            Self::Ru => "Russian",
        }
    }
}

const THAI_KEYWORDS: &[&str] =
    &["สวัสดี", "ขอบคุณ", "ขอโทษ", "นัดหมาย", "ราคา", "ค่ะ", "ครับ", "นะคะ", "นะครับ"];

const VIETNAMESE_MARKS: &str =
    "àáạảãâầấậẩẫăằắặẳẵèéẹẻẽêềếệểễìíịỉĩòóọỏõôồốộổỗơờớợởỡùúụủũưừứựửữỳýỵỷỹđ";

const SPANISH_WORDS: &[&str] =
    &["hola", "como", "que", "por", "para", "con", "una", "está", "muy", "gracias", "donde", "cuando"];
const PORTUGUESE_WORDS: &[&str] =
    &["olá", "com", "uma", "muito", "obrigado", "obrigada", "onde", "quando", "você"];
const FRENCH_WORDS: &[&str] =
    &["bonjour", "comment", "pour", "avec", "une", "est", "très", "merci", "où", "quand"];
const GERMAN_WORDS: &[&str] =
    &["hallo", "wie", "was", "für", "mit", "eine", "ist", "sehr", "danke", "wo", "wann"];
const INDONESIAN_WORDS: &[&str] = &[
    "apa", "bagaimana", "dimana", "kapan", "mengapa", "dengan", "untuk", "dari", "yang", "adalah",
];
const MALAY_WORDS: &[&str] = &["khabar", "bila", "daripada", "ialah", "sila"];
const MALAY_PHRASES: &[&str] = &["apa khabar", "di mana", "terima kasih"];

fn has_char_in(text: &str, ranges: &[(u32, u32)]) -> bool {
    text.chars().any(|c| {
        let code = c as u32;
        ranges.iter().any(|(start, end)| (*start..=*end).contains(&code))
    })
}

/// Script checks first, then Latin word lists. Word lists match whole
/// tokens so English words that contain e.g. `por` are not misread.
pub fn detect(text: &str) -> Language {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Language::Ko;
    }
    let lowered = trimmed.to_lowercase();

    if has_char_in(trimmed, &[(0x3131, 0x3163), (0xAC00, 0xD7A3)]) {
        return Language::Ko;
    }
    if has_char_in(trimmed, &[(0x0E00, 0x0E7F)])
        || THAI_KEYWORDS.iter().any(|word| lowered.contains(word))
    {
        return Language::Th;
    }
    if has_char_in(trimmed, &[(0x3040, 0x309F), (0x30A0, 0x30FF)]) {
        return Language::Ja;
    }
    if has_char_in(trimmed, &[(0x4E00, 0x9FFF)]) {
        return Language::Zh;
    }
    if lowered.chars().any(|c| VIETNAMESE_MARKS.contains(c)) && !is_romance_accent_only(&lowered)
    {
        return Language::Vi;
    }
    if has_char_in(trimmed, &[(0x0600, 0x06FF)]) {
        return Language::Ar;
    }
    if has_char_in(trimmed, &[(0x0900, 0x097F)]) {
        return Language::Hi;
    }
    if has_char_in(trimmed, &[(0x0400, 0x04FF)]) {
        return Language::Ru;
    }

    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    let mentions = |words: &[&str]| tokens.iter().any(|token| words.contains(token));

    if MALAY_PHRASES.iter().any(|phrase| lowered.contains(phrase)) || mentions(MALAY_WORDS) {
        return Language::Ms;
    }
    if mentions(SPANISH_WORDS) {
        return Language::Es;
    }
    if mentions(PORTUGUESE_WORDS) {
        return Language::Pt;
    }
    if mentions(FRENCH_WORDS) {
        return Language::Fr;
    }
    if mentions(GERMAN_WORDS) {
        return Language::De;
    }
    if mentions(INDONESIAN_WORDS) {
        return Language::Id;
    }
    Language::En
}

/// Accents shared with Spanish/Portuguese/French (á, é, ó, à, ê, ô ...)
/// alone do not make a text Vietnamese; letters unique to Vietnamese do.
fn is_romance_accent_only(lowered: &str) -> bool {
    const SHARED: &str = "àáâãèéêìíòóôõùú";
    lowered
        .chars()
        .filter(|c| VIETNAMESE_MARKS.contains(*c))
        .all(|c| SHARED.contains(c))
}
