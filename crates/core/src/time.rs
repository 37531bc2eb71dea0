//! Date-time helpers for booking input and region-local rendering.

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc, Weekday,
};
use regex::Regex;

use crate::language::Language;

pub const BUSINESS_OPEN_HOUR: u32 = 10;
pub const BUSINESS_CLOSE_HOUR: u32 = 19;

const NATURAL_MARKERS: &[&str] =
    &["tomorrow", "today", "next", "내일", "오늘", "모레", "다음", "오전", "오후"];

fn iso_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{3})?(Z|[+-]\d{2}:\d{2})?$")
            .expect("iso8601 regex must compile")
    })
}

fn korean_clock() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s*시\s*(?:(\d{1,2})\s*분)?").expect("korean clock regex must compile")
    })
}

fn colon_clock() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("colon clock regex must compile"))
}

fn meridiem_clock() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s*(am|pm)\b").expect("meridiem clock regex must compile")
    })
}

fn korean_meridiem() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(오전|오후)\s*(\d{1,2})").expect("korean meridiem regex must compile")
    })
}

/// Shape check plus a real calendar parse.
pub fn is_valid_iso8601(value: &str) -> bool {
    iso_pattern().is_match(value) && parse_iso8601(value, Utc.fix()).is_some()
}

/// Parses an ISO 8601 instant. Values without an offset are read as
/// region-local wall time.
pub fn parse_iso8601(value: &str, region: FixedOffset) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if !iso_pattern().is_match(trimmed) {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    region.from_local_datetime(&naive).single().map(|local| local.with_timezone(&Utc))
}

/// True when the text carries relative-date or meridiem words that need
/// `parse_natural_time` before ISO validation.
pub fn looks_natural(text: &str) -> bool {
    let lowered = text.to_lowercase();
    NATURAL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Resolves phrases like "내일 오후 3시" or "tomorrow 2pm" against `now` in
/// region time. Without an hour the result is 10:00 when the text mentions
/// a booking (예약), otherwise `None`.
pub fn parse_natural_time(
    text: &str,
    now: DateTime<Utc>,
    region: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    let day_offset = if lowered.contains("모레") || lowered.contains("day after tomorrow") {
        2
    } else if lowered.contains("내일") || lowered.contains("tomorrow") {
        1
    } else {
        0
    };

    let (hour, minute) = match extract_clock(&lowered) {
        Some(clock) => clock,
        None if lowered.contains("예약") => (BUSINESS_OPEN_HOUR, 0),
        None => return None,
    };
    if hour > 23 || minute > 59 {
        return None;
    }

    let date = now.with_timezone(&region).date_naive() + Duration::days(day_offset);
    let naive = date.and_hms_opt(hour, minute, 0)?;
    region.from_local_datetime(&naive).single()
}

fn extract_clock(lowered: &str) -> Option<(u32, u32)> {
    let pm = lowered.contains("오후") || lowered.contains("pm");
    let am = lowered.contains("오전") || lowered.contains("am");
    let adjust = |hour: u32| {
        if pm && hour < 12 {
            hour + 12
        } else if am && hour == 12 {
            0
        } else {
            hour
        }
    };

    if let Some(captures) = korean_clock().captures(lowered) {
        let hour = captures.get(1)?.as_str().parse::<u32>().ok()?;
        let minute = captures
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        return Some((adjust(hour), minute));
    }
    if let Some(captures) = colon_clock().captures(lowered) {
        let hour = captures.get(1)?.as_str().parse::<u32>().ok()?;
        let minute = captures.get(2)?.as_str().parse::<u32>().ok()?;
        return Some((adjust(hour), minute));
    }
    if let Some(captures) = meridiem_clock().captures(lowered) {
        let hour = captures.get(1)?.as_str().parse::<u32>().ok()?;
        let is_pm = captures.get(2)?.as_str() == "pm";
        let hour = match (is_pm, hour) {
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, 12) => 0,
            (false, h) => h,
        };
        return Some((hour, 0));
    }
    if let Some(captures) = korean_meridiem().captures(lowered) {
        let is_pm = captures.get(1)?.as_str() == "오후";
        let hour = captures.get(2)?.as_str().parse::<u32>().ok()?;
        let hour = match (is_pm, hour) {
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, 12) => 0,
            (false, h) => h,
        };
        return Some((hour, 0));
    }
    None
}

/// Mon-Fri, 10:00 inclusive to 19:00 exclusive, region time.
pub fn is_business_hours(instant: DateTime<Utc>, region: FixedOffset) -> bool {
    let local = instant.with_timezone(&region);
    !matches!(local.weekday(), Weekday::Sat | Weekday::Sun)
        && (BUSINESS_OPEN_HOUR..BUSINESS_CLOSE_HOUR).contains(&local.hour())
}

/// Earliest instant at or after `from` that falls in business hours.
pub fn next_business_time(from: DateTime<Utc>, region: FixedOffset) -> DateTime<Utc> {
    if is_business_hours(from, region) {
        return from;
    }
    let local = from.with_timezone(&region);
    let mut date = local.date_naive();
    if local.hour() >= BUSINESS_CLOSE_HOUR {
        date += Duration::days(1);
    }
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    opening_of(date, region).unwrap_or(from)
}

fn opening_of(date: NaiveDate, region: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(BUSINESS_OPEN_HOUR, 0, 0)?;
    region.from_local_datetime(&naive).single().map(|local| local.with_timezone(&Utc))
}

const EN_MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

const TH_MONTHS: [&str; 12] = [
    "มกราคม", "กุมภาพันธ์", "มีนาคม", "เมษายน", "พฤษภาคม", "มิถุนายน", "กรกฎาคม", "สิงหาคม",
    "กันยายน", "ตุลาคม", "พฤศจิกายน", "ธันวาคม",
];

/// Renders an instant in region time using the conventions of `language`.
pub fn format_for_language(
    instant: DateTime<Utc>,
    language: Language,
    region: FixedOffset,
) -> String {
    let local = instant.with_timezone(&region);
    let (year, month, day) = (local.year(), local.month(), local.day());
    let (hour, minute) = (local.hour(), local.minute());
    let (is_pm, hour12) = local.hour12();
    let month_index = month.saturating_sub(1) as usize;

    match language {
        Language::Ko => {
            let meridiem = if is_pm { "오후" } else { "오전" };
            format!("{year}년 {month}월 {day}일 {meridiem} {hour12}:{minute:02}")
        }
        Language::Ja => format!("{year}年{month}月{day}日 {hour}:{minute:02}"),
        Language::Zh => {
            let meridiem = if is_pm { "下午" } else { "上午" };
            format!("{year}年{month}月{day}日 {meridiem}{hour12}:{minute:02}")
        }
        Language::Th => {
            let buddhist_year = year + 543;
            format!("{day} {} {buddhist_year} {hour:02}:{minute:02} น.", TH_MONTHS[month_index])
        }
        Language::En => {
            let meridiem = if is_pm { "PM" } else { "AM" };
            format!("{} {day}, {year} at {hour12}:{minute:02} {meridiem}", EN_MONTHS[month_index])
        }
        _ => format!("{day:02}/{month:02}/{year} {hour:02}:{minute:02}"),
    }
}
