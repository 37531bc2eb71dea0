//! Calendar oracle: free/busy lookups, event insertion and the slot search
//! built on top of them.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, SecondsFormat, TimeZone, Timelike, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use concierge_core::config::{CalendarConfig, RegionConfig};
use concierge_core::language::Language;
use concierge_core::time::{
    format_for_language, is_business_hours, BUSINESS_CLOSE_HOUR, BUSINESS_OPEN_HOUR,
};

pub const SLOT_MINUTES: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalendarError {
    #[error("calendar access token is not configured")]
    MissingCredentials,
    #[error("calendar request failed: {0}")]
    Request(String),
    #[error("calendar returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// A 30-minute consultation event in region time.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub time_zone: String,
}

impl NewEvent {
    pub fn consultation(
        customer_name: &str,
        contact: &str,
        start: DateTime<Utc>,
        region: &RegionConfig,
    ) -> Self {
        let offset = region.offset();
        let local_start = start.with_timezone(&offset);
        Self {
            summary: format!("상담예약: {customer_name}"),
            description: format!(
                "고객 연락처: {contact}\n예약 시간: {}",
                format_for_language(start, Language::Ko, offset)
            ),
            start: local_start,
            end: local_start + Duration::minutes(SLOT_MINUTES),
            time_zone: region.time_zone.clone(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "summary": self.summary,
            "description": self.description,
            "start": {
                "dateTime": self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "timeZone": self.time_zone,
            },
            "end": {
                "dateTime": self.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "timeZone": self.time_zone,
            },
            "reminders": {
                "useDefault": false,
                "overrides": [
                    {"method": "email", "minutes": 24 * 60},
                    {"method": "popup", "minutes": 30},
                ],
            },
        })
    }
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn free_busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    /// Returns the new event id.
    async fn insert_event(&self, event: &NewEvent) -> Result<String, CalendarError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyQuery<'a> {
    time_min: String,
    time_max: String,
    items: [CalendarItem<'a>; 1],
}

#[derive(Serialize)]
struct CalendarItem<'a> {
    id: &'a str,
}

/// Google Calendar v3 over REST with a bearer access token.
pub struct GoogleCalendarClient {
    client: Client,
    base_url: String,
    calendar_id: String,
    access_token: Option<SecretString>,
}

impl GoogleCalendarClient {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| CalendarError::Request(error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            calendar_id: config.calendar_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn token(&self) -> Result<&str, CalendarError> {
        self.access_token
            .as_ref()
            .map(|token| token.expose_secret())
            .filter(|token| !token.trim().is_empty())
            .ok_or(CalendarError::MissingCredentials)
    }

    fn free_busy_request(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<reqwest::Request, CalendarError> {
        let body = FreeBusyQuery {
            time_min: start.to_rfc3339_opts(SecondsFormat::Millis, true),
            time_max: end.to_rfc3339_opts(SecondsFormat::Millis, true),
            items: [CalendarItem { id: &self.calendar_id }],
        };
        self.client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(self.token()?)
            .json(&body)
            .build()
            .map_err(|error| CalendarError::Request(error.to_string()))
    }

    fn insert_request(&self, event: &NewEvent) -> Result<reqwest::Request, CalendarError> {
        self.client
            .post(format!("{}/calendars/{}/events", self.base_url, self.calendar_id))
            .bearer_auth(self.token()?)
            .json(&event.to_json())
            .build()
            .map_err(|error| CalendarError::Request(error.to_string()))
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value, CalendarError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|error| CalendarError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status { status: status.as_u16(), body });
        }
        response.json::<Value>().await.map_err(|error| CalendarError::Decode(error.to_string()))
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn free_busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let request = self.free_busy_request(start, end)?;
        let value = self.execute(request).await?;
        parse_busy(&value, &self.calendar_id)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<String, CalendarError> {
        let request = self.insert_request(event)?;
        let value = self.execute(request).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CalendarError::Decode("event response has no id".to_string()))
    }
}

fn parse_busy(response: &Value, calendar_id: &str) -> Result<Vec<BusyInterval>, CalendarError> {
    let Some(busy) = response
        .get("calendars")
        .and_then(|calendars| calendars.get(calendar_id))
        .and_then(|calendar| calendar.get("busy"))
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };

    busy.iter()
        .map(|interval| {
            let start = interval_bound(interval, "start")?;
            let end = interval_bound(interval, "end")?;
            Ok(BusyInterval { start, end })
        })
        .collect()
}

fn interval_bound(interval: &Value, key: &str) -> Result<DateTime<Utc>, CalendarError> {
    let raw = interval
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CalendarError::Decode(format!("busy interval without `{key}`")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| CalendarError::Decode(format!("invalid busy `{key}` `{raw}`: {error}")))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotSuggestion {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub display: String,
}

/// Availability questions answered against the calendar in region time.
#[derive(Clone)]
pub struct SlotSearch {
    calendar: Arc<dyn CalendarClient>,
    region: FixedOffset,
}

impl SlotSearch {
    pub fn new(calendar: Arc<dyn CalendarClient>, region: FixedOffset) -> Self {
        Self { calendar, region }
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarClient> {
        &self.calendar
    }

    /// True when nothing busy overlaps `[start, start + minutes)`. A failed
    /// lookup counts as available so booking is never blocked by it.
    pub async fn is_range_available(&self, start: DateTime<Utc>, minutes: i64) -> bool {
        let end = start + Duration::minutes(minutes);
        match self.calendar.free_busy(start, end).await {
            Ok(busy) => !busy.iter().any(|interval| interval.overlaps(start, end)),
            Err(error) => {
                warn!(
                    event_name = "calendar.free_busy.failed",
                    error = %error,
                    "availability lookup failed; treating range as free"
                );
                true
            }
        }
    }

    /// First free 30-minute slot at or after `from`, stepping 30 minutes up to
    /// `horizon_hours` ahead (inclusive), skipping weekends and hours outside
    /// business time.
    pub async fn find_nearest_available_slot(
        &self,
        from: DateTime<Utc>,
        horizon_hours: i64,
    ) -> Option<DateTime<Utc>> {
        let step = Duration::minutes(SLOT_MINUTES);
        let limit = from + Duration::hours(horizon_hours);
        let candidates: Vec<DateTime<Utc>> = std::iter::successors(Some(from), |t| Some(*t + step))
            .take_while(|t| *t <= limit)
            .filter(|t| is_business_hours(*t, self.region))
            .collect();
        let first = *candidates.first()?;

        let busy = match self.calendar.free_busy(first, limit + step).await {
            Ok(busy) => busy,
            Err(error) => {
                warn!(
                    event_name = "calendar.nearest_slot.lookup_failed",
                    error = %error,
                    "slot search lookup failed; offering the first business slot"
                );
                return Some(first);
            }
        };

        candidates.into_iter().find(|candidate| {
            let end = *candidate + step;
            !busy.iter().any(|interval| interval.overlaps(*candidate, end))
        })
    }

    /// Up to `top` free on-the-hour slots over the next `days` weekdays. When
    /// the calendar cannot be read, 14:00 on the next few weekdays is offered.
    pub async fn available_slots(
        &self,
        now: DateTime<Utc>,
        days: i64,
        top: usize,
    ) -> Vec<SlotSuggestion> {
        let slot = Duration::minutes(SLOT_MINUTES);
        let busy = match self.calendar.free_busy(now, now + Duration::days(days)).await {
            Ok(busy) => busy,
            Err(error) => {
                warn!(
                    event_name = "calendar.available_slots.lookup_failed",
                    error = %error,
                    "slot listing failed; offering default afternoon slots"
                );
                return self.fallback_slots(now);
            }
        };

        let local_now = now.with_timezone(&self.region);
        let mut slots = Vec::new();
        for day in 0..days {
            let date = local_now.date_naive() + Duration::days(day);
            if date.weekday().number_from_monday() > 5 {
                continue;
            }
            for hour in BUSINESS_OPEN_HOUR..BUSINESS_CLOSE_HOUR {
                let Some(start) = self.local_instant(date, hour) else {
                    continue;
                };
                if start < now {
                    continue;
                }
                let end = start + slot;
                if busy.iter().any(|interval| interval.overlaps(start, end)) {
                    continue;
                }
                slots.push(SlotSuggestion { start, end, display: self.display(start) });
            }
        }
        slots.truncate(top);
        slots
    }

    fn fallback_slots(&self, now: DateTime<Utc>) -> Vec<SlotSuggestion> {
        let local_now = now.with_timezone(&self.region);
        (1..=3)
            .map(|day| local_now.date_naive() + Duration::days(day))
            .filter(|date| date.weekday().number_from_monday() <= 5)
            .filter_map(|date| self.local_instant(date, 14))
            .map(|start| SlotSuggestion {
                start,
                end: start + Duration::minutes(SLOT_MINUTES),
                display: self.display(start),
            })
            .collect()
    }

    fn local_instant(&self, date: chrono::NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, 0, 0)?;
        self.region.from_local_datetime(&naive).single().map(|local| local.with_timezone(&Utc))
    }

    fn display(&self, start: DateTime<Utc>) -> String {
        let local = start.with_timezone(&self.region);
        format!("{}월 {}일 {:02}:{:02}", local.month(), local.day(), local.hour(), local.minute())
    }
}

/// Calendar double backed by a fixed busy list; inserted events are kept.
#[derive(Default)]
pub struct StaticCalendar {
    busy: Vec<BusyInterval>,
    failure: Option<CalendarError>,
    inserted: Mutex<Vec<NewEvent>>,
    queries: Mutex<u32>,
}

impl StaticCalendar {
    pub fn with_busy(busy: Vec<BusyInterval>) -> Self {
        Self { busy, ..Self::default() }
    }

    pub fn failing(error: CalendarError) -> Self {
        Self { failure: Some(error), ..Self::default() }
    }

    pub async fn inserted(&self) -> Vec<NewEvent> {
        self.inserted.lock().await.clone()
    }

    pub async fn query_count(&self) -> u32 {
        *self.queries.lock().await
    }
}

#[async_trait]
impl CalendarClient for StaticCalendar {
    async fn free_busy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        *self.queries.lock().await += 1;
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.busy.iter().copied().filter(|interval| interval.overlaps(start, end)).collect())
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<String, CalendarError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let mut inserted = self.inserted.lock().await;
        inserted.push(event.clone());
        Ok(format!("evt-{}", inserted.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use concierge_core::config::AppConfig;

    use super::{
        parse_busy, BusyInterval, CalendarError, GoogleCalendarClient, NewEvent, SlotSearch,
        StaticCalendar,
    };

    fn kst(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // 2026-03-02 is a Monday.
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).single().expect("valid timestamp")
            - Duration::hours(9)
    }

    fn search(calendar: StaticCalendar) -> SlotSearch {
        SlotSearch::new(Arc::new(calendar), AppConfig::default().region.offset())
    }

    fn busy(start: DateTime<Utc>, minutes: i64) -> BusyInterval {
        BusyInterval { start, end: start + Duration::minutes(minutes) }
    }

    #[tokio::test]
    async fn overlapping_busy_interval_blocks_the_range() {
        let slots = search(StaticCalendar::with_busy(vec![busy(kst(3, 14, 15), 30)]));

        assert!(!slots.is_range_available(kst(3, 14, 0), 30).await);
        assert!(slots.is_range_available(kst(3, 14, 45), 30).await);
    }

    #[tokio::test]
    async fn lookup_failure_fails_open() {
        let slots = search(StaticCalendar::failing(CalendarError::Request("timeout".into())));
        assert!(slots.is_range_available(kst(3, 14, 0), 30).await);
    }

    #[tokio::test]
    async fn nearest_slot_steps_past_busy_time() {
        let slots = search(StaticCalendar::with_busy(vec![busy(kst(3, 14, 0), 60)]));

        let nearest = slots.find_nearest_available_slot(kst(3, 14, 0), 4).await;

        assert_eq!(nearest, Some(kst(3, 15, 0)));
    }

    #[tokio::test]
    async fn nearest_slot_skips_closing_time_and_gives_up_past_horizon() {
        let slots = search(StaticCalendar::with_busy(vec![busy(kst(3, 17, 0), 120)]));
        assert_eq!(slots.find_nearest_available_slot(kst(3, 17, 0), 4).await, None);

        let weekend = search(StaticCalendar::default());
        assert_eq!(weekend.find_nearest_available_slot(kst(7, 11, 0), 4).await, None);
    }

    #[tokio::test]
    async fn available_slots_are_weekday_hours_in_order() {
        let slots = search(StaticCalendar::with_busy(vec![busy(kst(6, 17, 0), 30)]));

        // Friday 16:30 local: 17:00 is busy, 18:00 is free, then the weekend.
        let listed = slots.available_slots(kst(6, 16, 30), 7, 3).await;

        let displays: Vec<&str> = listed.iter().map(|slot| slot.display.as_str()).collect();
        assert_eq!(displays, vec!["3월 6일 18:00", "3월 9일 10:00", "3월 9일 11:00"]);
    }

    #[tokio::test]
    async fn available_slots_fall_back_to_afternoons() {
        let slots = search(StaticCalendar::failing(CalendarError::MissingCredentials));

        // Thursday: Friday qualifies, Saturday and Sunday do not.
        let listed = slots.available_slots(kst(5, 9, 0), 7, 3).await;

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].start, kst(6, 14, 0));
    }

    #[test]
    fn consultation_event_is_thirty_minutes_in_region_time() {
        let config = AppConfig::default();
        let event = NewEvent::consultation("김민지", "010-1234-5678", kst(3, 14, 0), &config.region);

        assert_eq!(event.summary, "상담예약: 김민지");
        assert_eq!(event.description, "고객 연락처: 010-1234-5678\n예약 시간: 2026년 3월 3일 오후 2:00");
        let body = event.to_json();
        assert_eq!(body["start"]["dateTime"], json!("2026-03-03T14:00:00+09:00"));
        assert_eq!(body["end"]["dateTime"], json!("2026-03-03T14:30:00+09:00"));
        assert_eq!(body["start"]["timeZone"], json!("Asia/Seoul"));
        assert_eq!(body["reminders"]["overrides"][0]["minutes"], json!(1440));
    }

    #[test]
    fn client_requires_a_token() {
        let client =
            GoogleCalendarClient::from_config(&AppConfig::default().calendar).expect("builds");
        assert_eq!(
            client.free_busy_request(kst(3, 14, 0), kst(3, 15, 0)).err(),
            Some(CalendarError::MissingCredentials)
        );
    }

    #[test]
    fn free_busy_request_uses_bearer_token() {
        let mut config = AppConfig::default().calendar;
        config.access_token = Some("ya29.token".to_string().into());
        let client = GoogleCalendarClient::from_config(&config).expect("builds");

        let request = client.free_busy_request(kst(3, 14, 0), kst(3, 15, 0)).expect("builds");

        assert!(request.url().path().ends_with("/freeBusy"));
        assert_eq!(
            request.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer ya29.token")
        );
    }

    #[test]
    fn busy_intervals_are_read_for_the_configured_calendar() {
        let response = json!({"calendars": {"primary": {"busy": [
            {"start": "2026-03-03T05:00:00Z", "end": "2026-03-03T05:30:00Z"}
        ]}}});

        let busy = parse_busy(&response, "primary").expect("decodes");
        assert_eq!(busy, vec![BusyInterval { start: kst(3, 14, 0), end: kst(3, 14, 30) }]);
        assert_eq!(parse_busy(&response, "other").expect("decodes"), Vec::new());
    }
}
