use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_DURATION_MINUTES: u32 = 60;
pub const MAX_TIMER_HOURS: u32 = 99;
pub const MAX_TIMER_MINUTES: u32 = 59;
pub const MAX_TIMER_SECONDS: u32 = 59;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventPriority {
    #[serde(rename = "strict")]
    Strict,
    #[default]
    #[serde(rename = "non-strict", other)]
    NonStrict,
}

/// Calendar entry as handed over by the calendar layer. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub date: Option<String>,
    /// `HH:MM` (seconds optional), start of the event in local time.
    #[serde(default)]
    pub time: Option<String>,
    /// Minutes. Missing or zero falls back to the configured default.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub priority: EventPriority,
}

impl Event {
    pub fn is_strict(&self) -> bool {
        self.priority == EventPriority::Strict
    }

    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() { "Unknown event" } else { title }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        if let Some(date) = self.date.as_deref() {
            validate_date(date, "event.date")?;
        }
        if let Some(time) = self.time.as_deref() {
            if parse_event_time(time).is_none() {
                return Err("event.time must be HH:MM".to_string());
            }
        }
        Ok(())
    }

    fn local_start(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(self.date.as_deref()?.trim(), "%Y-%m-%d").ok()?;
        let time = parse_event_time(self.time.as_deref()?)?;
        Some(date.and_time(time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActiveWindow {
    /// Both ends are inclusive.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.end - now).num_seconds()
    }
}

/// Converts event wall-clock fields into absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTiming {
    pub time_zone: Tz,
    pub default_duration_minutes: u32,
}

impl Default for EventTiming {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            default_duration_minutes: DEFAULT_EVENT_DURATION_MINUTES,
        }
    }
}

impl EventTiming {
    pub fn new(time_zone: Tz, default_duration_minutes: u32) -> Self {
        Self {
            time_zone,
            default_duration_minutes,
        }
    }

    pub fn duration_minutes(&self, event: &Event) -> u32 {
        match event.duration {
            Some(minutes) if minutes > 0 => minutes,
            _ => self.default_duration_minutes,
        }
    }

    /// `None` when the event lacks a parseable date or time.
    pub fn window(&self, event: &Event) -> Option<ActiveWindow> {
        let local = event.local_start()?;
        let start = self
            .time_zone
            .from_local_datetime(&local)
            .earliest()
            // Inside a DST gap: take the first valid instant after it.
            .or_else(|| {
                self.time_zone
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })?
            .with_timezone(&Utc);
        let end = start + Duration::minutes(i64::from(self.duration_minutes(event)));
        Some(ActiveWindow { start, end })
    }

    pub fn is_active_at(&self, event: &Event, instant: DateTime<Utc>) -> bool {
        self.window(event)
            .is_some_and(|window| window.contains(instant))
    }
}

/// Snapshot published to UI layers on every coordinator state change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStatus {
    pub auto_blocking_enabled: bool,
    pub is_monitoring: bool,
    pub current_blocking_event: Option<Event>,
    pub is_blocking: bool,
}

impl BlockingStatus {
    pub fn new(
        auto_blocking_enabled: bool,
        is_monitoring: bool,
        current_blocking_event: Option<Event>,
    ) -> Self {
        let is_blocking = current_blocking_event.is_some();
        Self {
            auto_blocking_enabled,
            is_monitoring,
            current_blocking_event,
            is_blocking,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerPreset {
    pub name: String,
    pub seconds: u32,
}

impl TimerPreset {
    pub fn new(name: impl Into<String>, seconds: u32) -> Self {
        Self {
            name: name.into(),
            seconds,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "preset.name")?;
        if self.seconds == 0 {
            return Err("preset.seconds must be > 0".to_string());
        }
        if self.seconds > max_timer_seconds() {
            return Err(format!("preset.seconds must be <= {}", max_timer_seconds()));
        }
        Ok(())
    }

    pub fn hms(&self) -> (u32, u32, u32) {
        split_hms(self.seconds)
    }
}

pub fn max_timer_seconds() -> u32 {
    MAX_TIMER_HOURS * 3600 + MAX_TIMER_MINUTES * 60 + MAX_TIMER_SECONDS
}

pub fn split_hms(total_seconds: u32) -> (u32, u32, u32) {
    (
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60,
    )
}

fn parse_event_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
