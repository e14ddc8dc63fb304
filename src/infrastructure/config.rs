use crate::domain::models::{TimerPreset, DEFAULT_EVENT_DURATION_MINUTES};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const APPS_JSON: &str = "apps.json";
const TIMER_JSON: &str = "timer.json";

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_EMERGENCY_TAP_COUNT: usize = 11;
pub const DEFAULT_EMERGENCY_TAP_WINDOW_SECONDS: i64 = 10;

pub const MAX_POLL_INTERVAL_SECONDS: u64 = 3_600;
pub const MAX_EVENT_DURATION_MINUTES: u32 = 7 * 24 * 60;
pub const MAX_EMERGENCY_TAP_COUNT: usize = 100;
pub const MAX_EMERGENCY_TAP_WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub app_name: String,
    pub timezone: String,
    pub poll_interval_seconds: u64,
    pub default_event_duration_minutes: u32,
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "ZenBlock".to_string(),
            timezone: "UTC".to_string(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            default_event_duration_minutes: DEFAULT_EVENT_DURATION_MINUTES,
            log_level: "info".to_string(),
        }
    }
}

impl AppSettings {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    pub presets: Vec<TimerPreset>,
    pub emergency_tap_count: usize,
    pub emergency_tap_window_seconds: i64,
    pub app_blocking_enabled: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            presets: vec![
                TimerPreset::new("Short", 15 * 60),
                TimerPreset::new("Medium", 30 * 60),
                TimerPreset::new("Long", 45 * 60),
            ],
            emergency_tap_count: DEFAULT_EMERGENCY_TAP_COUNT,
            emergency_tap_window_seconds: DEFAULT_EMERGENCY_TAP_WINDOW_SECONDS,
            app_blocking_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSelection {
    pub selected_app_ids: Vec<String>,
    pub default_blocked_app_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub app: AppSettings,
    pub apps: AppSelection,
    pub timer: TimerSettings,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    let timer = TimerSettings::default();
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "ZenBlock",
                "timezone": "UTC",
                "pollIntervalSeconds": DEFAULT_POLL_INTERVAL_SECONDS,
                "defaultEventDurationMinutes": DEFAULT_EVENT_DURATION_MINUTES,
                "logLevel": "info"
            }),
        ),
        (
            APPS_JSON,
            serde_json::json!({
                "schema": 1,
                "selectedAppIds": [],
                "defaultBlockedAppIds": [
                    "com.instagram.android",
                    "com.zhiliaoapp.musically",
                    "com.twitter.android",
                    "com.facebook.katana",
                    "com.google.android.youtube"
                ]
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "presets": timer.presets,
                "emergencyTapCount": timer.emergency_tap_count,
                "emergencyTapWindowSeconds": timer.emergency_tap_window_seconds,
                "appBlockingEnabled": timer.app_blocking_enabled
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_typed<T>(path: &Path) -> Result<T, InfraError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = read_config(path)?;
    serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid structure in {}: {error}", path.display()))
    })
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let app: AppSettings = read_typed(&config_dir.join(APP_JSON))?;
    let apps: AppSelection = read_typed(&config_dir.join(APPS_JSON))?;
    let timer: TimerSettings = read_typed(&config_dir.join(TIMER_JSON))?;

    app.time_zone()?;
    if !(1..=MAX_POLL_INTERVAL_SECONDS).contains(&app.poll_interval_seconds) {
        return Err(InfraError::InvalidConfig(format!(
            "pollIntervalSeconds must be within 1..={MAX_POLL_INTERVAL_SECONDS}"
        )));
    }
    if !(1..=MAX_EVENT_DURATION_MINUTES).contains(&app.default_event_duration_minutes) {
        return Err(InfraError::InvalidConfig(format!(
            "defaultEventDurationMinutes must be within 1..={MAX_EVENT_DURATION_MINUTES}"
        )));
    }
    if !(1..=MAX_EMERGENCY_TAP_COUNT).contains(&timer.emergency_tap_count) {
        return Err(InfraError::InvalidConfig(format!(
            "emergencyTapCount must be within 1..={MAX_EMERGENCY_TAP_COUNT}"
        )));
    }
    if !(1..=MAX_EMERGENCY_TAP_WINDOW_SECONDS).contains(&timer.emergency_tap_window_seconds) {
        return Err(InfraError::InvalidConfig(format!(
            "emergencyTapWindowSeconds must be within 1..={MAX_EMERGENCY_TAP_WINDOW_SECONDS}"
        )));
    }
    for preset in &timer.presets {
        preset.validate().map_err(InfraError::InvalidConfig)?;
    }

    Ok(AppConfig { app, apps, timer })
}

pub fn read_selected_app_ids(config_dir: &Path) -> Result<Vec<String>, InfraError> {
    let apps: AppSelection = read_typed(&config_dir.join(APPS_JSON))?;
    Ok(normalize_app_ids(apps.selected_app_ids))
}

pub fn save_selected_app_ids(config_dir: &Path, app_ids: &[String]) -> Result<(), InfraError> {
    let path = config_dir.join(APPS_JSON);
    let mut apps = read_config(&path)?;
    let object = apps.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    let normalized = normalize_app_ids(app_ids.to_vec());
    object.insert(
        "selectedAppIds".to_string(),
        serde_json::to_value(normalized)?,
    );
    write_config(&path, &apps)
}

pub fn save_timer_presets(config_dir: &Path, presets: &[TimerPreset]) -> Result<(), InfraError> {
    let path = config_dir.join(TIMER_JSON);
    let mut timer = read_config(&path)?;
    let object = timer.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("presets".to_string(), serde_json::to_value(presets)?);
    write_config(&path, &timer)
}

fn normalize_app_ids(app_ids: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(app_ids.len());
    for app_id in app_ids {
        let trimmed = app_id.trim();
        if trimmed.is_empty() || normalized.iter().any(|existing| existing == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}
