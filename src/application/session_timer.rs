//! Standalone focus countdown ("Zen mode").
//!
//! `Idle -> Running -> Idle`. There is no paused phase: a session ends by
//! natural expiry, a manual stop, or the multi-tap emergency stop.

use crate::application::coordinator::NowProvider;
use crate::domain::models::{
    split_hms, TimerPreset, MAX_TIMER_HOURS, MAX_TIMER_MINUTES, MAX_TIMER_SECONDS,
};
use crate::infrastructure::app_selection::SelectedAppsStore;
use crate::infrastructure::blocking_driver::BlockingDriver;
use crate::infrastructure::config::{TimerSettings, MAX_EMERGENCY_TAP_WINDOW_SECONDS};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::Notifier;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const BLOCKING_FAILED_MESSAGE: &str =
    "Failed to start app blocking. Timer will continue without blocking.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Manual,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// Tap while idle; nothing recorded.
    Ignored,
    /// Taps currently inside the window, this one included.
    Counted(usize),
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimerState {
    pub phase: TimerPhase,
    pub running: bool,
    pub duration_seconds: u32,
    pub remaining_seconds: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub blocking_active: bool,
    pub editing_preset: Option<usize>,
}

pub struct SessionTimer {
    driver: Arc<dyn BlockingDriver>,
    selected_apps: Arc<dyn SelectedAppsStore>,
    notifier: Arc<dyn Notifier>,
    now_provider: NowProvider,
    fallback_app_ids: Vec<String>,
    app_blocking_enabled: bool,
    emergency_tap_count: usize,
    emergency_tap_window: Duration,
    hours: u32,
    minutes: u32,
    seconds: u32,
    phase: TimerPhase,
    duration_seconds: u32,
    remaining_seconds: u32,
    started_at: Option<DateTime<Utc>>,
    session_id: u64,
    taps: VecDeque<DateTime<Utc>>,
    blocking_active: bool,
    presets: Vec<TimerPreset>,
    editing_preset: Option<usize>,
}

impl SessionTimer {
    pub fn new(
        settings: TimerSettings,
        driver: Arc<dyn BlockingDriver>,
        selected_apps: Arc<dyn SelectedAppsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            driver,
            selected_apps,
            notifier,
            now_provider: Arc::new(Utc::now),
            fallback_app_ids: Vec::new(),
            app_blocking_enabled: settings.app_blocking_enabled,
            emergency_tap_count: settings.emergency_tap_count.max(1),
            emergency_tap_window: Duration::seconds(
                settings
                    .emergency_tap_window_seconds
                    .clamp(1, MAX_EMERGENCY_TAP_WINDOW_SECONDS),
            ),
            hours: 0,
            minutes: 0,
            seconds: 0,
            phase: TimerPhase::Idle,
            duration_seconds: 0,
            remaining_seconds: 0,
            started_at: None,
            session_id: 0,
            taps: VecDeque::new(),
            blocking_active: false,
            presets: settings.presets,
            editing_preset: None,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Apps blocked when the user has not selected any.
    pub fn with_fallback_app_ids(mut self, app_ids: Vec<String>) -> Self {
        self.fallback_app_ids = app_ids;
        self
    }

    pub fn state(&self) -> SessionTimerState {
        SessionTimerState {
            phase: self.phase,
            running: self.is_running(),
            duration_seconds: self.duration_seconds,
            remaining_seconds: self.remaining_seconds,
            hours: self.hours,
            minutes: self.minutes,
            seconds: self.seconds,
            blocking_active: self.blocking_active,
            editing_preset: self.editing_preset,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn configured_seconds(&self) -> u32 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }

    pub fn configure(&mut self, hours: u32, minutes: u32, seconds: u32) -> Result<(), InfraError> {
        self.ensure_idle("configure")?;
        let (hours, minutes, seconds) = clamp_hms(hours, minutes, seconds);
        self.hours = hours;
        self.minutes = minutes;
        self.seconds = seconds;
        self.remaining_seconds = self.configured_seconds();
        Ok(())
    }

    /// Starts the countdown. A blocking driver failure is reported to the user
    /// and the countdown proceeds without blocking.
    pub fn start(&mut self) -> Result<SessionTimerState, InfraError> {
        self.ensure_idle("start")?;
        let duration_seconds = self.configured_seconds();
        if duration_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "timer duration must be > 0".to_string(),
            ));
        }

        self.phase = TimerPhase::Running;
        self.duration_seconds = duration_seconds;
        self.remaining_seconds = duration_seconds;
        self.started_at = Some(self.now());
        self.session_id += 1;
        self.taps.clear();
        self.editing_preset = None;
        info!(duration_seconds, session_id = self.session_id, "focus session started");

        if self.app_blocking_enabled {
            self.start_blocking(duration_seconds);
        }
        Ok(self.state())
    }

    /// One-second countdown step. Returns the stop reason when this tick ended
    /// the session.
    pub fn tick(&mut self) -> Option<StopReason> {
        if !self.is_running() {
            return None;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.finish(StopReason::Completed);
            return Some(StopReason::Completed);
        }
        None
    }

    /// Re-derives the remaining time from the start instant, e.g. after the
    /// host was backgrounded and ticks were not delivered.
    pub fn catch_up(&mut self) -> Option<StopReason> {
        if !self.is_running() {
            return None;
        }
        let Some(started_at) = self.started_at else {
            return None;
        };

        let elapsed = (self.now() - started_at).num_seconds().max(0);
        let remaining = i64::from(self.duration_seconds) - elapsed;
        self.remaining_seconds = remaining.clamp(0, i64::from(self.duration_seconds)) as u32;
        debug!(
            elapsed,
            remaining_seconds = self.remaining_seconds,
            "focus session caught up"
        );
        if self.remaining_seconds == 0 {
            self.finish(StopReason::Completed);
            return Some(StopReason::Completed);
        }
        None
    }

    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.finish(StopReason::Manual);
        true
    }

    /// Records a tap on the running timer. Enough taps inside the rolling
    /// window end the session immediately.
    pub fn register_tap(&mut self) -> TapOutcome {
        if !self.is_running() {
            return TapOutcome::Ignored;
        }

        let now = self.now();
        while let Some(oldest) = self.taps.front() {
            if now - *oldest > self.emergency_tap_window {
                self.taps.pop_front();
            } else {
                break;
            }
        }
        self.taps.push_back(now);

        let taps = self.taps.len();
        if taps >= self.emergency_tap_count {
            warn!(taps, remaining_seconds = self.remaining_seconds, "emergency stop");
            self.finish(StopReason::Emergency);
            return TapOutcome::EmergencyStop;
        }
        TapOutcome::Counted(taps)
    }

    pub fn presets(&self) -> &[TimerPreset] {
        &self.presets
    }

    pub fn select_preset(&mut self, index: usize) -> Result<TimerPreset, InfraError> {
        self.ensure_idle("select preset")?;
        let preset = self.preset(index)?.clone();
        let (hours, minutes, seconds) = preset.hms();
        self.configure(hours, minutes, seconds)?;
        Ok(preset)
    }

    /// Enters edit mode for a preset; returns its current `(h, m, s)`.
    pub fn begin_preset_edit(&mut self, index: usize) -> Result<(u32, u32, u32), InfraError> {
        self.ensure_idle("edit preset")?;
        let hms = self.preset(index)?.hms();
        self.editing_preset = Some(index);
        Ok(hms)
    }

    pub fn save_preset_edit(
        &mut self,
        hours: u32,
        minutes: u32,
        seconds: u32,
    ) -> Result<TimerPreset, InfraError> {
        let index = self
            .editing_preset
            .ok_or_else(|| InfraError::InvalidConfig("no preset is being edited".to_string()))?;
        let (hours, minutes, seconds) = clamp_hms(hours, minutes, seconds);
        let total = hours * 3600 + minutes * 60 + seconds;
        if total == 0 {
            return Err(InfraError::InvalidConfig(
                "preset duration must be > 0".to_string(),
            ));
        }

        let preset = self
            .presets
            .get_mut(index)
            .ok_or_else(|| InfraError::InvalidConfig(format!("preset not found: {index}")))?;
        preset.seconds = total;
        let saved = preset.clone();
        self.editing_preset = None;
        info!(index, seconds = total, "preset updated");
        Ok(saved)
    }

    pub fn cancel_preset_edit(&mut self) {
        self.editing_preset = None;
    }

    fn preset(&self, index: usize) -> Result<&TimerPreset, InfraError> {
        self.presets
            .get(index)
            .ok_or_else(|| InfraError::InvalidConfig(format!("preset not found: {index}")))
    }

    fn start_blocking(&mut self, duration_seconds: u32) {
        match self.driver.has_permission() {
            Ok(true) => {}
            Ok(false) => {
                debug!("blocking permission not granted, session runs without blocking");
                return;
            }
            Err(error) => {
                error!(%error, "failed to query blocking permission");
                return;
            }
        }

        let mut app_ids = self.selected_apps.selected_app_ids().unwrap_or_else(|error| {
            error!(%error, "failed to read selected apps");
            Vec::new()
        });
        if app_ids.is_empty() {
            app_ids = self.fallback_app_ids.clone();
        }
        if app_ids.is_empty() {
            warn!("no apps to block for focus session");
            self.notifier.notify(BLOCKING_FAILED_MESSAGE, false);
            return;
        }

        match self.driver.start(u64::from(duration_seconds), &app_ids) {
            Ok(true) => {
                self.blocking_active = true;
                info!(app_count = app_ids.len(), "focus session blocking started");
            }
            Ok(false) => {
                warn!("blocking driver declined focus session");
                self.notifier.notify(BLOCKING_FAILED_MESSAGE, false);
            }
            Err(error) => {
                warn!(%error, "failed to start focus session blocking");
                self.notifier.notify(BLOCKING_FAILED_MESSAGE, false);
            }
        }
    }

    fn finish(&mut self, reason: StopReason) {
        self.phase = TimerPhase::Idle;
        self.started_at = None;
        self.taps.clear();
        if reason != StopReason::Completed {
            self.remaining_seconds = self.configured_seconds();
        }

        if self.blocking_active {
            if let Err(error) = self.driver.stop() {
                warn!(%error, "failed to stop focus session blocking");
            }
            self.blocking_active = false;
        }
        info!(?reason, session_id = self.session_id, "focus session ended");
    }

    fn ensure_idle(&self, action: &str) -> Result<(), InfraError> {
        if self.is_running() {
            return Err(InfraError::InvalidConfig(format!(
                "timer must be idle to {action}"
            )));
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }
}

fn clamp_hms(hours: u32, minutes: u32, seconds: u32) -> (u32, u32, u32) {
    (
        hours.min(MAX_TIMER_HOURS),
        minutes.min(MAX_TIMER_MINUTES),
        seconds.min(MAX_TIMER_SECONDS),
    )
}

/// Ticks the shared timer once per second on `runtime` until the session it
/// was spawned for ends.
pub fn spawn_countdown(runtime: &Handle, timer: Arc<Mutex<SessionTimer>>) -> JoinHandle<()> {
    let session_id = timer
        .lock()
        .map(|timer| timer.session_id())
        .unwrap_or_default();

    runtime.spawn(async move {
        let period = std::time::Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            ticker.tick().await;
            let Ok(mut guard) = timer.lock() else {
                error!("session timer lock poisoned, countdown aborted");
                break;
            };
            if guard.session_id() != session_id || !guard.is_running() {
                break;
            }
            if guard.tick().is_some() {
                break;
            }
        }
    })
}

/// Splits a remaining-seconds value for display.
pub fn remaining_hms(state: &SessionTimerState) -> (u32, u32, u32) {
    split_hms(state.remaining_seconds)
}
