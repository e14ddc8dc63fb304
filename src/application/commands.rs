use crate::application::blocking_stats::{BlockingStatsService, BlockingStatsSummary};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::coordinator::EventBlockingCoordinator;
use crate::application::session_timer::{
    remaining_hms, spawn_countdown, SessionTimer, SessionTimerState, TapOutcome,
};
use crate::domain::models::{AppLifecycle, BlockingStatus, Event, EventTiming, TimerPreset};
use crate::infrastructure::app_selection::{JsonSelectedAppsStore, SelectedAppsStore};
use crate::infrastructure::blocking_driver::{BlockingDriver, InMemoryBlockingDriver};
use crate::infrastructure::blocking_stats_repository::SqliteBlockingStatsRepository;
use crate::infrastructure::config::save_timer_presets;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::notifier::{Notifier, TracingNotifier};
use crate::infrastructure::settings_store::SqliteSettingsStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_TOP_APPS_LIMIT: usize = 5;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    coordinator: Arc<EventBlockingCoordinator>,
    selected_apps: Arc<dyn SelectedAppsStore>,
    timer: Arc<Mutex<SessionTimer>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    stats: BlockingStatsService,
    runtime: Handle,
    /// Set when the host had no runtime of its own.
    owned_runtime: Option<Runtime>,
}

impl AppState {
    /// Bootstraps the workspace and wires the platform collaborators into the
    /// coordinator, session timer and stats service.
    pub fn new(
        workspace_root: PathBuf,
        driver: Arc<dyn BlockingDriver>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = bootstrap.config;
        init_logging(&bootstrap.logs_dir, &config.app.log_level)?;
        let time_zone = config.app.time_zone()?;
        let (runtime, owned_runtime) = resolve_runtime()?;

        let settings = Arc::new(SqliteSettingsStore::new(&bootstrap.database_path));
        let selected_apps: Arc<dyn SelectedAppsStore> =
            Arc::new(JsonSelectedAppsStore::new(&bootstrap.config_dir));

        let coordinator = EventBlockingCoordinator::new(
            Arc::clone(&driver),
            settings,
            Arc::clone(&selected_apps),
            Arc::clone(&notifier),
        )
        .with_timing(EventTiming::new(
            time_zone,
            config.app.default_event_duration_minutes,
        ))
        .with_poll_interval(Duration::from_secs(config.app.poll_interval_seconds))
        .with_runtime(runtime.clone());

        let timer = SessionTimer::new(
            config.timer,
            driver,
            Arc::clone(&selected_apps),
            notifier,
        )
        .with_fallback_app_ids(config.apps.default_blocked_app_ids);

        let stats = BlockingStatsService::new(
            Arc::new(SqliteBlockingStatsRepository::new(&bootstrap.database_path)),
            time_zone,
        );
        stats.cleanup_old_data();

        info!(
            workspace_root = %bootstrap.workspace_root.display(),
            app_name = %config.app.app_name,
            "app state initialized"
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            coordinator: Arc::new(coordinator),
            selected_apps,
            timer: Arc::new(Mutex::new(timer)),
            countdown: Mutex::new(None),
            stats,
            runtime,
            owned_runtime,
        })
    }

    /// State for hosts without a native blocking backend: the driver only
    /// records sessions and alerts go to the log.
    pub fn headless(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::new(
            workspace_root,
            Arc::new(InMemoryBlockingDriver::default()),
            Arc::new(TracingNotifier),
        )
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn coordinator(&self) -> &Arc<EventBlockingCoordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> &BlockingStatsService {
        &self.stats
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    fn replace_countdown(&self, handle: Option<JoinHandle<()>>) {
        let mut countdown = self
            .countdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = countdown.take() {
            previous.abort();
        }
        *countdown = handle;
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.replace_countdown(None);
        self.coordinator.dispose();
        if let Some(runtime) = self.owned_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Uses the caller's runtime when there is one; otherwise builds a small
/// worker runtime for the poll loop and countdown.
fn resolve_runtime() -> Result<(Handle, Option<Runtime>), InfraError> {
    if let Ok(handle) = Handle::try_current() {
        return Ok((handle, None));
    }
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("zenblock-worker")
        .enable_time()
        .build()?;
    info!("no host runtime, started owned worker runtime");
    Ok((runtime.handle().clone(), Some(runtime)))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverrideResponse {
    pub overridden: bool,
    pub status: BlockingStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateResponse {
    #[serde(flatten)]
    pub timer: SessionTimerState,
    pub remaining_display: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerTapResponse {
    pub emergency_stop: bool,
    pub tap_count: usize,
    pub timer: TimerStateResponse,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectedAppsResponse {
    pub selected_app_ids: Vec<String>,
    pub has_configured_apps: bool,
}

pub fn set_auto_blocking_impl(
    state: &AppState,
    enabled: bool,
) -> Result<BlockingStatus, InfraError> {
    state.coordinator.set_auto_blocking_enabled(enabled);
    info!(enabled, "auto-blocking toggled");
    Ok(state.coordinator.get_status())
}

pub fn get_blocking_status_impl(state: &AppState) -> Result<BlockingStatus, InfraError> {
    Ok(state.coordinator.get_status())
}

/// Replaces the event list. Monitoring starts on the first list delivered
/// while auto-blocking is enabled.
pub fn update_events_impl(
    state: &AppState,
    events: Vec<Event>,
) -> Result<BlockingStatus, InfraError> {
    for event in &events {
        if let Err(message) = event.validate() {
            warn!(event_id = %event.id, %message, "event will never be active");
        }
    }

    let status = state.coordinator.get_status();
    if status.auto_blocking_enabled && !status.is_monitoring {
        state.coordinator.start_monitoring(events);
    } else {
        state.coordinator.update_events(events);
    }
    Ok(state.coordinator.get_status())
}

pub fn manual_override_impl(state: &AppState) -> Result<ManualOverrideResponse, InfraError> {
    let overridden = state.coordinator.manual_override();
    Ok(ManualOverrideResponse {
        overridden,
        status: state.coordinator.get_status(),
    })
}

pub fn app_state_changed_impl(
    state: &AppState,
    lifecycle: AppLifecycle,
) -> Result<BlockingStatus, InfraError> {
    state.coordinator.handle_app_state_change(lifecycle);
    if lifecycle == AppLifecycle::Foreground {
        lock_timer(state)?.catch_up();
    }
    Ok(state.coordinator.get_status())
}

pub fn configure_timer_impl(
    state: &AppState,
    hours: u32,
    minutes: u32,
    seconds: u32,
) -> Result<TimerStateResponse, InfraError> {
    let mut timer = lock_timer(state)?;
    timer.configure(hours, minutes, seconds)?;
    Ok(to_timer_response(timer.state()))
}

pub fn start_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let started = lock_timer(state)?.start()?;

    state.replace_countdown(Some(spawn_countdown(
        &state.runtime,
        Arc::clone(&state.timer),
    )));
    Ok(to_timer_response(started))
}

pub fn stop_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let stopped = {
        let mut timer = lock_timer(state)?;
        timer.stop();
        timer.state()
    };
    state.replace_countdown(None);
    Ok(to_timer_response(stopped))
}

pub fn register_timer_tap_impl(state: &AppState) -> Result<TimerTapResponse, InfraError> {
    let (outcome, timer_state) = {
        let mut timer = lock_timer(state)?;
        let outcome = timer.register_tap();
        (outcome, timer.state())
    };

    let (emergency_stop, tap_count) = match outcome {
        TapOutcome::Ignored => (false, 0),
        TapOutcome::Counted(taps) => (false, taps),
        TapOutcome::EmergencyStop => {
            state.replace_countdown(None);
            (true, 0)
        }
    };
    Ok(TimerTapResponse {
        emergency_stop,
        tap_count,
        timer: to_timer_response(timer_state),
    })
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    Ok(to_timer_response(lock_timer(state)?.state()))
}

pub fn list_timer_presets_impl(state: &AppState) -> Result<Vec<TimerPreset>, InfraError> {
    Ok(lock_timer(state)?.presets().to_vec())
}

pub fn select_timer_preset_impl(
    state: &AppState,
    index: usize,
) -> Result<TimerStateResponse, InfraError> {
    let mut timer = lock_timer(state)?;
    timer.select_preset(index)?;
    Ok(to_timer_response(timer.state()))
}

/// Rewrites one preset and persists the preset list to `timer.json`.
pub fn update_timer_preset_impl(
    state: &AppState,
    index: usize,
    hours: u32,
    minutes: u32,
    seconds: u32,
) -> Result<Vec<TimerPreset>, InfraError> {
    let mut timer = lock_timer(state)?;
    timer.begin_preset_edit(index)?;
    if let Err(error) = timer.save_preset_edit(hours, minutes, seconds) {
        timer.cancel_preset_edit();
        return Err(error);
    }

    let presets = timer.presets().to_vec();
    save_timer_presets(&state.config_dir, &presets)?;
    Ok(presets)
}

pub fn save_selected_apps_impl(
    state: &AppState,
    app_ids: Vec<String>,
) -> Result<SelectedAppsResponse, InfraError> {
    state.selected_apps.save_selected_app_ids(&app_ids)?;
    let selected_app_ids = state.selected_apps.selected_app_ids()?;
    info!(count = selected_app_ids.len(), "selected apps saved");
    Ok(SelectedAppsResponse {
        has_configured_apps: state.coordinator.has_configured_apps(),
        selected_app_ids,
    })
}

pub fn record_block_attempt_impl(
    state: &AppState,
    package_name: Option<String>,
    app_name: Option<String>,
) -> Result<u64, InfraError> {
    Ok(state
        .stats
        .record_block_attempt(package_name.as_deref(), app_name.as_deref()))
}

pub fn get_blocking_stats_impl(
    state: &AppState,
    limit: Option<usize>,
) -> Result<BlockingStatsSummary, InfraError> {
    Ok(state.stats.summary(limit.unwrap_or(DEFAULT_TOP_APPS_LIMIT)))
}

fn lock_timer(state: &AppState) -> Result<MutexGuard<'_, SessionTimer>, InfraError> {
    state
        .timer
        .lock()
        .map_err(|error| InfraError::poisoned("session timer", error))
}

fn to_timer_response(timer: SessionTimerState) -> TimerStateResponse {
    let (hours, minutes, seconds) = remaining_hms(&timer);
    let remaining_display = if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    };
    TimerStateResponse {
        timer,
        remaining_display,
    }
}
