//! ZenBlock focus backend.
//!
//! Calendar events marked strict keep the selected apps blocked for their
//! duration; a standalone countdown does the same for ad-hoc focus sessions.
//! Hosts wire a platform [`BlockingDriver`] and [`Notifier`] into
//! [`AppState`] and call the `*_impl` command functions.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::blocking_stats::{BlockedAppCount, BlockingStatsService, BlockingStatsSummary};
pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::commands::{
    app_state_changed_impl, configure_timer_impl, get_blocking_stats_impl,
    get_blocking_status_impl, get_timer_state_impl, list_timer_presets_impl,
    manual_override_impl, record_block_attempt_impl, register_timer_tap_impl,
    save_selected_apps_impl, select_timer_preset_impl, set_auto_blocking_impl,
    start_timer_impl, stop_timer_impl, update_events_impl, update_timer_preset_impl, AppState,
    ManualOverrideResponse, SelectedAppsResponse, TimerStateResponse, TimerTapResponse,
};
pub use application::coordinator::{EventBlockingCoordinator, NowProvider};
pub use application::session_timer::{
    spawn_countdown, SessionTimer, SessionTimerState, StopReason, TapOutcome, TimerPhase,
};
pub use application::status::{StatusPublisher, Subscription};
pub use domain::models::{
    ActiveWindow, AppLifecycle, BlockingStatus, Event, EventPriority, EventTiming, TimerPreset,
};
pub use infrastructure::blocking_driver::{BlockingDriver, InMemoryBlockingDriver};
pub use infrastructure::error::InfraError;
pub use infrastructure::notifier::{Notifier, TracingNotifier};
