//! Event-driven auto-blocking.
//!
//! The coordinator reconciles the current event list against wall-clock time
//! and is the single authority deciding whether the blocking driver should be
//! active for a calendar event. Every public operation runs its
//! read-decide-mutate step under a single lock acquisition.

use crate::application::status::{StatusPublisher, Subscription};
use crate::domain::models::{AppLifecycle, BlockingStatus, Event, EventTiming};
use crate::infrastructure::app_selection::SelectedAppsStore;
use crate::infrastructure::blocking_driver::BlockingDriver;
use crate::infrastructure::config::{DEFAULT_POLL_INTERVAL_SECONDS, MAX_POLL_INTERVAL_SECONDS};
use crate::infrastructure::notifier::Notifier;
use crate::infrastructure::settings_store::{SettingsStore, AUTO_BLOCKING_ENABLED_KEY};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct CoordinatorState {
    auto_blocking_enabled: bool,
    is_monitoring: bool,
    events: Vec<Event>,
    current_blocking_event: Option<Event>,
    /// Event id -> end of the window that was overridden.
    overrides: HashMap<String, DateTime<Utc>>,
    poll_task: Option<JoinHandle<()>>,
    /// Bumped on every start/stop; a poll tick only acts for its own run.
    monitor_generation: u64,
    lifecycle: AppLifecycle,
}

impl CoordinatorState {
    fn status(&self) -> BlockingStatus {
        BlockingStatus::new(
            self.auto_blocking_enabled,
            self.is_monitoring,
            self.current_blocking_event.clone(),
        )
    }

    fn cancel_poll_task(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

/// Side effects collected under the state lock and emitted after it is
/// released, so notifiers and subscribers may call back into the coordinator.
#[derive(Default)]
struct Effects {
    notifications: Vec<(String, bool)>,
    status: Option<BlockingStatus>,
}

impl Effects {
    fn notify(&mut self, message: String, is_stopping: bool) {
        self.notifications.push((message, is_stopping));
    }
}

pub struct EventBlockingCoordinator {
    driver: Arc<dyn BlockingDriver>,
    settings: Arc<dyn SettingsStore>,
    selected_apps: Arc<dyn SelectedAppsStore>,
    notifier: Arc<dyn Notifier>,
    publisher: StatusPublisher,
    timing: EventTiming,
    poll_interval: Duration,
    runtime: Option<Handle>,
    now_provider: NowProvider,
    state: Mutex<CoordinatorState>,
}

impl EventBlockingCoordinator {
    /// Builds a coordinator and restores the persisted auto-blocking flag.
    pub fn new(
        driver: Arc<dyn BlockingDriver>,
        settings: Arc<dyn SettingsStore>,
        selected_apps: Arc<dyn SelectedAppsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let auto_blocking_enabled = match settings.get_bool(AUTO_BLOCKING_ENABLED_KEY) {
            Ok(value) => value.unwrap_or(false),
            Err(error) => {
                error!(%error, "failed to load auto-blocking preference");
                false
            }
        };
        info!(auto_blocking_enabled, "event blocking coordinator initialized");

        Self {
            driver,
            settings,
            selected_apps,
            notifier,
            publisher: StatusPublisher::new(),
            timing: EventTiming::default(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            runtime: None,
            now_provider: Arc::new(Utc::now),
            state: Mutex::new(CoordinatorState {
                auto_blocking_enabled,
                is_monitoring: false,
                events: Vec::new(),
                current_blocking_event: None,
                overrides: HashMap::new(),
                poll_task: None,
                monitor_generation: 0,
                lifecycle: AppLifecycle::Foreground,
            }),
        }
    }

    pub fn with_timing(mut self, timing: EventTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.clamp(
            Duration::from_millis(10),
            Duration::from_secs(MAX_POLL_INTERVAL_SECONDS),
        );
        self
    }

    /// Runtime the poll loop is spawned on. Without one, the ambient runtime
    /// of the caller of `start_monitoring` is used.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn get_status(&self) -> BlockingStatus {
        self.lock_state().status()
    }

    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BlockingStatus) + Send + Sync + 'static,
    {
        self.publisher.subscribe(callback)
    }

    pub fn set_auto_blocking_enabled(self: &Arc<Self>, enabled: bool) {
        if let Err(error) = self.settings.set_bool(AUTO_BLOCKING_ENABLED_KEY, enabled) {
            error!(%error, enabled, "failed to persist auto-blocking preference");
        }

        let events = {
            let mut state = self.lock_state();
            state.auto_blocking_enabled = enabled;
            state.events.clone()
        };

        let published = if enabled && !events.is_empty() {
            self.begin_monitoring(events)
        } else if !enabled {
            self.stop_monitoring();
            true
        } else {
            false
        };

        info!(enabled, "auto-blocking preference changed");
        if !published {
            let status = self.get_status();
            self.publisher.publish(&status);
        }
    }

    /// Replaces the working event list. While monitoring, re-evaluates at once
    /// rather than waiting for the next poll tick.
    pub fn update_events(&self, events: Vec<Event>) {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            state.events = events;
            self.cleanup_expired_overrides(&mut state, now);
            if state.is_monitoring {
                self.evaluate_locked(&mut state, now, &mut effects);
            }
            state.lifecycle == AppLifecycle::Foreground
        };
        self.flush(effects, foreground);
    }

    /// Starts (or restarts) the poll loop after one immediate evaluation.
    /// No-op while auto-blocking is disabled or when no runtime is available
    /// to run the loop.
    pub fn start_monitoring(self: &Arc<Self>, events: Vec<Event>) {
        self.begin_monitoring(events);
    }

    /// Returns whether monitoring started (and a status snapshot went out).
    fn begin_monitoring(self: &Arc<Self>, events: Vec<Event>) -> bool {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            if !state.auto_blocking_enabled {
                info!("auto-blocking disabled, not starting monitoring");
                return false;
            }
            let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok())
            else {
                error!("no async runtime available, monitoring not started");
                return false;
            };

            state.is_monitoring = true;
            state.events = events;
            state.cancel_poll_task();
            state.monitor_generation += 1;

            self.evaluate_locked(&mut state, now, &mut effects);
            state.poll_task = Some(spawn_poll_task(
                &runtime,
                Arc::downgrade(self),
                self.poll_interval,
                state.monitor_generation,
            ));

            effects.status = Some(state.status());
            state.lifecycle == AppLifecycle::Foreground
        };

        info!(
            poll_interval_seconds = self.poll_interval.as_secs(),
            "event monitoring started"
        );
        self.flush(effects, foreground);
        true
    }

    /// Halts polling and stops any active block. Safe to call repeatedly.
    pub fn stop_monitoring(&self) {
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            state.is_monitoring = false;
            state.cancel_poll_task();
            state.monitor_generation += 1;
            if state.current_blocking_event.is_some() {
                self.stop_block_locked(&mut state, &mut effects);
            }
            effects.status = Some(state.status());
            state.lifecycle == AppLifecycle::Foreground
        };

        info!("event monitoring stopped");
        self.flush(effects, foreground);
    }

    /// Stops the active block and keeps it from restarting until its event
    /// window has passed. Returns `false` when nothing was blocking.
    pub fn manual_override(&self) -> bool {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            let Some((event_id, window_end)) = state.current_blocking_event.as_ref().map(|event| {
                let window_end = self
                    .timing
                    .window(event)
                    .map_or(now, |window| window.end);
                (event.id.clone(), window_end)
            }) else {
                debug!("manual override requested with no active block");
                return false;
            };

            info!(event_id = %event_id, "manual override of active block");
            state.overrides.insert(event_id, window_end);
            self.stop_block_locked(&mut state, &mut effects);
            state.lifecycle == AppLifecycle::Foreground
        };
        self.flush(effects, foreground);
        true
    }

    /// Runs one reconciliation pass against the current time.
    pub fn evaluate(&self) {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            self.evaluate_locked(&mut state, now, &mut effects);
            state.lifecycle == AppLifecycle::Foreground
        };
        self.flush(effects, foreground);
    }

    /// Poll-loop entry point. A tick that woke before a stop or restart took
    /// the lock finds a different generation and does nothing.
    fn poll(&self, generation: u64) {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            if !state.is_monitoring || state.monitor_generation != generation {
                debug!(generation, "stale poll tick ignored");
                return;
            }
            self.evaluate_locked(&mut state, now, &mut effects);
            state.lifecycle == AppLifecycle::Foreground
        };
        self.flush(effects, foreground);
    }

    /// Wall-clock time may have jumped while backgrounded, so a foreground
    /// transition re-evaluates immediately.
    pub fn handle_app_state_change(&self, lifecycle: AppLifecycle) {
        let now = self.now();
        let mut effects = Effects::default();
        let foreground = {
            let mut state = self.lock_state();
            state.lifecycle = lifecycle;
            match lifecycle {
                AppLifecycle::Foreground if state.is_monitoring => {
                    info!("app foregrounded, re-evaluating events");
                    self.evaluate_locked(&mut state, now, &mut effects);
                }
                AppLifecycle::Background if state.is_monitoring => {
                    info!("app backgrounded, monitoring continues");
                }
                _ => {}
            }
            lifecycle == AppLifecycle::Foreground
        };
        self.flush(effects, foreground);
    }

    pub fn has_configured_apps(&self) -> bool {
        match self.selected_apps.selected_app_ids() {
            Ok(app_ids) => !app_ids.is_empty(),
            Err(error) => {
                error!(%error, "failed to read selected apps");
                false
            }
        }
    }

    pub fn has_blocking_permission(&self) -> bool {
        self.driver.has_permission().unwrap_or_else(|error| {
            error!(%error, "failed to query blocking permission");
            false
        })
    }

    pub fn open_permission_settings(&self) {
        if let Err(error) = self.driver.open_permission_settings() {
            error!(%error, "failed to open permission settings");
        }
    }

    /// Stops monitoring (and any active block) and drops every subscriber.
    pub fn dispose(&self) {
        self.stop_monitoring();
        self.publisher.clear();
        info!("event blocking coordinator disposed");
    }

    fn evaluate_locked(
        &self,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) {
        if !state.auto_blocking_enabled {
            return;
        }

        let active_events: Vec<Event> = state
            .events
            .iter()
            .filter(|event| event.is_strict())
            .filter(|event| !state.overrides.contains_key(&event.id))
            .filter(|event| self.timing.is_active_at(event, now))
            .cloned()
            .collect();

        let blocking = state.current_blocking_event.is_some();
        match active_events.into_iter().next() {
            Some(event) if !blocking => {
                info!(event_id = %event.id, "active strict event found, starting block");
                self.start_block_locked(state, event, now, effects);
            }
            Some(_) => {
                debug!(
                    event_id = ?state.current_blocking_event.as_ref().map(|event| &event.id),
                    "block already active, keeping current event"
                );
            }
            None if blocking => {
                info!("no active strict events, stopping block");
                self.stop_block_locked(state, effects);
            }
            None => {}
        }
    }

    fn start_block_locked(
        &self,
        state: &mut CoordinatorState,
        event: Event,
        now: DateTime<Utc>,
        effects: &mut Effects,
    ) -> bool {
        match self.driver.has_permission() {
            Ok(true) => {}
            Ok(false) => {
                warn!(event_id = %event.id, "blocking permission not granted, cannot start block");
                return false;
            }
            Err(error) => {
                error!(%error, event_id = %event.id, "failed to query blocking permission");
                return false;
            }
        }

        let app_ids = match self.selected_apps.selected_app_ids() {
            Ok(app_ids) => app_ids,
            Err(error) => {
                error!(%error, event_id = %event.id, "failed to read selected apps");
                return false;
            }
        };
        if app_ids.is_empty() {
            warn!(event_id = %event.id, "no apps selected for blocking");
            effects.notify(
                format!(
                    "Cannot start blocking for \"{}\" - No apps selected for blocking. Please configure your app preferences in Settings.",
                    event.display_title()
                ),
                true,
            );
            return false;
        }

        let Some(window) = self.timing.window(&event) else {
            return false;
        };
        let remaining_seconds = window.remaining_seconds(now);
        if remaining_seconds <= 0 {
            debug!(event_id = %event.id, "event window already over, not starting block");
            return false;
        }

        match self.driver.start(remaining_seconds as u64, &app_ids) {
            Ok(true) => {
                info!(
                    event_id = %event.id,
                    remaining_seconds,
                    app_count = app_ids.len(),
                    "auto-blocking started"
                );
                effects.notify(
                    format!("Auto-blocking started for \"{}\"", event.display_title()),
                    false,
                );
                state.current_blocking_event = Some(event);
                effects.status = Some(state.status());
                true
            }
            Ok(false) => {
                warn!(event_id = %event.id, "blocking driver declined to start");
                false
            }
            Err(error) => {
                error!(%error, event_id = %event.id, "failed to start blocking");
                false
            }
        }
    }

    /// Clears the active event even when the driver fails to stop.
    fn stop_block_locked(&self, state: &mut CoordinatorState, effects: &mut Effects) {
        if let Err(error) = self.driver.stop() {
            error!(%error, "failed to stop blocking driver");
        }

        let title = state
            .current_blocking_event
            .take()
            .map(|event| event.display_title().to_string())
            .unwrap_or_else(|| "Unknown event".to_string());
        info!(event_title = %title, "auto-blocking stopped");

        effects.notify(format!("Auto-blocking stopped for \"{title}\""), true);
        effects.status = Some(state.status());
    }

    /// Forgets overrides whose window has passed or whose event is no longer
    /// active in the current list.
    fn cleanup_expired_overrides(&self, state: &mut CoordinatorState, now: DateTime<Utc>) {
        if state.overrides.is_empty() {
            return;
        }

        let active_ids: HashSet<&str> = state
            .events
            .iter()
            .filter(|event| self.timing.is_active_at(event, now))
            .map(|event| event.id.as_str())
            .collect();

        let before = state.overrides.len();
        let retained: HashMap<String, DateTime<Utc>> = state
            .overrides
            .iter()
            .filter(|(id, window_end)| now <= **window_end && active_ids.contains(id.as_str()))
            .map(|(id, window_end)| (id.clone(), *window_end))
            .collect();
        state.overrides = retained;

        let evicted = before - state.overrides.len();
        if evicted > 0 {
            debug!(evicted, "expired manual overrides evicted");
        }
    }

    fn flush(&self, effects: Effects, foreground: bool) {
        if foreground {
            for (message, is_stopping) in &effects.notifications {
                self.notifier.notify(message, *is_stopping);
            }
        } else if !effects.notifications.is_empty() {
            debug!(
                count = effects.notifications.len(),
                "app in background, notifications suppressed"
            );
        }

        if let Some(status) = effects.status {
            self.publisher.publish(&status);
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_poll_task(
    runtime: &Handle,
    coordinator: Weak<EventBlockingCoordinator>,
    period: Duration,
    generation: u64,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            coordinator.poll(generation);
        }
    })
}

impl Drop for EventBlockingCoordinator {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.cancel_poll_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventPriority;
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::settings_store::InMemorySettingsStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeDriver {
        permission: AtomicBool,
        start_fails: AtomicBool,
        stop_fails: AtomicBool,
        starts: Mutex<Vec<(u64, Vec<String>)>>,
        stop_calls: AtomicUsize,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                permission: AtomicBool::new(true),
                start_fails: AtomicBool::new(false),
                stop_fails: AtomicBool::new(false),
                starts: Mutex::new(Vec::new()),
                stop_calls: AtomicUsize::new(0),
            }
        }

        fn start_count(&self) -> usize {
            self.starts.lock().unwrap().len()
        }
    }

    impl BlockingDriver for FakeDriver {
        fn has_permission(&self) -> Result<bool, InfraError> {
            Ok(self.permission.load(Ordering::SeqCst))
        }

        fn open_permission_settings(&self) -> Result<(), InfraError> {
            Ok(())
        }

        fn start(&self, duration_seconds: u64, app_ids: &[String]) -> Result<bool, InfraError> {
            if self.start_fails.load(Ordering::SeqCst) {
                return Err(InfraError::Driver("start exploded".to_string()));
            }
            self.starts
                .lock()
                .unwrap()
                .push((duration_seconds, app_ids.to_vec()));
            Ok(true)
        }

        fn stop(&self) -> Result<(), InfraError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.stop_fails.load(Ordering::SeqCst) {
                return Err(InfraError::Driver("stop exploded".to_string()));
            }
            Ok(())
        }

        fn is_active(&self) -> Result<bool, InfraError> {
            Ok(self.start_count() > self.stop_calls.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug, Default)]
    struct FakeApps {
        app_ids: Mutex<Vec<String>>,
        reads: AtomicUsize,
    }

    impl SelectedAppsStore for FakeApps {
        fn selected_app_ids(&self) -> Result<Vec<String>, InfraError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.app_ids.lock().unwrap().clone())
        }

        fn save_selected_app_ids(&self, app_ids: &[String]) -> Result<(), InfraError> {
            *self.app_ids.lock().unwrap() = app_ids.to_vec();
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(String, bool)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str, is_stopping: bool) {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_string(), is_stopping));
        }
    }

    struct FailingSettings;

    impl SettingsStore for FailingSettings {
        fn get_bool(&self, _key: &str) -> Result<Option<bool>, InfraError> {
            Err(InfraError::InvalidConfig("disk gone".to_string()))
        }

        fn set_bool(&self, _key: &str, _value: bool) -> Result<(), InfraError> {
            Err(InfraError::InvalidConfig("disk gone".to_string()))
        }
    }

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn at(raw: &str) -> Self {
            Self(Arc::new(Mutex::new(utc(raw))))
        }

        fn set(&self, raw: &str) {
            *self.0.lock().unwrap() = utc(raw);
        }

        fn provider(&self) -> NowProvider {
            let inner = Arc::clone(&self.0);
            Arc::new(move || *inner.lock().unwrap())
        }
    }

    struct Harness {
        coordinator: Arc<EventBlockingCoordinator>,
        driver: Arc<FakeDriver>,
        apps: Arc<FakeApps>,
        notifier: Arc<RecordingNotifier>,
        settings: Arc<InMemorySettingsStore>,
        clock: TestClock,
        _runtime: Option<tokio::runtime::Runtime>,
    }

    /// Sync tests get an idle current-thread runtime: the poll task is
    /// spawned but never driven. Async tests use their own runtime.
    fn idle_runtime() -> Option<tokio::runtime::Runtime> {
        if Handle::try_current().is_ok() {
            return None;
        }
        Some(
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("build test runtime"),
        )
    }

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn harness(enabled: bool, app_ids: &[&str]) -> Harness {
        let driver = Arc::new(FakeDriver::new());
        let apps = Arc::new(FakeApps::default());
        *apps.app_ids.lock().unwrap() = app_ids.iter().map(|id| id.to_string()).collect();
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = Arc::new(InMemorySettingsStore::default());
        settings
            .set_bool(AUTO_BLOCKING_ENABLED_KEY, enabled)
            .expect("seed setting");
        let clock = TestClock::at("2026-05-04T09:05:00Z");

        let runtime = idle_runtime();
        let mut coordinator = EventBlockingCoordinator::new(
            driver.clone(),
            settings.clone(),
            apps.clone(),
            notifier.clone(),
        )
        .with_now_provider(clock.provider());
        if let Some(runtime) = &runtime {
            coordinator = coordinator.with_runtime(runtime.handle().clone());
        }

        Harness {
            coordinator: Arc::new(coordinator),
            driver,
            apps,
            notifier,
            settings,
            clock,
            _runtime: runtime,
        }
    }

    fn strict_event(id: &str, time: &str, duration: u32) -> Event {
        Event {
            id: id.to_string(),
            title: format!("Focus {id}"),
            date: Some("2026-05-04".to_string()),
            time: Some(time.to_string()),
            duration: Some(duration),
            priority: EventPriority::Strict,
        }
    }

    fn current_id(coordinator: &EventBlockingCoordinator) -> Option<String> {
        coordinator
            .get_status()
            .current_blocking_event
            .map(|event| event.id)
    }

    #[test]
    fn active_strict_event_starts_block_for_remaining_window() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);

        let status = h.coordinator.get_status();
        assert!(status.auto_blocking_enabled);
        assert!(status.is_monitoring);
        assert!(status.is_blocking);
        assert_eq!(current_id(&h.coordinator).as_deref(), Some("e1"));

        let starts = h.driver.starts.lock().unwrap().clone();
        assert_eq!(starts, vec![(55 * 60, vec!["com.x".to_string()])]);
        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![("Auto-blocking started for \"Focus e1\"".to_string(), false)]
        );
    }

    #[test]
    fn block_stops_once_event_window_has_passed() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);

        h.clock.set("2026-05-04T10:00:00Z");
        h.coordinator.evaluate();
        assert!(h.coordinator.get_status().is_blocking, "end instant is inclusive");

        h.clock.set("2026-05-04T10:00:01Z");
        h.coordinator.evaluate();
        let status = h.coordinator.get_status();
        assert!(!status.is_blocking);
        assert!(status.current_blocking_event.is_none());
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 1);
        assert!(h
            .notifier
            .messages
            .lock()
            .unwrap()
            .contains(&("Auto-blocking stopped for \"Focus e1\"".to_string(), true)));
    }

    #[test]
    fn manual_override_suppresses_event_until_its_window_ends() {
        let h = harness(true, &["com.x"]);
        let events = vec![strict_event("e1", "09:00", 60)];
        h.coordinator.start_monitoring(events.clone());

        assert!(h.coordinator.manual_override());
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 1);

        h.clock.set("2026-05-04T09:30:00Z");
        h.coordinator.evaluate();
        h.coordinator.update_events(events);
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.driver.start_count(), 1);

        h.clock.set("2026-05-04T10:30:00Z");
        h.coordinator
            .update_events(vec![strict_event("e1", "10:20", 60)]);
        assert_eq!(current_id(&h.coordinator).as_deref(), Some("e1"));
        assert_eq!(h.driver.start_count(), 2);
    }

    #[test]
    fn manual_override_without_active_block_returns_false() {
        let h = harness(true, &["com.x"]);
        assert!(!h.coordinator.manual_override());
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn active_block_is_not_preempted_by_later_event() {
        let h = harness(true, &["com.x"]);
        let first = strict_event("e1", "09:00", 60);
        h.coordinator.start_monitoring(vec![first.clone()]);

        h.clock.set("2026-05-04T09:30:00Z");
        h.coordinator
            .update_events(vec![strict_event("e2", "09:25", 60), first]);

        assert_eq!(current_id(&h.coordinator).as_deref(), Some("e1"));
        assert_eq!(h.driver.start_count(), 1);
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn first_active_event_in_list_order_wins() {
        let h = harness(true, &["com.x"]);
        h.coordinator.start_monitoring(vec![
            strict_event("later-listed-first", "09:04", 30),
            strict_event("e1", "09:00", 60),
        ]);
        assert_eq!(
            current_id(&h.coordinator).as_deref(),
            Some("later-listed-first")
        );
    }

    #[test]
    fn empty_app_list_never_starts_driver() {
        let h = harness(true, &[]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        h.coordinator.evaluate();

        assert_eq!(h.driver.start_count(), 0);
        assert!(!h.coordinator.get_status().is_blocking);
        assert!(h.coordinator.get_status().is_monitoring);
        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].0.contains("No apps selected for blocking"));
        assert!(messages[0].1);
    }

    #[test]
    fn missing_permission_aborts_without_driver_call() {
        let h = harness(true, &["com.x"]);
        h.driver.permission.store(false, Ordering::SeqCst);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let _subscription = h
            .coordinator
            .on_status_change(move |status| sink.lock().unwrap().push(status.clone()));

        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);

        assert_eq!(h.driver.start_count(), 0);
        assert_eq!(h.apps.reads.load(Ordering::SeqCst), 0);
        assert!(statuses.lock().unwrap().iter().all(|status| !status.is_blocking));
        assert!(h.notifier.messages.lock().unwrap().is_empty());
        assert!(!h.coordinator.has_blocking_permission());
    }

    #[test]
    fn driver_start_failure_leaves_state_unchanged_and_retries_later() {
        let h = harness(true, &["com.x"]);
        h.driver.start_fails.store(true, Ordering::SeqCst);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        assert!(!h.coordinator.get_status().is_blocking);
        assert!(h.notifier.messages.lock().unwrap().is_empty());

        h.driver.start_fails.store(false, Ordering::SeqCst);
        h.coordinator.evaluate();
        assert!(h.coordinator.get_status().is_blocking);
    }

    #[test]
    fn failed_driver_stop_still_clears_block() {
        let h = harness(true, &["com.x"]);
        h.driver.stop_fails.store(true, Ordering::SeqCst);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);

        h.coordinator.stop_monitoring();
        let status = h.coordinator.get_status();
        assert!(!status.is_blocking);
        assert!(!status.is_monitoring);
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 1);

        h.coordinator.stop_monitoring();
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn updated_event_list_is_evaluated_immediately() {
        let h = harness(true, &["com.x"]);
        h.coordinator.start_monitoring(Vec::new());
        assert!(!h.coordinator.get_status().is_blocking);

        h.coordinator
            .update_events(vec![strict_event("new", "09:00", 30)]);
        assert_eq!(current_id(&h.coordinator).as_deref(), Some("new"));
    }

    #[test]
    fn update_events_does_not_evaluate_when_not_monitoring() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .update_events(vec![strict_event("e1", "09:00", 60)]);
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.driver.start_count(), 0);
    }

    #[test]
    fn start_monitoring_is_noop_when_auto_blocking_disabled() {
        let h = harness(false, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);

        let status = h.coordinator.get_status();
        assert!(!status.auto_blocking_enabled);
        assert!(!status.is_monitoring);
        assert_eq!(h.driver.start_count(), 0);
    }

    #[test]
    fn non_strict_events_never_block() {
        let h = harness(true, &["com.x"]);
        let mut relaxed = strict_event("e1", "09:00", 60);
        relaxed.priority = EventPriority::NonStrict;
        h.coordinator.start_monitoring(vec![relaxed]);
        assert!(!h.coordinator.get_status().is_blocking);
    }

    #[test]
    fn toggling_auto_blocking_persists_and_drives_monitoring() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        assert!(h.coordinator.get_status().is_blocking);

        h.coordinator.set_auto_blocking_enabled(false);
        let status = h.coordinator.get_status();
        assert!(!status.auto_blocking_enabled);
        assert!(!status.is_monitoring);
        assert!(!status.is_blocking);
        assert_eq!(
            h.settings.get_bool(AUTO_BLOCKING_ENABLED_KEY).expect("get"),
            Some(false)
        );

        h.coordinator.set_auto_blocking_enabled(true);
        let status = h.coordinator.get_status();
        assert!(status.is_monitoring);
        assert!(status.is_blocking);
        assert_eq!(
            h.settings.get_bool(AUTO_BLOCKING_ENABLED_KEY).expect("get"),
            Some(true)
        );
    }

    #[test]
    fn enabling_without_events_does_not_start_monitoring() {
        let h = harness(false, &["com.x"]);
        h.coordinator.set_auto_blocking_enabled(true);
        let status = h.coordinator.get_status();
        assert!(status.auto_blocking_enabled);
        assert!(!status.is_monitoring);
    }

    #[test]
    fn storage_failure_keeps_in_memory_flag_working() {
        let coordinator = Arc::new(EventBlockingCoordinator::new(
            Arc::new(FakeDriver::new()),
            Arc::new(FailingSettings),
            Arc::new(FakeApps::default()),
            Arc::new(RecordingNotifier::default()),
        ));
        assert!(!coordinator.get_status().auto_blocking_enabled);

        coordinator.set_auto_blocking_enabled(true);
        assert!(coordinator.get_status().auto_blocking_enabled);
    }

    #[test]
    fn subscribers_see_each_change_until_unsubscribed() {
        let h = harness(true, &["com.x"]);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let subscription = h
            .coordinator
            .on_status_change(move |status| sink.lock().unwrap().push(status.clone()));

        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        h.coordinator.manual_override();
        {
            let seen = statuses.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(seen[0].is_blocking && seen[0].is_monitoring);
            assert!(!seen[1].is_blocking);
        }

        subscription.unsubscribe();
        h.coordinator.stop_monitoring();
        assert_eq!(statuses.lock().unwrap().len(), 2);
    }

    #[test]
    fn subscriber_may_read_status_during_notification() {
        let h = harness(true, &["com.x"]);
        let coordinator = Arc::clone(&h.coordinator);
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let _subscription = h.coordinator.on_status_change(move |status| {
            flag.store(coordinator.get_status() == *status, Ordering::SeqCst);
        });

        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn foreground_transition_re_evaluates_and_background_silences_notifications() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "10:00", 30)]);
        assert!(!h.coordinator.get_status().is_blocking);

        h.coordinator.handle_app_state_change(AppLifecycle::Background);
        h.clock.set("2026-05-04T10:05:00Z");
        h.coordinator.handle_app_state_change(AppLifecycle::Foreground);
        assert_eq!(current_id(&h.coordinator).as_deref(), Some("e1"));
        assert_eq!(h.notifier.messages.lock().unwrap().len(), 1);

        h.coordinator.handle_app_state_change(AppLifecycle::Background);
        h.clock.set("2026-05-04T10:31:00Z");
        h.coordinator.evaluate();
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.notifier.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn dispose_stops_blocking_and_drops_subscribers() {
        let h = harness(true, &["com.x"]);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _subscription = h.coordinator.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        let before = hits.load(Ordering::SeqCst);

        h.coordinator.dispose();
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.driver.stop_calls.load(Ordering::SeqCst), 1);

        h.coordinator.update_events(Vec::new());
        h.coordinator.stop_monitoring();
        assert_eq!(hits.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn start_monitoring_without_runtime_stays_idle() {
        let driver = Arc::new(FakeDriver::new());
        let settings = Arc::new(InMemorySettingsStore::default());
        settings
            .set_bool(AUTO_BLOCKING_ENABLED_KEY, true)
            .expect("seed setting");
        let apps = Arc::new(FakeApps::default());
        *apps.app_ids.lock().unwrap() = vec!["com.x".to_string()];
        let coordinator = Arc::new(
            EventBlockingCoordinator::new(
                driver.clone(),
                settings,
                apps,
                Arc::new(RecordingNotifier::default()),
            )
            .with_now_provider(TestClock::at("2026-05-04T09:05:00Z").provider()),
        );

        coordinator.start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        let status = coordinator.get_status();
        assert!(!status.is_monitoring);
        assert!(!status.is_blocking);
        assert_eq!(driver.start_count(), 0);
    }

    #[test]
    fn stale_poll_tick_is_ignored_after_stop_and_restart() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "10:00", 30)]);
        let first_run = h.coordinator.lock_state().monitor_generation;

        h.coordinator.stop_monitoring();
        h.clock.set("2026-05-04T10:05:00Z");
        h.coordinator.poll(first_run);
        assert!(!h.coordinator.get_status().is_blocking);
        assert_eq!(h.driver.start_count(), 0);

        h.clock.set("2026-05-04T09:05:00Z");
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "10:00", 30)]);
        let second_run = h.coordinator.lock_state().monitor_generation;
        h.clock.set("2026-05-04T10:05:00Z");
        h.coordinator.poll(first_run);
        assert_eq!(h.driver.start_count(), 0);

        h.coordinator.poll(second_run);
        assert_eq!(current_id(&h.coordinator).as_deref(), Some("e1"));
    }

    #[test]
    fn toggling_publishes_one_snapshot_per_change() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _subscription = h.coordinator.on_status_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.coordinator.set_auto_blocking_enabled(false);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        h.coordinator.set_auto_blocking_enabled(true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let idle = harness(false, &["com.x"]);
        let idle_hits = Arc::new(AtomicUsize::new(0));
        let idle_counter = Arc::clone(&idle_hits);
        let _idle_subscription = idle.coordinator.on_status_change(move |_| {
            idle_counter.fetch_add(1, Ordering::SeqCst);
        });
        idle.coordinator.set_auto_blocking_enabled(true);
        assert_eq!(idle_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn has_configured_apps_reflects_selection() {
        assert!(harness(true, &["com.x"]).coordinator.has_configured_apps());
        assert!(!harness(true, &[]).coordinator.has_configured_apps());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_monitoring_keeps_a_single_poll_loop() {
        let h = harness(true, &[]);
        let events = vec![strict_event("e1", "09:00", 60)];

        h.coordinator.start_monitoring(events.clone());
        h.coordinator.start_monitoring(events);
        assert_eq!(h.apps.reads.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.apps.reads.load(Ordering::SeqCst), 3);

        h.coordinator.stop_monitoring();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.apps.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_tick_stops_block_after_event_ends() {
        let h = harness(true, &["com.x"]);
        h.coordinator
            .start_monitoring(vec![strict_event("e1", "09:00", 60)]);
        assert!(h.coordinator.get_status().is_blocking);

        h.clock.set("2026-05-04T10:00:30Z");
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!h.coordinator.get_status().is_blocking);
        assert!(h.coordinator.get_status().is_monitoring);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tick_in_flight_during_stop_does_not_start_block() {
        let driver = Arc::new(FakeDriver::new());
        let settings = Arc::new(InMemorySettingsStore::default());
        settings
            .set_bool(AUTO_BLOCKING_ENABLED_KEY, true)
            .expect("seed setting");
        let apps = Arc::new(FakeApps::default());
        *apps.app_ids.lock().unwrap() = vec!["com.x".to_string()];
        let clock = TestClock::at("2026-05-04T09:05:00Z");
        let inner = Arc::clone(&clock.0);
        // Worker-thread reads stall so the tick is still in flight when
        // stop_monitoring takes the lock.
        let slow_clock: NowProvider = Arc::new(move || {
            if std::thread::current().name() == Some("tokio-runtime-worker") {
                std::thread::sleep(Duration::from_millis(300));
            }
            *inner.lock().unwrap()
        });
        let coordinator = Arc::new(
            EventBlockingCoordinator::new(
                driver.clone(),
                settings,
                apps,
                Arc::new(RecordingNotifier::default()),
            )
            .with_poll_interval(Duration::from_millis(100))
            .with_now_provider(slow_clock),
        );

        coordinator.start_monitoring(vec![strict_event("e2", "10:00", 30)]);
        tokio::time::sleep(Duration::from_millis(150)).await;
        clock.set("2026-05-04T10:05:00Z");
        coordinator.stop_monitoring();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let status = coordinator.get_status();
        assert!(!status.is_monitoring);
        assert!(!status.is_blocking);
        assert_eq!(driver.start_count(), 0);
    }
}
