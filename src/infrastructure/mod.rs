pub mod app_selection;
pub mod blocking_driver;
pub mod blocking_stats_repository;
pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod settings_store;
pub mod storage;
