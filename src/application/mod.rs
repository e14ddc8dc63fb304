pub mod blocking_stats;
pub mod bootstrap;
pub mod commands;
pub mod coordinator;
pub mod session_timer;
pub mod status;
