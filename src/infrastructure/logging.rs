use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "zenblock.log";

/// Installs a JSON-lines subscriber writing to `<logs_dir>/zenblock.log`.
///
/// `RUST_LOG` wins over `default_level`. Returns `Ok(false)` when a global
/// subscriber was already installed.
pub fn init_logging(logs_dir: &Path, default_level: &str) -> Result<bool, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok();
    Ok(installed)
}
