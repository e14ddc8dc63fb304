use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Blocking driver error: {0}")]
    Driver(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl InfraError {
    pub fn poisoned(what: &str, error: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(format!("{what} lock poisoned: {error}"))
    }
}
