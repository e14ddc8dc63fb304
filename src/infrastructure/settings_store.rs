use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const AUTO_BLOCKING_ENABLED_KEY: &str = "autoBlockingEnabled";

/// Key/value store for user preferences that must survive restarts.
pub trait SettingsStore: Send + Sync {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, InfraError>;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSettingsStore {
    db_path: PathBuf,
}

impl SqliteSettingsStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match raw.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(InfraError::InvalidConfig(format!(
                "invalid boolean setting '{key}': '{other}'"
            ))),
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: Mutex<HashMap<String, bool>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::poisoned("settings store", error))?;
        Ok(values.get(key).copied())
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::poisoned("settings store", error))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}
