use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingAttempt {
    pub occurred_at: DateTime<Utc>,
    pub week_start: NaiveDate,
    pub package_name: String,
    pub app_name: String,
}

pub trait BlockingStatsRepository: Send + Sync {
    fn insert(&self, attempt: &BlockingAttempt) -> Result<(), InfraError>;
    fn count_for_week(&self, week_start: NaiveDate) -> Result<u64, InfraError>;
    fn count_all(&self) -> Result<u64, InfraError>;
    fn list_for_week(&self, week_start: NaiveDate) -> Result<Vec<BlockingAttempt>, InfraError>;
    fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>, InfraError>;
    /// Removes attempts bucketed in weeks starting before `cutoff`.
    fn delete_weeks_before(&self, cutoff: NaiveDate) -> Result<usize, InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteBlockingStatsRepository {
    db_path: PathBuf,
}

impl SqliteBlockingStatsRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid blocking_attempts.occurred_at '{raw}': {error}"))
        })
}

fn parse_week(raw: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| {
        InfraError::InvalidConfig(format!("invalid blocking_attempts.week_start '{raw}': {error}"))
    })
}

impl BlockingStatsRepository for SqliteBlockingStatsRepository {
    fn insert(&self, attempt: &BlockingAttempt) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO blocking_attempts (occurred_at, week_start, package_name, app_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                attempt.occurred_at.to_rfc3339(),
                attempt.week_start.format("%Y-%m-%d").to_string(),
                attempt.package_name,
                attempt.app_name
            ],
        )?;
        Ok(())
    }

    fn count_for_week(&self, week_start: NaiveDate) -> Result<u64, InfraError> {
        let connection = self.connect()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM blocking_attempts WHERE week_start = ?1",
            params![week_start.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn count_all(&self) -> Result<u64, InfraError> {
        let connection = self.connect()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM blocking_attempts", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn list_for_week(&self, week_start: NaiveDate) -> Result<Vec<BlockingAttempt>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT occurred_at, week_start, package_name, app_name
             FROM blocking_attempts WHERE week_start = ?1 ORDER BY id",
        )?;
        let rows = statement.query_map(
            params![week_start.format("%Y-%m-%d").to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut attempts = Vec::new();
        for row in rows {
            let (occurred_at, week_start, package_name, app_name) = row?;
            attempts.push(BlockingAttempt {
                occurred_at: parse_timestamp(&occurred_at)?,
                week_start: parse_week(&week_start)?,
                package_name,
                app_name,
            });
        }
        Ok(attempts)
    }

    fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection.query_row(
            "SELECT MAX(occurred_at) FROM blocking_attempts",
            [],
            |row| row.get(0),
        )?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    fn delete_weeks_before(&self, cutoff: NaiveDate) -> Result<usize, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute(
            "DELETE FROM blocking_attempts WHERE week_start < ?1",
            params![cutoff.format("%Y-%m-%d").to_string()],
        )?;
        Ok(removed)
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM blocking_attempts", [])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlockingStatsRepository {
    attempts: Mutex<Vec<BlockingAttempt>>,
}

impl InMemoryBlockingStatsRepository {
    fn with_attempts<T>(
        &self,
        f: impl FnOnce(&mut Vec<BlockingAttempt>) -> T,
    ) -> Result<T, InfraError> {
        let mut attempts = self
            .attempts
            .lock()
            .map_err(|error| InfraError::poisoned("blocking stats", error))?;
        Ok(f(&mut attempts))
    }
}

impl BlockingStatsRepository for InMemoryBlockingStatsRepository {
    fn insert(&self, attempt: &BlockingAttempt) -> Result<(), InfraError> {
        self.with_attempts(|attempts| attempts.push(attempt.clone()))
    }

    fn count_for_week(&self, week_start: NaiveDate) -> Result<u64, InfraError> {
        self.with_attempts(|attempts| {
            attempts
                .iter()
                .filter(|attempt| attempt.week_start == week_start)
                .count() as u64
        })
    }

    fn count_all(&self) -> Result<u64, InfraError> {
        self.with_attempts(|attempts| attempts.len() as u64)
    }

    fn list_for_week(&self, week_start: NaiveDate) -> Result<Vec<BlockingAttempt>, InfraError> {
        self.with_attempts(|attempts| {
            attempts
                .iter()
                .filter(|attempt| attempt.week_start == week_start)
                .cloned()
                .collect()
        })
    }

    fn last_attempt_at(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        self.with_attempts(|attempts| attempts.iter().map(|attempt| attempt.occurred_at).max())
    }

    fn delete_weeks_before(&self, cutoff: NaiveDate) -> Result<usize, InfraError> {
        self.with_attempts(|attempts| {
            let before = attempts.len();
            attempts.retain(|attempt| attempt.week_start >= cutoff);
            before - attempts.len()
        })
    }

    fn clear(&self) -> Result<(), InfraError> {
        self.with_attempts(Vec::clear)
    }
}
