use crate::application::coordinator::NowProvider;
use crate::infrastructure::blocking_stats_repository::{BlockingAttempt, BlockingStatsRepository};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

const RETENTION_DAYS: i64 = 28;
const UNKNOWN_PACKAGE: &str = "unknown";
const UNKNOWN_APP: &str = "Unknown App";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedAppCount {
    pub app_name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingStatsSummary {
    pub current_week: NaiveDate,
    pub current_week_blocks: u64,
    pub total_blocks: u64,
    pub last_blocked_at: Option<DateTime<Utc>>,
    pub most_blocked_apps: Vec<BlockedAppCount>,
}

/// Weekly counters of blocked launch attempts. Storage failures are logged
/// and read as zero or empty.
pub struct BlockingStatsService {
    repository: Arc<dyn BlockingStatsRepository>,
    time_zone: Tz,
    now_provider: NowProvider,
}

impl BlockingStatsService {
    pub fn new(repository: Arc<dyn BlockingStatsRepository>, time_zone: Tz) -> Self {
        Self {
            repository,
            time_zone,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Monday of the current week in the configured zone.
    pub fn current_week_start(&self) -> NaiveDate {
        week_start_of(self.local_today())
    }

    /// Returns the current week's count including this attempt, or 0 on
    /// storage failure.
    pub fn record_block_attempt(&self, package_name: Option<&str>, app_name: Option<&str>) -> u64 {
        let attempt = BlockingAttempt {
            occurred_at: self.now(),
            week_start: self.current_week_start(),
            package_name: non_blank(package_name).unwrap_or(UNKNOWN_PACKAGE).to_string(),
            app_name: non_blank(app_name).unwrap_or(UNKNOWN_APP).to_string(),
        };

        let result = self
            .repository
            .insert(&attempt)
            .and_then(|_| self.repository.count_for_week(attempt.week_start));
        match result {
            Ok(count) => {
                info!(
                    package_name = %attempt.package_name,
                    app_name = %attempt.app_name,
                    weekly_total = count,
                    "blocked launch attempt recorded"
                );
                count
            }
            Err(error) => {
                error!(%error, "failed to record blocking attempt");
                0
            }
        }
    }

    pub fn current_week_blocks(&self) -> u64 {
        self.repository
            .count_for_week(self.current_week_start())
            .unwrap_or_else(|error| log_failure("current week blocks", error, 0))
    }

    pub fn total_blocks(&self) -> u64 {
        self.repository
            .count_all()
            .unwrap_or_else(|error| log_failure("total blocks", error, 0))
    }

    pub fn last_blocked_at(&self) -> Option<DateTime<Utc>> {
        self.repository
            .last_attempt_at()
            .unwrap_or_else(|error| log_failure("last blocked date", error, None))
    }

    /// Top apps this week by attempt count; ties ordered by name.
    pub fn most_blocked_apps(&self, limit: usize) -> Vec<BlockedAppCount> {
        let attempts = match self.repository.list_for_week(self.current_week_start()) {
            Ok(attempts) => attempts,
            Err(error) => return log_failure("most blocked apps", error, Vec::new()),
        };

        let mut counts: HashMap<String, u64> = HashMap::new();
        for attempt in attempts {
            *counts.entry(attempt.app_name).or_default() += 1;
        }

        let mut ranked: Vec<BlockedAppCount> = counts
            .into_iter()
            .map(|(app_name, count)| BlockedAppCount { app_name, count })
            .collect();
        ranked.sort_by(|left, right| {
            right
                .count
                .cmp(&left.count)
                .then_with(|| left.app_name.cmp(&right.app_name))
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn summary(&self, limit: usize) -> BlockingStatsSummary {
        BlockingStatsSummary {
            current_week: self.current_week_start(),
            current_week_blocks: self.current_week_blocks(),
            total_blocks: self.total_blocks(),
            last_blocked_at: self.last_blocked_at(),
            most_blocked_apps: self.most_blocked_apps(limit),
        }
    }

    /// Drops weeks that started more than four weeks ago.
    pub fn cleanup_old_data(&self) -> usize {
        let cutoff = self.local_today() - Duration::days(RETENTION_DAYS);
        match self.repository.delete_weeks_before(cutoff) {
            Ok(removed) => {
                info!(removed, %cutoff, "old blocking stats removed");
                removed
            }
            Err(error) => log_failure("cleanup", error, 0),
        }
    }

    pub fn reset(&self) {
        match self.repository.clear() {
            Ok(()) => info!("blocking stats reset"),
            Err(error) => error!(%error, "failed to reset blocking stats"),
        }
    }

    fn local_today(&self) -> NaiveDate {
        self.now().with_timezone(&self.time_zone).date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }
}

pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn log_failure<T>(what: &str, error: InfraError, fallback: T) -> T {
    error!(%error, "failed to read blocking stats: {what}");
    fallback
}
