//! Scheduled-refresh metadata, keyed by workbook identity
//!
//! Entries follow a workbook across Save-As through [`RefreshMetadataStore::migrate`].

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use wbsync_model::WorkbookId;

/// Refresh schedule of one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSchedule {
    /// Query or connection name
    pub query: String,
    /// Seconds between refreshes
    pub interval_secs: u32,
    /// Last completed refresh
    pub last_run: Option<DateTime<Utc>>,
    /// Next due refresh
    pub next_run: DateTime<Utc>,
}

impl RefreshSchedule {
    /// Schedule first due one interval after `now`
    #[must_use]
    pub fn new(query: impl Into<String>, interval_secs: u32, now: DateTime<Utc>) -> Self {
        Self {
            query: query.into(),
            interval_secs,
            last_run: None,
            next_run: now + interval(interval_secs),
        }
    }

    /// Whether the refresh is due at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run <= now
    }

    /// Record a completed refresh
    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.next_run = at + interval(self.interval_secs);
    }
}

fn interval(secs: u32) -> Duration {
    Duration::seconds(i64::from(secs))
}

/// Refresh schedules per workbook
#[derive(Debug, Default)]
pub struct RefreshMetadataStore {
    entries: DashMap<WorkbookId, Vec<RefreshSchedule>>,
}

impl RefreshMetadataStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the schedule for `schedule.query`
    pub fn upsert(&self, workbook: &WorkbookId, schedule: RefreshSchedule) {
        let mut entry = self.entries.entry(workbook.clone()).or_default();
        entry.retain(|s| s.query != schedule.query);
        entry.push(schedule);
    }

    /// Schedules of `workbook`
    #[must_use]
    pub fn schedules(&self, workbook: &WorkbookId) -> Vec<RefreshSchedule> {
        self.entries
            .get(workbook)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Record a completed refresh; `false` when the query is unknown
    pub fn record_run(&self, workbook: &WorkbookId, query: &str, at: DateTime<Utc>) -> bool {
        let Some(mut entry) = self.entries.get_mut(workbook) else {
            return false;
        };
        match entry.iter_mut().find(|s| s.query == query) {
            Some(schedule) => {
                schedule.record_run(at);
                true
            }
            None => false,
        }
    }

    /// Queries of `workbook` due at `now`
    #[must_use]
    pub fn due(&self, workbook: &WorkbookId, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .get(workbook)
            .map(|e| {
                e.iter()
                    .filter(|s| s.is_due(now))
                    .map(|s| s.query.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move every schedule of `from` to `to`; returns how many moved
    ///
    /// Schedules already under `to` are replaced query by query.
    pub fn migrate(&self, from: &WorkbookId, to: &WorkbookId) -> usize {
        if from == to {
            return 0;
        }
        let Some((_, moved)) = self.entries.remove(from) else {
            return 0;
        };
        let count = moved.len();
        for schedule in moved {
            self.upsert(to, schedule);
        }
        tracing::debug!(%from, %to, count, "refresh metadata migrated");
        count
    }

    /// Drop all schedules of `workbook`
    pub fn remove(&self, workbook: &WorkbookId) {
        self.entries.remove(workbook);
    }

    /// Number of workbooks with schedules
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no workbook has schedules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
