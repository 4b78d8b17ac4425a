//! Health bookkeeping for the dashboard's data sources
//!
//! Each source keeps at most one current error in the [`ErrorStore`];
//! recovering clears it. A [`StatusReport`] combines the store with the
//! cache's last successful fetch times so a glance shows what is broken and
//! how old the data on screen is.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::cache::{keys, FileCache};

/// The current error for one data source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub source: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Tracks the most recent error per data source.
///
/// Setting a source that already has an error replaces it, so the store
/// never grows beyond one record per source.
#[derive(Debug, Default)]
pub struct ErrorStore {
    records: RwLock<HashMap<String, ErrorRecord>>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error for a source, replacing any previous one.
    pub fn set(&self, source: &str, message: impl Into<String>) {
        let record = ErrorRecord {
            source: source.to_string(),
            message: message.into(),
            at: Utc::now(),
        };
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source.to_string(), record);
    }

    /// Clears the error for a source. Clearing a healthy source is a no-op.
    pub fn clear(&self, source: &str) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(source);
    }

    /// Returns every current error, ordered by source name.
    pub fn list(&self) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.source.cmp(&b.source));
        records
    }
}

/// When each source last fetched successfully, taken from the cache
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdated {
    pub weather: Option<DateTime<Utc>>,
    pub calendar: Option<DateTime<Utc>>,
    pub tasks: Option<DateTime<Utc>>,
}

/// Snapshot of overall dashboard health
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub ok: bool,
    pub now: DateTime<Utc>,
    pub errors: Vec<ErrorRecord>,
    pub last_updated: LastUpdated,
}

/// Builds a status report from the error store and the cache.
///
/// Timestamps come from the cache envelopes regardless of staleness, so a
/// source that has been failing for hours still shows when it last worked.
pub fn build_report(store: &ErrorStore, cache: &FileCache, weather_key: &str) -> StatusReport {
    let errors = store.list();
    let last_updated = LastUpdated {
        weather: fetched_at(cache, weather_key),
        calendar: fetched_at(cache, keys::calendar_events()),
        tasks: fetched_at(cache, keys::tasks_items()),
    };

    StatusReport {
        ok: errors.is_empty(),
        now: Utc::now(),
        errors,
        last_updated,
    }
}

fn fetched_at(cache: &FileCache, key: &str) -> Option<DateTime<Utc>> {
    match cache.read(key, Duration::zero()) {
        Ok(Some(cached)) => Some(cached.entry.fetched_at),
        _ => None,
    }
}
