//! Loading-status side table
//!
//! Reports transient "loading…" progress to clients. It is separate from the
//! registry and purely informational. Rows whose terminal status is older
//! than the retention window are dropped by the housekeeping pass that runs
//! on every read and write; there is no background timer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LoadingPhase {
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct LoadingStatus {
    pub model_id: String,
    pub status: LoadingPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct LoadingStatusTable {
    rows: Mutex<HashMap<String, LoadingStatus>>,
    retention: chrono::Duration,
}

impl LoadingStatusTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// A load request was accepted
    pub fn begin(&self, model_id: &str) {
        self.begin_at(model_id, Utc::now());
    }

    /// A load finished; rows for unknown ids are ignored
    pub fn finish(&self, model_id: &str, outcome: Result<(), String>) {
        self.finish_at(model_id, outcome, Utc::now());
    }

    pub fn remove(&self, model_id: &str) {
        self.rows.lock().remove(model_id);
    }

    pub fn get(&self, model_id: &str) -> Option<LoadingStatus> {
        let mut rows = self.rows.lock();
        self.housekeep(&mut rows, Utc::now());
        rows.get(model_id).cloned()
    }

    /// All rows, oldest first
    pub fn snapshot(&self) -> Vec<LoadingStatus> {
        self.snapshot_at(Utc::now())
    }

    pub(crate) fn begin_at(&self, model_id: &str, now: DateTime<Utc>) {
        let mut rows = self.rows.lock();
        self.housekeep(&mut rows, now);
        rows.insert(
            model_id.to_string(),
            LoadingStatus {
                model_id: model_id.to_string(),
                status: LoadingPhase::Loading,
                message: None,
                started_at: now,
                finished_at: None,
            },
        );
    }

    pub(crate) fn finish_at(&self, model_id: &str, outcome: Result<(), String>, now: DateTime<Utc>) {
        let mut rows = self.rows.lock();
        self.housekeep(&mut rows, now);
        if let Some(row) = rows.get_mut(model_id) {
            match outcome {
                Ok(()) => {
                    row.status = LoadingPhase::Ready;
                    row.message = None;
                }
                Err(message) => {
                    row.status = LoadingPhase::Failed;
                    row.message = Some(message);
                }
            }
            row.finished_at = Some(now);
        }
    }

    pub(crate) fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<LoadingStatus> {
        let mut rows = self.rows.lock();
        self.housekeep(&mut rows, now);
        let mut snapshot: Vec<LoadingStatus> = rows.values().cloned().collect();
        snapshot.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.model_id.cmp(&b.model_id)));
        snapshot
    }

    fn housekeep(&self, rows: &mut HashMap<String, LoadingStatus>, now: DateTime<Utc>) {
        let before = rows.len();
        rows.retain(|_, row| match row.finished_at {
            Some(finished) => now.signed_duration_since(finished) <= self.retention,
            None => true,
        });
        let pruned = before - rows.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned stale loading-status rows");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lifecycle() {
        let table = LoadingStatusTable::new(Duration::from_secs(3600));
        table.begin("m");
        assert_eq!(table.get("m").unwrap().status, LoadingPhase::Loading);

        table.finish("m", Err("out of memory".to_string()));
        let row = table.get("m").unwrap();
        assert_eq!(row.status, LoadingPhase::Failed);
        assert_eq!(row.message.as_deref(), Some("out of memory"));
        assert!(row.finished_at.is_some());

        table.finish("unknown", Ok(()));
        assert!(table.get("unknown").is_none());
    }

    #[test]
    fn test_terminal_rows_pruned_after_retention() {
        let table = LoadingStatusTable::new(Duration::from_secs(3600));
        let start = Utc::now();
        table.begin_at("done", start);
        table.finish_at("done", Ok(()), start);
        table.begin_at("running", start);

        let later = start + chrono::Duration::minutes(59);
        assert_eq!(table.snapshot_at(later).len(), 2);

        let much_later = start + chrono::Duration::minutes(61);
        let rows = table.snapshot_at(much_later);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_id, "running");
        assert_eq!(rows[0].status, LoadingPhase::Loading);
    }
}
