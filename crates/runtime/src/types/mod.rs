//! Core types shared by the registry, the scheduler and the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Identifier of one download or load unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of background operation active on a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Download,
    Load,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Download => write!(f, "download"),
            OperationKind::Load => write!(f, "load"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Absent,
    Downloading,
    Downloaded,
    DownloadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    LoadFailed,
}

/// Download progress of a model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct Progress {
    /// Percent complete, 0 to 100
    pub percent: u8,
    pub files_done: usize,
    pub files_total: usize,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl Progress {
    /// Progress after `bytes_done` of `bytes_total`, falling back to the file
    /// count when sizes are unknown
    pub fn compute(files_done: usize, files_total: usize, bytes_done: u64, bytes_total: u64) -> Self {
        let percent = if bytes_total > 0 {
            bytes_done.saturating_mul(100) / bytes_total
        } else if files_total > 0 {
            (files_done as u64 * 100) / files_total as u64
        } else {
            0
        };

        Self {
            percent: percent.min(100) as u8,
            files_done,
            files_total,
            bytes_done,
            bytes_total,
        }
    }

    pub fn complete(files_total: usize, bytes_total: u64) -> Self {
        Self {
            percent: 100,
            files_done: files_total,
            files_total,
            bytes_done: bytes_total,
            bytes_total,
        }
    }
}

/// Lifecycle snapshot of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct ModelEntry {
    pub id: String,
    pub download_state: DownloadState,
    pub load_state: LoadState,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub size_bytes: u64,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            download_state: DownloadState::Absent,
            load_state: LoadState::Unloaded,
            progress: Progress::default(),
            error_message: None,
            size_bytes: 0,
            downloaded_at: None,
            last_updated: Utc::now(),
        }
    }

    /// Usable for inference
    pub fn is_ready(&self) -> bool {
        self.download_state == DownloadState::Downloaded && self.load_state == LoadState::Loaded
    }

    /// Whether a download or load is in flight
    pub fn is_busy(&self) -> bool {
        self.download_state == DownloadState::Downloading || self.load_state == LoadState::Loading
    }

    /// Size rounded to whole megabytes
    pub fn size_mb(&self) -> u64 {
        (self.size_bytes + 512 * 1024) / (1024 * 1024)
    }

    pub fn state_label(&self) -> String {
        format!("{:?}/{:?}", self.download_state, self.load_state)
    }
}

/// Catalogue entry returned by model search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub downloads: u64,
    pub likes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_prefers_bytes() {
        let progress = Progress::compute(1, 4, 750, 1000);
        assert_eq!(progress.percent, 75);

        let by_files = Progress::compute(1, 4, 0, 0);
        assert_eq!(by_files.percent, 25);

        assert_eq!(Progress::compute(0, 0, 0, 0).percent, 0);
    }

    #[test]
    fn test_new_entry_is_not_ready() {
        let entry = ModelEntry::new("org/model");
        assert!(!entry.is_ready());
        assert!(!entry.is_busy());
        assert_eq!(entry.download_state, DownloadState::Absent);
        assert_eq!(entry.load_state, LoadState::Unloaded);
    }

    #[test]
    fn test_size_rounds_to_megabytes() {
        let mut entry = ModelEntry::new("m");
        entry.size_bytes = 3 * 1024 * 1024 + 600 * 1024;
        assert_eq!(entry.size_mb(), 4);
    }
}
