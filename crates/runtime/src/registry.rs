//! Model registry
//!
//! Single source of truth for "is this model usable". Every model id owns a
//! slot behind its own mutex, so transitions on one id are serialised while
//! different ids never contend. A slot records the operation currently
//! active on it; completion events carry the id of the operation that
//! produced them and are rejected as stale once that operation has been
//! superseded or the entry evicted.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::backend::LoadedModel;
use crate::types::{
    DownloadState, LoadState, ModelEntry, OperationId, OperationKind, Progress, RegistryError,
};

/// Lifecycle events applied through [`ModelRegistry::transition`]
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    StartDownload { operation: OperationId },
    DownloadProgress { operation: OperationId, progress: Progress },
    DownloadDone { operation: OperationId, size_bytes: u64 },
    DownloadFailed { operation: OperationId, error: String },
    /// The backend reported the model as already present locally
    DiscoveredInCache,
    StartLoad { operation: OperationId },
    LoadDone { operation: OperationId, handles: LoadedModel },
    LoadFailed { operation: OperationId, error: String },
    Evict,
}

impl RegistryEvent {
    fn name(&self) -> &'static str {
        match self {
            RegistryEvent::StartDownload { .. } => "startDownload",
            RegistryEvent::DownloadProgress { .. } => "downloadProgress",
            RegistryEvent::DownloadDone { .. } => "downloadDone",
            RegistryEvent::DownloadFailed { .. } => "downloadFailed",
            RegistryEvent::DiscoveredInCache => "discoveredInCache",
            RegistryEvent::StartLoad { .. } => "startLoad",
            RegistryEvent::LoadDone { .. } => "loadDone",
            RegistryEvent::LoadFailed { .. } => "loadFailed",
            RegistryEvent::Evict => "evict",
        }
    }

    /// Events allowed to create an entry for an unknown id
    fn creates_entry(&self) -> bool {
        matches!(
            self,
            RegistryEvent::StartDownload { .. } | RegistryEvent::DiscoveredInCache
        )
    }
}

#[derive(Debug)]
struct Slot {
    entry: ModelEntry,
    active: Option<(OperationId, OperationKind)>,
    handles: Option<LoadedModel>,
    evicted: bool,
}

impl Slot {
    fn new(id: &str) -> Self {
        Self {
            entry: ModelEntry::new(id),
            active: None,
            handles: None,
            evicted: false,
        }
    }

    fn check_operation(&self, operation: OperationId, kind: OperationKind) -> Result<(), RegistryError> {
        match self.active {
            Some((active, active_kind)) if active == operation && active_kind == kind => Ok(()),
            _ => Err(RegistryError::Stale {
                id: self.entry.id.clone(),
            }),
        }
    }

    fn ensure_idle(&self) -> Result<(), RegistryError> {
        match self.active {
            Some((_, kind)) => Err(RegistryError::Conflict {
                id: self.entry.id.clone(),
                active: kind,
            }),
            None => Ok(()),
        }
    }

    fn invalid(&self, event: &RegistryEvent) -> RegistryError {
        RegistryError::InvalidTransition {
            id: self.entry.id.clone(),
            event: event.name(),
            state: self.entry.state_label(),
        }
    }

    fn apply(&mut self, event: RegistryEvent) -> Result<(), RegistryError> {
        match event {
            RegistryEvent::StartDownload { operation } => {
                self.ensure_idle()?;
                match self.entry.download_state {
                    DownloadState::Absent | DownloadState::DownloadFailed => {
                        self.entry.download_state = DownloadState::Downloading;
                        self.entry.progress = Progress::default();
                        self.entry.error_message = None;
                        self.active = Some((operation, OperationKind::Download));
                    }
                    _ => return Err(self.invalid(&event)),
                }
            }
            RegistryEvent::DownloadProgress {
                operation,
                progress,
            } => {
                self.check_operation(operation, OperationKind::Download)?;
                self.entry.progress = progress;
            }
            RegistryEvent::DownloadDone {
                operation,
                size_bytes,
            } => {
                self.check_operation(operation, OperationKind::Download)?;
                let files_total = self.entry.progress.files_total;
                self.entry.download_state = DownloadState::Downloaded;
                self.entry.progress = Progress::complete(files_total, size_bytes);
                self.entry.size_bytes = size_bytes;
                self.entry.downloaded_at = Some(Utc::now());
                self.active = None;
            }
            RegistryEvent::DownloadFailed { operation, error } => {
                self.check_operation(operation, OperationKind::Download)?;
                self.entry.download_state = DownloadState::DownloadFailed;
                self.entry.error_message = Some(error);
                self.active = None;
            }
            RegistryEvent::DiscoveredInCache => {
                self.ensure_idle()?;
                if self.entry.download_state != DownloadState::Downloaded {
                    self.entry.download_state = DownloadState::Downloaded;
                    self.entry.progress = Progress::complete(0, 0);
                    self.entry.error_message = None;
                    self.entry.downloaded_at = Some(Utc::now());
                }
            }
            RegistryEvent::StartLoad { operation } => {
                self.ensure_idle()?;
                if self.entry.download_state != DownloadState::Downloaded
                    || self.entry.load_state == LoadState::Loaded
                {
                    return Err(self.invalid(&event));
                }
                self.entry.load_state = LoadState::Loading;
                self.entry.error_message = None;
                self.active = Some((operation, OperationKind::Load));
            }
            RegistryEvent::LoadDone { operation, handles } => {
                self.check_operation(operation, OperationKind::Load)?;
                self.handles = Some(handles);
                self.entry.load_state = LoadState::Loaded;
                self.active = None;
            }
            RegistryEvent::LoadFailed { operation, error } => {
                self.check_operation(operation, OperationKind::Load)?;
                self.handles = None;
                self.entry.load_state = LoadState::LoadFailed;
                self.entry.error_message = Some(error);
                self.active = None;
            }
            RegistryEvent::Evict => return Err(self.invalid(&event)),
        }

        self.entry.last_updated = Utc::now();
        Ok(())
    }
}

/// In-memory map from model id to lifecycle state and loaded handles
#[derive(Default)]
pub struct ModelRegistry {
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of `id`
    pub fn get(&self, id: &str) -> Option<ModelEntry> {
        let slot = self.slots.get(id).map(|s| Arc::clone(s.value()))?;
        let slot = slot.lock();
        (!slot.evicted).then(|| slot.entry.clone())
    }

    /// True iff the model is downloaded and loaded
    pub fn ready(&self, id: &str) -> bool {
        self.get(id).map(|e| e.is_ready()).unwrap_or(false)
    }

    /// Apply one event; returns the resulting snapshot (for `Evict`, the
    /// removed entry)
    pub fn transition(&self, id: &str, event: RegistryEvent) -> Result<ModelEntry, RegistryError> {
        if let RegistryEvent::Evict = event {
            return self
                .evict(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()));
        }

        loop {
            let slot = if event.creates_entry() {
                Arc::clone(
                    self.slots
                        .entry(id.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(Slot::new(id))))
                        .value(),
                )
            } else {
                match self.slots.get(id) {
                    Some(slot) => Arc::clone(slot.value()),
                    None => return Err(missing_entry(id, &event)),
                }
            };

            let mut guard = slot.lock();
            if guard.evicted {
                // Lost a race with eviction; look the id up again
                drop(guard);
                if event.creates_entry() {
                    continue;
                }
                return Err(missing_entry(id, &event));
            }

            let name = event.name();
            guard.apply(event)?;
            tracing::debug!(
                model_id = %id,
                event = name,
                state = %guard.entry.state_label(),
                "Registry transition"
            );
            return Ok(guard.entry.clone());
        }
    }

    /// Remove the entry and its handles. Safe in any state; an in-flight
    /// unit's later events become stale.
    pub fn evict(&self, id: &str) -> Option<ModelEntry> {
        let slot = self.slots.get(id).map(|s| Arc::clone(s.value()))?;
        let mut guard = slot.lock();
        if guard.evicted {
            return None;
        }
        guard.evicted = true;
        guard.handles = None;
        self.slots
            .remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
        tracing::info!(model_id = %id, "Model evicted from registry");
        Some(guard.entry.clone())
    }

    /// Borrow the installed handles of a ready model
    pub fn handles(&self, id: &str) -> Option<LoadedModel> {
        let slot = self.slots.get(id).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock();
        if guard.evicted || !guard.entry.is_ready() {
            return None;
        }
        guard.handles.clone()
    }

    /// Every entry, sorted by id
    pub fn snapshot(&self) -> Vec<ModelEntry> {
        let slots: Vec<Arc<Mutex<Slot>>> =
            self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut entries: Vec<ModelEntry> = slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.lock();
                (!guard.evicted).then(|| guard.entry.clone())
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Entries with a download started, finished or failed
    pub fn downloaded(&self) -> Vec<ModelEntry> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.download_state != DownloadState::Absent)
            .collect()
    }

    /// Ids of ready models
    pub fn loaded_ids(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.is_ready())
            .map(|e| e.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn missing_entry(id: &str, event: &RegistryEvent) -> RegistryError {
    match event {
        RegistryEvent::StartLoad { .. } => RegistryError::InvalidTransition {
            id: id.to_string(),
            event: event.name(),
            state: format!("{:?}/{:?}", DownloadState::Absent, LoadState::Unloaded),
        },
        _ => RegistryError::Stale { id: id.to_string() },
    }
}
