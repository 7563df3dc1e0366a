//! Lifecycle scheduler
//!
//! Runs download and load units in the background and drives the registry
//! through their results. Units are bounded by a semaphore, wrapped in a
//! timeout, and report over a channel to a single applier task; applying a
//! registry transition is the only side effect a unit has. Eviction never
//! cancels a unit; it only makes the unit's eventual report stale.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};

use crate::backend::{LoadedModel, ModelBackend};
use crate::config::SchedulerConfig;
use crate::registry::{ModelRegistry, RegistryEvent};
use crate::types::{
    BackendError, DownloadState, LoadState, ModelEntry, OperationId, OperationKind, Progress,
    RegistryError, SchedulerError,
};

pub mod loading_status;

pub use loading_status::{LoadingPhase, LoadingStatus, LoadingStatusTable};

/// Result of a download or load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Started,
    AlreadyInProgress,
    AlreadyComplete,
}

impl RequestOutcome {
    pub fn download_message(&self, id: &str) -> String {
        match self {
            RequestOutcome::Started => format!("Started downloading {}", id),
            _ => format!("Model {} already downloaded or is downloading.", id),
        }
    }

    pub fn load_message(&self, id: &str) -> String {
        match self {
            RequestOutcome::Started => format!("Started loading {}", id),
            RequestOutcome::AlreadyInProgress => format!("Model {} is already loading.", id),
            RequestOutcome::AlreadyComplete => format!("Model {} is already loaded.", id),
        }
    }
}

/// Messages sent by units to the applier
enum UnitReport {
    Progress {
        id: String,
        operation: OperationId,
        progress: Progress,
    },
    Downloaded {
        id: String,
        operation: OperationId,
        result: Result<u64, BackendError>,
    },
    Loaded {
        id: String,
        operation: OperationId,
        result: Result<LoadedModel, BackendError>,
    },
}

struct SchedulerInner {
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn ModelBackend>,
    loading_status: Arc<LoadingStatusTable>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    reports: mpsc::UnboundedSender<UnitReport>,
    in_flight: DashMap<OperationId, AbortHandle>,
    is_running: RwLock<bool>,
    shutdown_notify: Notify,
    applier: Mutex<Option<JoinHandle<()>>>,
}

/// Background scheduler for model downloads and loads
#[derive(Clone)]
pub struct LifecycleScheduler {
    inner: Arc<SchedulerInner>,
}

impl LifecycleScheduler {
    /// Create the scheduler and start its applier task. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let (reports, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(SchedulerInner {
            registry,
            backend,
            loading_status: Arc::new(LoadingStatusTable::new(config.loading_status_retention)),
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            reports,
            in_flight: DashMap::new(),
            is_running: RwLock::new(true),
            shutdown_notify: Notify::new(),
            applier: Mutex::new(None),
        });

        let applier = Self::start_applier(Arc::clone(&inner), receiver);
        *inner.applier.lock() = Some(applier);
        Self { inner }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.inner.registry
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.inner.backend
    }

    pub fn loading_status(&self) -> &Arc<LoadingStatusTable> {
        &self.inner.loading_status
    }

    /// Units currently scheduled or running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Schedule a download unless one is running or already finished
    pub async fn request_download(&self, id: &str) -> Result<RequestOutcome, SchedulerError> {
        self.inner.request_download(id)
    }

    /// Schedule a load; the model must be downloaded or found in the cache
    pub async fn request_load(&self, id: &str) -> Result<RequestOutcome, SchedulerError> {
        let inner = &self.inner;
        let id = validate_id(id)?;
        inner.ensure_running()?;

        match inner.registry.get(id) {
            Some(entry) if entry.load_state == LoadState::Loaded => {
                return Ok(RequestOutcome::AlreadyComplete)
            }
            Some(entry) if entry.load_state == LoadState::Loading => {
                return Ok(RequestOutcome::AlreadyInProgress)
            }
            Some(entry) if entry.download_state == DownloadState::Downloading => {
                return Err(SchedulerError::Conflict {
                    id: id.to_string(),
                    active: OperationKind::Download,
                })
            }
            Some(entry) if entry.download_state == DownloadState::Downloaded => {}
            _ => {
                if !inner.backend.is_cached(id).await {
                    return Err(SchedulerError::NotAvailable(id.to_string()));
                }
                match inner.registry.transition(id, RegistryEvent::DiscoveredInCache) {
                    Ok(_) => tracing::info!(model_id = %id, "Model discovered in local cache"),
                    Err(RegistryError::Conflict { active, .. }) => {
                        return conflict_outcome(id, active)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        inner.start_load(id)
    }

    /// Remove a model from the registry and drop its cached files. In-flight
    /// units are left to finish; their results are discarded.
    pub async fn evict(&self, id: &str) -> Option<ModelEntry> {
        let removed = self.inner.registry.evict(id)?;
        self.inner.loading_status.remove(id);
        if let Err(e) = self.inner.backend.remove(id).await {
            tracing::warn!(model_id = %id, "Failed to remove cached files: {}", e);
        }
        Some(removed)
    }

    /// Stop accepting work, abort running units and stop the applier
    pub async fn shutdown(&self) {
        {
            let mut is_running = self.inner.is_running.write();
            if !*is_running {
                tracing::debug!("Lifecycle scheduler already shut down");
                return;
            }
            *is_running = false;
        }

        tracing::info!(in_flight = self.inner.in_flight.len(), "Shutting down lifecycle scheduler");
        self.inner.permits.close();
        for unit in self.inner.in_flight.iter() {
            unit.value().abort();
        }
        self.inner.in_flight.clear();
        // Stores a permit if the applier is busy applying a report
        self.inner.shutdown_notify.notify_one();

        let applier = self.inner.applier.lock().take();
        if let Some(applier) = applier {
            if let Err(e) = applier.await {
                tracing::warn!("Lifecycle applier ended abnormally: {}", e);
            }
        }
    }

    /// Whether the applier task is still draining reports
    pub fn is_applier_running(&self) -> bool {
        self.inner
            .applier
            .lock()
            .as_ref()
            .is_some_and(|applier| !applier.is_finished())
    }

    fn start_applier(
        inner: Arc<SchedulerInner>,
        mut receiver: mpsc::UnboundedReceiver<UnitReport>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    report = receiver.recv() => {
                        match report {
                            Some(report) => inner.apply(report),
                            None => break,
                        }
                    }
                    _ = inner.shutdown_notify.notified() => {
                        break;
                    }
                }
            }
            tracing::debug!("Lifecycle applier stopped");
        })
    }
}

impl SchedulerInner {
    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if *self.is_running.read() {
            Ok(())
        } else {
            Err(SchedulerError::ShuttingDown)
        }
    }

    fn request_download(self: &Arc<Self>, id: &str) -> Result<RequestOutcome, SchedulerError> {
        let id = validate_id(id)?;
        self.ensure_running()?;

        let operation = OperationId::new();
        match self
            .registry
            .transition(id, RegistryEvent::StartDownload { operation })
        {
            Ok(_) => {}
            // Already downloading, loading, or downloaded
            Err(RegistryError::Conflict { .. }) => return Ok(RequestOutcome::AlreadyInProgress),
            Err(RegistryError::InvalidTransition { .. }) => {
                return Ok(RequestOutcome::AlreadyComplete)
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(model_id = %id, %operation, "Download scheduled");
        let unit = Arc::clone(self);
        let model_id = id.to_string();
        self.spawn_unit(operation, async move {
            let result = unit.run_download(&model_id, operation).await;
            let _ = unit.reports.send(UnitReport::Downloaded {
                id: model_id,
                operation,
                result,
            });
        });
        Ok(RequestOutcome::Started)
    }

    fn start_load(self: &Arc<Self>, id: &str) -> Result<RequestOutcome, SchedulerError> {
        let operation = OperationId::new();
        match self
            .registry
            .transition(id, RegistryEvent::StartLoad { operation })
        {
            Ok(_) => {}
            Err(RegistryError::Conflict { active, .. }) => return conflict_outcome(id, active),
            Err(RegistryError::InvalidTransition { .. }) => {
                // Raced with another load or with eviction
                return match self.registry.get(id) {
                    Some(entry) if entry.load_state == LoadState::Loaded => {
                        Ok(RequestOutcome::AlreadyComplete)
                    }
                    _ => Err(SchedulerError::NotAvailable(id.to_string())),
                };
            }
            Err(e) => return Err(e.into()),
        }

        self.loading_status.begin(id);
        tracing::info!(model_id = %id, %operation, "Load scheduled");
        let unit = Arc::clone(self);
        let model_id = id.to_string();
        self.spawn_unit(operation, async move {
            let result = unit.run_load(&model_id).await;
            let _ = unit.reports.send(UnitReport::Loaded {
                id: model_id,
                operation,
                result,
            });
        });
        Ok(RequestOutcome::Started)
    }

    /// Spawn a unit and track its abort handle until its final report lands
    fn spawn_unit<F>(&self, operation: OperationId, unit: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (registered, gate) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if gate.await.is_err() {
                return;
            }
            unit.await;
        });
        self.in_flight.insert(operation, handle.abort_handle());
        let _ = registered.send(());
    }

    async fn run_download(&self, id: &str, operation: OperationId) -> Result<u64, BackendError> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BackendError::Failed("scheduler is shutting down".to_string()))?;

        match tokio::time::timeout(self.config.unit_timeout, self.download_files(id, operation))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.config.unit_timeout)),
        }
    }

    async fn download_files(&self, id: &str, operation: OperationId) -> Result<u64, BackendError> {
        let files = self.backend.list_files(id).await?;
        let files_total = files.len();
        let bytes_total: u64 = files.iter().map(|f| f.size).sum();
        let mut bytes_done = 0u64;

        self.report_progress(id, operation, Progress::compute(0, files_total, 0, bytes_total));
        for (index, file) in files.iter().enumerate() {
            let base = bytes_done;
            let on_progress = |file_bytes: u64| {
                let progress =
                    Progress::compute(index, files_total, base + file_bytes, bytes_total);
                self.report_progress(id, operation, progress);
            };
            self.backend.download_file(id, file, &on_progress).await?;

            bytes_done += file.size;
            self.report_progress(
                id,
                operation,
                Progress::compute(index + 1, files_total, bytes_done, bytes_total),
            );
        }

        Ok(bytes_total)
    }

    fn report_progress(&self, id: &str, operation: OperationId, progress: Progress) {
        let _ = self.reports.send(UnitReport::Progress {
            id: id.to_string(),
            operation,
            progress,
        });
    }

    async fn run_load(&self, id: &str) -> Result<LoadedModel, BackendError> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BackendError::Failed("scheduler is shutting down".to_string()))?;

        match tokio::time::timeout(self.config.unit_timeout, self.backend.load(id)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.config.unit_timeout)),
        }
    }

    /// Apply one unit report to the registry
    fn apply(self: &Arc<Self>, report: UnitReport) {
        match report {
            UnitReport::Progress {
                id,
                operation,
                progress,
            } => {
                let event = RegistryEvent::DownloadProgress {
                    operation,
                    progress,
                };
                if let Err(e) = self.registry.transition(&id, event) {
                    tracing::debug!(model_id = %id, "Dropping progress report: {}", e);
                }
            }
            UnitReport::Downloaded {
                id,
                operation,
                result,
            } => {
                self.in_flight.remove(&operation);
                let event = match result {
                    Ok(size_bytes) => RegistryEvent::DownloadDone {
                        operation,
                        size_bytes,
                    },
                    Err(e) => {
                        tracing::warn!(model_id = %id, "Download failed: {}", e);
                        RegistryEvent::DownloadFailed {
                            operation,
                            error: e.to_string(),
                        }
                    }
                };
                let succeeded = matches!(event, RegistryEvent::DownloadDone { .. });
                match self.registry.transition(&id, event) {
                    Ok(_) if succeeded => {
                        tracing::info!(model_id = %id, "Download complete");
                        if self.config.auto_load_after_download {
                            if let Err(e) = self.start_load(&id) {
                                tracing::warn!(model_id = %id, "Automatic load not started: {}", e);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(model_id = %id, "Dropping download result: {}", e),
                }
            }
            UnitReport::Loaded {
                id,
                operation,
                result,
            } => {
                self.in_flight.remove(&operation);
                let (event, outcome) = match result {
                    Ok(handles) => (RegistryEvent::LoadDone { operation, handles }, Ok(())),
                    Err(e) => {
                        tracing::warn!(model_id = %id, "Load failed: {}", e);
                        (
                            RegistryEvent::LoadFailed {
                                operation,
                                error: e.to_string(),
                            },
                            Err(e.to_string()),
                        )
                    }
                };
                match self.registry.transition(&id, event) {
                    Ok(_) => {
                        if outcome.is_ok() {
                            tracing::info!(model_id = %id, "Model loaded");
                        }
                        self.loading_status.finish(&id, outcome);
                    }
                    Err(e) => tracing::debug!(model_id = %id, "Dropping load result: {}", e),
                }
            }
        }
    }
}

fn validate_id(id: &str) -> Result<&str, SchedulerError> {
    let id = id.trim();
    if id.is_empty() {
        Err(SchedulerError::EmptyModelId)
    } else {
        Ok(id)
    }
}

fn conflict_outcome(id: &str, active: OperationKind) -> Result<RequestOutcome, SchedulerError> {
    match active {
        OperationKind::Load => Ok(RequestOutcome::AlreadyInProgress),
        OperationKind::Download => Err(SchedulerError::Conflict {
            id: id.to_string(),
            active,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use std::time::Duration;

    fn scheduler_with(backend: SimulatedBackend) -> (LifecycleScheduler, Arc<SimulatedBackend>) {
        let backend = Arc::new(backend.with_file_delay(Duration::from_millis(8)));
        let scheduler = LifecycleScheduler::new(
            SchedulerConfig::default(),
            Arc::new(ModelRegistry::new()),
            backend.clone(),
        );
        (scheduler, backend)
    }

    async fn wait_until<F: Fn(&ModelEntry) -> bool>(
        scheduler: &LifecycleScheduler,
        id: &str,
        predicate: F,
    ) -> ModelEntry {
        for _ in 0..500 {
            if let Some(entry) = scheduler.registry().get(id) {
                if predicate(&entry) {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached for {}", id);
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new());
        assert!(matches!(
            scheduler.request_download("  ").await,
            Err(SchedulerError::EmptyModelId)
        ));
        assert!(matches!(
            scheduler.request_load("").await,
            Err(SchedulerError::EmptyModelId)
        ));
    }

    #[tokio::test]
    async fn test_download_is_idempotent() {
        let (scheduler, backend) = scheduler_with(SimulatedBackend::new());
        assert_eq!(
            scheduler.request_download("m").await.unwrap(),
            RequestOutcome::Started
        );
        assert_eq!(
            scheduler.request_download("m").await.unwrap(),
            RequestOutcome::AlreadyInProgress
        );

        wait_until(&scheduler, "m", |e| e.download_state == DownloadState::Downloaded).await;
        assert_eq!(
            scheduler.request_download("m").await.unwrap(),
            RequestOutcome::AlreadyComplete
        );
        assert_eq!(backend.download_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_download_recorded() {
        let (scheduler, _) =
            scheduler_with(SimulatedBackend::new().with_failing_download("broken/model"));
        scheduler.request_download("broken/model").await.unwrap();

        let entry = wait_until(&scheduler, "broken/model", |e| {
            e.download_state == DownloadState::DownloadFailed
        })
        .await;
        assert!(entry.error_message.unwrap().contains("broken/model"));
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_load_while_downloading_conflicts() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new());
        scheduler.request_download("m").await.unwrap();
        assert!(matches!(
            scheduler.request_load("m").await,
            Err(SchedulerError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_from_cache_without_download() {
        let (scheduler, backend) = scheduler_with(
            SimulatedBackend::new().with_cached(vec!["cached/model".to_string()]),
        );
        assert_eq!(
            scheduler.request_load("cached/model").await.unwrap(),
            RequestOutcome::Started
        );
        wait_until(&scheduler, "cached/model", |e| e.is_ready()).await;
        assert_eq!(backend.download_calls(), 0);

        let status = scheduler.loading_status().get("cached/model").unwrap();
        assert_eq!(status.status, LoadingPhase::Ready);
    }

    #[tokio::test]
    async fn test_failed_load_marks_status() {
        let (scheduler, _) = scheduler_with(
            SimulatedBackend::new()
                .with_cached(vec!["bad".to_string()])
                .with_failing_load("bad"),
        );
        scheduler.request_load("bad").await.unwrap();
        let entry = wait_until(&scheduler, "bad", |e| e.load_state == LoadState::LoadFailed).await;
        assert_eq!(entry.download_state, DownloadState::Downloaded);
        assert!(scheduler.registry().handles("bad").is_none());

        let status = scheduler.loading_status().get("bad").unwrap();
        assert_eq!(status.status, LoadingPhase::Failed);
    }

    #[tokio::test]
    async fn test_evict_during_download_drops_result() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new());
        scheduler.request_download("m").await.unwrap();
        assert!(scheduler.evict("m").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.registry().get("m").is_none());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_auto_load_after_download() {
        let backend = Arc::new(SimulatedBackend::new().with_file_delay(Duration::from_millis(4)));
        let config = SchedulerConfig {
            auto_load_after_download: true,
            ..SchedulerConfig::default()
        };
        let scheduler =
            LifecycleScheduler::new(config, Arc::new(ModelRegistry::new()), backend.clone());

        scheduler.request_download("m").await.unwrap();
        wait_until(&scheduler, "m", |e| e.is_ready()).await;
        assert_eq!(backend.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new());
        scheduler.request_download("m").await.unwrap();
        scheduler.shutdown().await;
        assert_eq!(scheduler.in_flight(), 0);
        assert!(matches!(
            scheduler.request_download("other").await,
            Err(SchedulerError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_applier_with_reports_pending() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new().with_cached(vec!["a".into()]));
        assert!(scheduler.is_applier_running());
        scheduler.request_load("a").await.unwrap();
        scheduler.request_download("b").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown())
            .await
            .expect("shutdown did not complete");
        assert!(!scheduler.is_applier_running());

        // A second shutdown is a no-op
        tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
            .await
            .expect("repeated shutdown did not complete");
    }

    #[tokio::test]
    async fn test_shutdown_notification_survives_busy_applier() {
        let (scheduler, _) = scheduler_with(SimulatedBackend::new());
        // No waiter is registered yet when the applier is mid-report; the
        // stored permit must still end the loop.
        scheduler.inner.shutdown_notify.notify_one();
        tokio::time::timeout(Duration::from_secs(1), async {
            while scheduler.is_applier_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("applier ignored stored shutdown permit");
    }
}
