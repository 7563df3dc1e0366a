//! Model lifecycle integration tests
//!
//! Drive the scheduler against the simulated backend and observe the
//! registry the way API clients do: by polling snapshots.

use std::sync::Arc;
use std::time::Duration;

use studio_runtime::config::SchedulerConfig;
use studio_runtime::scheduler::LoadingPhase;
use studio_runtime::{
    DownloadState, LifecycleScheduler, LoadState, ModelRegistry, RequestOutcome, SchedulerError,
    SimulatedBackend,
};

fn scheduler_with(backend: SimulatedBackend) -> (LifecycleScheduler, Arc<ModelRegistry>) {
    let registry = Arc::new(ModelRegistry::new());
    let scheduler = LifecycleScheduler::new(
        SchedulerConfig::default(),
        Arc::clone(&registry),
        Arc::new(backend),
    );
    (scheduler, registry)
}

async fn wait_for<F>(registry: &ModelRegistry, id: &str, predicate: F)
where
    F: Fn(&studio_runtime::ModelEntry) -> bool,
{
    for _ in 0..400 {
        if registry.get(id).as_ref().map_or(false, &predicate) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("model {} never reached the expected state: {:?}", id, registry.get(id));
}

#[tokio::test]
async fn test_download_then_load_reaches_ready() {
    let (scheduler, registry) =
        scheduler_with(SimulatedBackend::new().with_file_delay(Duration::from_millis(20)));

    let outcome = scheduler.request_download("m1").await.unwrap();
    assert_eq!(outcome, RequestOutcome::Started);
    assert_eq!(
        registry.get("m1").unwrap().download_state,
        DownloadState::Downloading
    );

    wait_for(&registry, "m1", |e| e.download_state == DownloadState::Downloaded).await;
    let downloaded = registry.get("m1").unwrap();
    assert_eq!(downloaded.progress.percent, 100);
    assert_eq!(downloaded.load_state, LoadState::Unloaded);
    assert!(!registry.ready("m1"));

    assert_eq!(
        scheduler.request_load("m1").await.unwrap(),
        RequestOutcome::Started
    );
    assert_eq!(registry.get("m1").unwrap().load_state, LoadState::Loading);
    assert!(!registry.ready("m1"));
    wait_for(&registry, "m1", |e| e.load_state == LoadState::Loaded).await;
    assert!(registry.ready("m1"));
    assert!(registry.handles("m1").is_some());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_load_without_download_or_cache_is_rejected() {
    let (scheduler, registry) = scheduler_with(SimulatedBackend::new());

    let err = scheduler.request_load("m2").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotAvailable(ref id) if id == "m2"));
    assert!(registry
        .get("m2")
        .map_or(true, |entry| entry.load_state == LoadState::Unloaded));
    assert!(!registry.ready("m2"));
}

#[tokio::test]
async fn test_repeated_requests_do_not_duplicate_work() {
    let backend = SimulatedBackend::new()
        .with_file_delay(Duration::from_millis(10))
        .into_shared();
    let registry = Arc::new(ModelRegistry::new());
    let scheduler = LifecycleScheduler::new(
        SchedulerConfig::default(),
        Arc::clone(&registry),
        backend.clone(),
    );

    assert_eq!(
        scheduler.request_download("m").await.unwrap(),
        RequestOutcome::Started
    );
    assert_eq!(
        scheduler.request_download("m").await.unwrap(),
        RequestOutcome::AlreadyInProgress
    );
    wait_for(&registry, "m", |e| e.download_state == DownloadState::Downloaded).await;
    assert_eq!(
        scheduler.request_download("m").await.unwrap(),
        RequestOutcome::AlreadyComplete
    );
    assert_eq!(backend.download_calls(), 1);

    scheduler.request_load("m").await.unwrap();
    wait_for(&registry, "m", |e| e.load_state == LoadState::Loaded).await;
    assert_eq!(
        scheduler.request_load("m").await.unwrap(),
        RequestOutcome::AlreadyComplete
    );
    assert_eq!(backend.load_calls(), 1);
}

#[tokio::test]
async fn test_progress_is_observable_mid_download() {
    let (scheduler, registry) =
        scheduler_with(SimulatedBackend::new().with_file_delay(Duration::from_millis(60)));

    scheduler.request_download("slow").await.unwrap();
    wait_for(&registry, "slow", |e| e.progress.percent > 0).await;
    let entry = registry.get("slow").unwrap();
    if entry.download_state == DownloadState::Downloading {
        assert!(entry.progress.percent < 100);
    }
    wait_for(&registry, "slow", |e| e.download_state == DownloadState::Downloaded).await;
}

#[tokio::test]
async fn test_evict_during_download_leaves_no_entry() {
    let (scheduler, registry) =
        scheduler_with(SimulatedBackend::new().with_file_delay(Duration::from_millis(30)));

    scheduler.request_download("gone").await.unwrap();
    assert!(scheduler.evict("gone").await.is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.get("gone").is_none());
    assert!(scheduler.evict("gone").await.is_none());
}

#[tokio::test]
async fn test_failed_load_is_reported_in_loading_table() {
    let (scheduler, registry) = scheduler_with(
        SimulatedBackend::new()
            .with_cached(vec!["broken".to_string()])
            .with_failing_load("broken"),
    );

    scheduler.request_load("broken").await.unwrap();
    wait_for(&registry, "broken", |e| e.load_state == LoadState::LoadFailed).await;

    let entry = registry.get("broken").unwrap();
    assert!(entry.error_message.is_some());

    // The side table is updated right after the registry
    let mut status = scheduler.loading_status().get("broken").unwrap();
    for _ in 0..100 {
        if status.status != LoadingPhase::Loading {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        status = scheduler.loading_status().get("broken").unwrap();
    }
    assert_eq!(status.status, LoadingPhase::Failed);
    assert!(status.message.is_some());
    assert!(status.finished_at.is_some());
}
