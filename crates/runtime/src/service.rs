//! Process-scoped studio state
//!
//! [`StudioRuntime`] is created once at startup and owns the registry, the
//! lifecycle scheduler, the sandbox executor, the task store and the small
//! settings/stats stores. Request handlers receive it by injection; nothing
//! here is a global.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::admission::{self, AdmissionRejection};
use crate::backend::{self, mean_pool, softmax, ModelBackend};
use crate::config::Config;
use crate::registry::ModelRegistry;
use crate::sandbox::{ExecutionReport, ExecutionRequest, SandboxExecutor, TaskInput};
use crate::scheduler::{LifecycleScheduler, LoadingStatus};
use crate::tasks::{InMemoryTaskStore, TaskDefinition, TaskDraft, TaskStats, TaskStore};
use crate::types::{
    DownloadState, ModelEntry, ModelSummary, SandboxError, StudioError,
};

/// Longest text accepted by the built-in operations
const MAX_BUILTIN_TOKENS: usize = 512;

/// Row of `GET /models/downloaded`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct DownloadedModelInfo {
    /// `downloading`, `completed` or `failed`
    pub status: String,
    /// Size in MB
    pub size: u64,
    /// `%Y-%m-%d %H:%M`
    pub timestamp: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadedModelInfo {
    fn from_entry(entry: &ModelEntry) -> Self {
        let status = match entry.download_state {
            DownloadState::Downloading => "downloading",
            DownloadState::Downloaded => "completed",
            DownloadState::DownloadFailed => "failed",
            DownloadState::Absent => "absent",
        };
        let stamp = entry.downloaded_at.unwrap_or(entry.last_updated);
        Self {
            status: status.to_string(),
            size: entry.size_mb(),
            timestamp: stamp.format("%Y-%m-%d %H:%M").to_string(),
            progress: entry.progress.percent,
            error: entry.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct NotificationSettings {
    pub download_complete: bool,
    pub on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct SecuritySettings {
    pub verify_checksums: bool,
    pub sandbox_mode: bool,
}

/// User-editable settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct Settings {
    pub hf_token: Option<String>,
    pub server_url: String,
    pub model_cache_dir: String,
    pub notifications: NotificationSettings,
    pub security: SecuritySettings,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            hf_token: None,
            server_url: format!("http://{}:{}", config.api.host, config.api.port)
                .replace("127.0.0.1", "localhost"),
            model_cache_dir: config.models.cache_dir.display().to_string(),
            notifications: NotificationSettings {
                download_complete: true,
                on_error: true,
            },
            security: SecuritySettings {
                verify_checksums: true,
                sandbox_mode: false,
            },
        }
    }

    /// Apply the known top-level keys of `update`; other keys are ignored
    fn apply(&mut self, update: &serde_json::Map<String, JsonValue>) -> Result<(), StudioError> {
        fn parse<T: serde::de::DeserializeOwned>(key: &str, value: &JsonValue) -> Result<T, StudioError> {
            serde_json::from_value(value.clone())
                .map_err(|e| StudioError::InvalidRequest(format!("Invalid value for {}: {}", key, e)))
        }

        // Parse everything before touching state so a bad key changes nothing
        let mut next = self.clone();
        for (key, value) in update {
            match key.as_str() {
                "hf_token" => next.hf_token = parse(key, value)?,
                "server_url" => next.server_url = parse(key, value)?,
                "model_cache_dir" => next.model_cache_dir = parse(key, value)?,
                "notifications" => next.notifications = parse(key, value)?,
                "security" => next.security = parse(key, value)?,
                other => tracing::debug!(key = other, "Ignoring unknown settings key"),
            }
        }
        *self = next;
        Ok(())
    }
}

/// Dashboard counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct StudioStats {
    pub loaded_models: usize,
    pub available_models: String,
    pub embeddings_generated: u64,
    pub playground_sessions: u64,
}

/// Top label of one classified text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct Classification {
    pub label: String,
    pub score: f32,
    /// Probability of every label
    pub scores: BTreeMap<String, f32>,
}

pub struct StudioRuntime {
    config: Config,
    registry: Arc<ModelRegistry>,
    scheduler: LifecycleScheduler,
    executor: SandboxExecutor,
    tasks: Arc<dyn TaskStore>,
    settings: RwLock<Settings>,
    embeddings_generated: AtomicU64,
    playground_sessions: AtomicU64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

impl StudioRuntime {
    /// Build every component from configuration. Must be called from within
    /// a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, StudioError> {
        let backend = backend::from_config(&config.models)?;
        let tasks = Arc::new(InMemoryTaskStore::new(config.tasks.max_tasks));
        Ok(Self::with_components(config, backend, tasks))
    }

    pub fn with_components(
        config: Config,
        backend: Arc<dyn ModelBackend>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let scheduler =
            LifecycleScheduler::new(config.scheduler.clone(), Arc::clone(&registry), backend);
        let executor = SandboxExecutor::new(config.sandbox.clone(), Arc::clone(&registry));

        tracing::info!(
            max_workers = config.scheduler.max_workers,
            sandbox_timeout = ?config.sandbox.timeout,
            "Studio runtime initialized"
        );

        Self {
            settings: RwLock::new(Settings::from_config(&config)),
            config,
            registry,
            scheduler,
            executor,
            tasks,
            embeddings_generated: AtomicU64::new(0),
            playground_sessions: AtomicU64::new(0),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &LifecycleScheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    // Models

    pub async fn request_download(&self, model_id: &str) -> Result<String, StudioError> {
        let outcome = self.scheduler.request_download(model_id).await?;
        Ok(outcome.download_message(model_id.trim()))
    }

    pub async fn request_load(&self, model_id: &str) -> Result<String, StudioError> {
        let outcome = self.scheduler.request_load(model_id).await?;
        Ok(outcome.load_message(model_id.trim()))
    }

    pub fn downloaded_models(&self) -> BTreeMap<String, DownloadedModelInfo> {
        self.registry
            .downloaded()
            .iter()
            .map(|entry| (entry.id.clone(), DownloadedModelInfo::from_entry(entry)))
            .collect()
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.registry.loaded_ids()
    }

    pub fn loading_models(&self) -> Vec<LoadingStatus> {
        self.scheduler.loading_status().snapshot()
    }

    pub fn model_status(&self, model_id: &str) -> Result<ModelEntry, StudioError> {
        self.registry
            .get(model_id)
            .ok_or_else(|| StudioError::NotFound("Model not found".to_string()))
    }

    pub async fn delete_model(&self, model_id: &str) -> Result<String, StudioError> {
        match self.scheduler.evict(model_id).await {
            Some(_) => Ok(format!("Deleted {}", model_id)),
            None => Err(StudioError::NotFound("Model not found".to_string())),
        }
    }

    pub async fn available_models(
        &self,
        search: Option<&str>,
        tag: Option<&str>,
    ) -> Vec<ModelSummary> {
        let search = search.filter(|s| !s.trim().is_empty());
        let tag = tag.filter(|t| !t.trim().is_empty());
        self.scheduler.backend().search(search, tag).await
    }

    // Built-in operations

    fn resolve_model(&self, model: Option<&str>) -> String {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.models.default_model)
            .to_string()
    }

    fn require_texts(texts: &[String]) -> Result<(), StudioError> {
        if texts.is_empty() {
            return Err(StudioError::InvalidRequest(
                "texts must contain at least one entry".to_string(),
            ));
        }
        Ok(())
    }

    /// Attention-mask mean pooled embedding per text
    pub async fn embed(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, StudioError> {
        Self::require_texts(texts)?;
        let model_id = self.resolve_model(model);
        let handles = self
            .registry
            .handles(&model_id)
            .ok_or(SandboxError::ModelNotReady(model_id.clone()))?;
        let _guard = self.executor.lock_model(&model_id).await;

        let embeddings: Vec<Vec<f32>> = texts
            .iter()
            .map(|text| {
                let encoding = handles.tokenizer.encode(text, MAX_BUILTIN_TOKENS);
                let output = handles
                    .model
                    .forward(&encoding.input_ids, &encoding.attention_mask);
                mean_pool(&output.last_hidden_state, &encoding.attention_mask)
            })
            .collect();

        self.embeddings_generated
            .fetch_add(texts.len() as u64, Ordering::Relaxed);
        tracing::debug!(model_id = %model_id, count = texts.len(), "Embeddings generated");
        Ok(embeddings)
    }

    /// Softmax over the classification head per text
    pub async fn classify(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<Classification>, StudioError> {
        Self::require_texts(texts)?;
        let model_id = self.resolve_model(model);
        let handles = self
            .registry
            .handles(&model_id)
            .ok_or(SandboxError::ModelNotReady(model_id.clone()))?;
        let _guard = self.executor.lock_model(&model_id).await;
        let labels = handles.model.labels();

        Ok(texts
            .iter()
            .map(|text| {
                let encoding = handles.tokenizer.encode(text, MAX_BUILTIN_TOKENS);
                let output = handles
                    .model
                    .forward(&encoding.input_ids, &encoding.attention_mask);
                let probabilities = softmax(&output.logits);

                let mut best = 0;
                for (index, p) in probabilities.iter().enumerate() {
                    if *p > probabilities[best] {
                        best = index;
                    }
                }
                let label_of = |index: usize| {
                    labels
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| format!("LABEL_{}", index))
                };
                Classification {
                    label: label_of(best),
                    score: probabilities.get(best).copied().unwrap_or_default(),
                    scores: probabilities
                        .iter()
                        .enumerate()
                        .map(|(index, p)| (label_of(index), *p))
                        .collect(),
                }
            })
            .collect())
    }

    // Custom tasks

    /// Run admission only
    pub fn validate_task(
        &self,
        tokenizer_code: &str,
        model_code: &str,
        function_code: &str,
    ) -> Result<(), AdmissionRejection> {
        admission::check_all(tokenizer_code, model_code, function_code)
    }

    pub async fn run_custom_task(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionReport, StudioError> {
        if request.model_id.trim().is_empty() {
            return Err(StudioError::InvalidRequest(
                "model_id must be a non-empty string".to_string(),
            ));
        }
        if request.input.is_batch() && request.input.is_empty() {
            return Err(StudioError::InvalidRequest(
                "input_texts must contain at least one entry".to_string(),
            ));
        }

        let report = self.executor.execute(request).await?;
        self.playground_sessions.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    /// Run a saved task; its `batch_mode` decides which input is required
    pub async fn run_saved_task(
        &self,
        task_id: &str,
        input_text: Option<String>,
        input_texts: Option<Vec<String>>,
    ) -> Result<(TaskDefinition, ExecutionReport), StudioError> {
        let task = self.tasks.get(task_id).await?;
        let input = match (task.batch_mode, input_text, input_texts) {
            (true, _, Some(texts)) => TaskInput::Batch(texts),
            (false, Some(text), _) => TaskInput::Single(text),
            (true, _, None) => {
                return Err(StudioError::InvalidRequest(
                    "input_texts is required for a batch task".to_string(),
                ))
            }
            (false, None, _) => {
                return Err(StudioError::InvalidRequest(
                    "input_text is required".to_string(),
                ))
            }
        };

        let report = self
            .run_custom_task(ExecutionRequest {
                tokenizer_code: task.tokenizer_code.clone(),
                model_code: task.model_code.clone(),
                function_code: task.function_code.clone(),
                model_id: task.model_id.clone(),
                input,
            })
            .await?;
        Ok((task, report))
    }

    // Saved task store

    pub async fn create_task(&self, draft: TaskDraft) -> Result<TaskDefinition, StudioError> {
        Ok(self.tasks.create(draft).await?)
    }

    pub async fn get_task(&self, id: &str) -> Result<TaskDefinition, StudioError> {
        Ok(self.tasks.get(id).await?)
    }

    pub async fn list_tasks(&self) -> Vec<TaskDefinition> {
        self.tasks.list().await
    }

    pub async fn update_task(&self, id: &str, draft: TaskDraft) -> Result<TaskDefinition, StudioError> {
        Ok(self.tasks.update(id, draft).await?)
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), StudioError> {
        Ok(self.tasks.delete(id).await?)
    }

    pub async fn search_tasks(&self, query: &str) -> Vec<TaskDefinition> {
        self.tasks.search(query).await
    }

    pub async fn tasks_for_model(&self, model_id: &str) -> Vec<TaskDefinition> {
        self.tasks.by_model(model_id).await
    }

    pub async fn export_tasks(&self) -> Vec<TaskDraft> {
        self.tasks.export().await
    }

    pub async fn task_stats(&self) -> TaskStats {
        self.tasks.stats().await
    }

    pub async fn import_tasks(&self, drafts: Vec<TaskDraft>) -> Result<Vec<String>, StudioError> {
        Ok(self.tasks.import(drafts).await?)
    }

    // Settings and stats

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn update_settings(&self, update: &serde_json::Map<String, JsonValue>) -> Result<(), StudioError> {
        self.settings.write().apply(update)?;
        tracing::info!("Settings updated");
        Ok(())
    }

    pub fn stats(&self) -> StudioStats {
        StudioStats {
            loaded_models: self.registry.loaded_ids().len(),
            available_models: "1000+".to_string(),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            playground_sessions: self.playground_sessions.load(Ordering::Relaxed),
        }
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(feature = "http-api")]
#[async_trait::async_trait]
impl crate::api::traits::StudioApiProvider for StudioRuntime {
    fn uptime_seconds(&self) -> u64 {
        StudioRuntime::uptime_seconds(self)
    }

    fn stats(&self) -> StudioStats {
        StudioRuntime::stats(self)
    }

    fn settings(&self) -> Settings {
        StudioRuntime::settings(self)
    }

    fn update_settings(
        &self,
        update: serde_json::Map<String, JsonValue>,
    ) -> Result<(), StudioError> {
        StudioRuntime::update_settings(self, &update)
    }

    async fn available_models(
        &self,
        search: Option<String>,
        tag: Option<String>,
    ) -> Vec<ModelSummary> {
        StudioRuntime::available_models(self, search.as_deref(), tag.as_deref()).await
    }

    async fn request_download(&self, model_id: &str) -> Result<String, StudioError> {
        StudioRuntime::request_download(self, model_id).await
    }

    async fn request_load(&self, model_id: &str) -> Result<String, StudioError> {
        StudioRuntime::request_load(self, model_id).await
    }

    fn downloaded_models(&self) -> BTreeMap<String, DownloadedModelInfo> {
        StudioRuntime::downloaded_models(self)
    }

    fn loaded_models(&self) -> Vec<String> {
        StudioRuntime::loaded_models(self)
    }

    fn loading_models(&self) -> Vec<LoadingStatus> {
        StudioRuntime::loading_models(self)
    }

    fn model_status(&self, model_id: &str) -> Result<ModelEntry, StudioError> {
        StudioRuntime::model_status(self, model_id)
    }

    async fn delete_model(&self, model_id: &str) -> Result<String, StudioError> {
        StudioRuntime::delete_model(self, model_id).await
    }

    async fn embed(
        &self,
        texts: Vec<String>,
        model: Option<String>,
    ) -> Result<Vec<Vec<f32>>, StudioError> {
        StudioRuntime::embed(self, &texts, model.as_deref()).await
    }

    async fn classify(
        &self,
        texts: Vec<String>,
        model: Option<String>,
    ) -> Result<Vec<Classification>, StudioError> {
        StudioRuntime::classify(self, &texts, model.as_deref()).await
    }

    fn validate_task(
        &self,
        tokenizer_code: &str,
        model_code: &str,
        function_code: &str,
    ) -> Result<(), AdmissionRejection> {
        StudioRuntime::validate_task(self, tokenizer_code, model_code, function_code)
    }

    async fn run_custom_task(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionReport, StudioError> {
        StudioRuntime::run_custom_task(self, request).await
    }

    async fn run_saved_task(
        &self,
        task_id: &str,
        input_text: Option<String>,
        input_texts: Option<Vec<String>>,
    ) -> Result<(TaskDefinition, ExecutionReport), StudioError> {
        StudioRuntime::run_saved_task(self, task_id, input_text, input_texts).await
    }

    async fn create_task(&self, draft: TaskDraft) -> Result<TaskDefinition, StudioError> {
        StudioRuntime::create_task(self, draft).await
    }

    async fn get_task(&self, id: &str) -> Result<TaskDefinition, StudioError> {
        StudioRuntime::get_task(self, id).await
    }

    async fn list_tasks(&self) -> Vec<TaskDefinition> {
        StudioRuntime::list_tasks(self).await
    }

    async fn update_task(&self, id: &str, draft: TaskDraft) -> Result<TaskDefinition, StudioError> {
        StudioRuntime::update_task(self, id, draft).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), StudioError> {
        StudioRuntime::delete_task(self, id).await
    }

    async fn search_tasks(&self, query: &str) -> Vec<TaskDefinition> {
        StudioRuntime::search_tasks(self, query).await
    }

    async fn tasks_for_model(&self, model_id: &str) -> Vec<TaskDefinition> {
        StudioRuntime::tasks_for_model(self, model_id).await
    }

    async fn export_tasks(&self) -> Vec<TaskDraft> {
        StudioRuntime::export_tasks(self).await
    }

    async fn task_stats(&self) -> TaskStats {
        StudioRuntime::task_stats(self).await
    }

    async fn import_tasks(&self, drafts: Vec<TaskDraft>) -> Result<Vec<String>, StudioError> {
        StudioRuntime::import_tasks(self, drafts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use std::time::Duration;

    fn runtime() -> StudioRuntime {
        let backend = Arc::new(
            SimulatedBackend::new()
                .with_file_delay(Duration::from_millis(1))
                .with_cached(vec!["bert-base-uncased".to_string()]),
        );
        StudioRuntime::with_components(
            Config::default(),
            backend,
            Arc::new(InMemoryTaskStore::default()),
        )
    }

    async fn load(runtime: &StudioRuntime, id: &str) {
        runtime.request_load(id).await.unwrap();
        for _ in 0..200 {
            if runtime.registry().ready(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never became ready", id);
    }

    #[test]
    fn test_settings_only_known_keys() {
        let mut settings = Settings::from_config(&Config::default());
        assert_eq!(settings.server_url, "http://localhost:8000");

        let update = serde_json::json!({
            "server_url": "http://studio:9000",
            "security": {"verify_checksums": false, "sandbox_mode": true},
            "unknown": 1
        });
        settings.apply(update.as_object().unwrap()).unwrap();
        assert_eq!(settings.server_url, "http://studio:9000");
        assert!(settings.security.sandbox_mode);

        let bad = serde_json::json!({"server_url": "ok", "notifications": "yes"});
        assert!(settings.apply(bad.as_object().unwrap()).is_err());
        assert_eq!(settings.server_url, "http://studio:9000");
    }

    #[tokio::test]
    async fn test_embed_requires_ready_model() {
        let runtime = runtime();
        let err = runtime.embed(&["hello".to_string()], None).await.unwrap_err();
        assert!(matches!(err, StudioError::Sandbox(SandboxError::ModelNotReady(_))));

        load(&runtime, "bert-base-uncased").await;
        let embeddings = runtime
            .embed(&["hello world".to_string(), "hi".to_string()], None)
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 32);
        assert_eq!(runtime.stats().embeddings_generated, 2);
        assert_eq!(runtime.stats().loaded_models, 1);
    }

    #[tokio::test]
    async fn test_classify_scores_sum_to_one() {
        let runtime = runtime();
        load(&runtime, "bert-base-uncased").await;
        let results = runtime
            .classify(&["what a film".to_string()], Some("bert-base-uncased"))
            .await
            .unwrap();
        let total: f32 = results[0].scores.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(results[0].scores[&results[0].label], results[0].score);
    }

    #[tokio::test]
    async fn test_embed_waits_for_model_lock() {
        let runtime = runtime();
        load(&runtime, "bert-base-uncased").await;

        let guard = runtime.executor().lock_model("bert-base-uncased").await;
        let texts = vec!["held".to_string()];
        let pending = runtime.embed(&texts, Some("bert-base-uncased"));
        tokio::pin!(pending);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut pending)
                .await
                .is_err()
        );

        drop(guard);
        let embeddings = pending.await.unwrap();
        assert_eq!(embeddings.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_model() {
        let runtime = runtime();
        let err = runtime.delete_model("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Model not found");
    }

    #[tokio::test]
    async fn test_downloaded_listing_format() {
        let runtime = runtime();
        runtime.request_download("m").await.unwrap();
        let listing = runtime.downloaded_models();
        let info = &listing["m"];
        assert!(info.status == "downloading" || info.status == "completed");
        assert_eq!(info.timestamp.len(), "2024-01-01 12:00".len());
    }

    #[tokio::test]
    async fn test_saved_task_requires_matching_input() {
        let runtime = runtime();
        let task = runtime
            .create_task(TaskDraft {
                name: "Echo".to_string(),
                description: String::new(),
                model_id: "bert-base-uncased".to_string(),
                tokenizer_code: "tokenizer = 1".to_string(),
                model_code: "model = 1".to_string(),
                function_code: "def custom_function(texts) { return texts }".to_string(),
                tags: None,
                batch_mode: true,
            })
            .await
            .unwrap();

        let err = runtime
            .run_saved_task(&task.id, Some("x".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::InvalidRequest(_)));

        load(&runtime, "bert-base-uncased").await;
        let (_, report) = runtime
            .run_saved_task(&task.id, None, Some(vec!["a".to_string(), "b".to_string()]))
            .await
            .unwrap();
        assert_eq!(report.output.unwrap(), serde_json::json!(["a", "b"]));
        assert_eq!(runtime.stats().playground_sessions, 1);
    }
}
