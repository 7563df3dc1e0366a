//! API abstraction traits for the HTTP API
//!
//! Handlers only see [`StudioApiProvider`]; the runtime implements it, and
//! tests can substitute their own.

#[cfg(feature = "http-api")]
use async_trait::async_trait;

#[cfg(feature = "http-api")]
use std::collections::BTreeMap;

#[cfg(feature = "http-api")]
use crate::admission::AdmissionRejection;

#[cfg(feature = "http-api")]
use crate::sandbox::{ExecutionReport, ExecutionRequest};

#[cfg(feature = "http-api")]
use crate::scheduler::LoadingStatus;

#[cfg(feature = "http-api")]
use crate::service::{Classification, DownloadedModelInfo, Settings, StudioStats};

#[cfg(feature = "http-api")]
use crate::tasks::{TaskDefinition, TaskDraft, TaskStats};

#[cfg(feature = "http-api")]
use crate::types::{ModelEntry, ModelSummary, StudioError};

/// Trait providing API access to the studio runtime
#[cfg(feature = "http-api")]
#[async_trait]
pub trait StudioApiProvider: Send + Sync {
    /// Seconds since startup
    fn uptime_seconds(&self) -> u64;

    fn stats(&self) -> StudioStats;

    fn settings(&self) -> Settings;

    fn update_settings(
        &self,
        update: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StudioError>;

    // Models

    async fn available_models(&self, search: Option<String>, tag: Option<String>)
        -> Vec<ModelSummary>;

    /// Returns the human-readable outcome message
    async fn request_download(&self, model_id: &str) -> Result<String, StudioError>;

    async fn request_load(&self, model_id: &str) -> Result<String, StudioError>;

    fn downloaded_models(&self) -> BTreeMap<String, DownloadedModelInfo>;

    fn loaded_models(&self) -> Vec<String>;

    fn loading_models(&self) -> Vec<LoadingStatus>;

    fn model_status(&self, model_id: &str) -> Result<ModelEntry, StudioError>;

    async fn delete_model(&self, model_id: &str) -> Result<String, StudioError>;

    // Built-in operations

    async fn embed(&self, texts: Vec<String>, model: Option<String>)
        -> Result<Vec<Vec<f32>>, StudioError>;

    async fn classify(
        &self,
        texts: Vec<String>,
        model: Option<String>,
    ) -> Result<Vec<Classification>, StudioError>;

    // Custom tasks

    fn validate_task(
        &self,
        tokenizer_code: &str,
        model_code: &str,
        function_code: &str,
    ) -> Result<(), AdmissionRejection>;

    async fn run_custom_task(&self, request: ExecutionRequest)
        -> Result<ExecutionReport, StudioError>;

    async fn run_saved_task(
        &self,
        task_id: &str,
        input_text: Option<String>,
        input_texts: Option<Vec<String>>,
    ) -> Result<(TaskDefinition, ExecutionReport), StudioError>;

    // Saved tasks

    async fn create_task(&self, draft: TaskDraft) -> Result<TaskDefinition, StudioError>;

    async fn get_task(&self, id: &str) -> Result<TaskDefinition, StudioError>;

    async fn list_tasks(&self) -> Vec<TaskDefinition>;

    async fn update_task(&self, id: &str, draft: TaskDraft)
        -> Result<TaskDefinition, StudioError>;

    async fn delete_task(&self, id: &str) -> Result<(), StudioError>;

    async fn search_tasks(&self, query: &str) -> Vec<TaskDefinition>;

    async fn tasks_for_model(&self, model_id: &str) -> Vec<TaskDefinition>;

    async fn export_tasks(&self) -> Vec<TaskDraft>;

    async fn task_stats(&self) -> TaskStats;

    async fn import_tasks(&self, drafts: Vec<TaskDraft>) -> Result<Vec<String>, StudioError>;
}
