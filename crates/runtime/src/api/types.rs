//! HTTP API specific data structures
//!
//! Request bodies and response envelopes. Domain types that already carry
//! a schema (`ModelEntry`, `TaskDefinition`, `Settings`, ...) are returned
//! as-is.

#[cfg(feature = "http-api")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "http-api")]
use utoipa::{IntoParams, ToSchema};

#[cfg(feature = "http-api")]
use crate::admission::AdmissionError;

#[cfg(feature = "http-api")]
use crate::sandbox::ExecutionReport;

#[cfg(feature = "http-api")]
use crate::service::Classification;

/// Plain acknowledgement
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(feature = "http-api")]
impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health check response
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: String,
    /// System uptime in seconds
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Version information
    pub version: String,
}

/// Body of `POST /models/download` and `POST /models/load`
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelIdRequest {
    #[serde(default)]
    pub model_id: Option<String>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AvailableModelsQuery {
    /// Free-text search, defaults to "bert"
    pub search: Option<String>,
    /// Pipeline or topic tag
    pub tag: Option<String>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TextsRequest {
    pub texts: Vec<String>,
    /// Defaults to the configured default model
    #[serde(default)]
    pub model: Option<String>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassifyResponse {
    pub results: Vec<Classification>,
}

/// Single-input custom task
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomTaskRequest {
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
    pub input_text: String,
    pub model_id: String,
}

/// Batch custom task
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchCustomTaskRequest {
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
    pub input_texts: Vec<String>,
    pub model_id: String,
}

/// Exactly one of `result` and `error` is set
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomTaskResponse {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Text printed by the task
    pub logs: String,
    pub duration_ms: u64,
}

#[cfg(feature = "http-api")]
impl From<ExecutionReport> for CustomTaskResponse {
    fn from(report: ExecutionReport) -> Self {
        let (result, error) = report.single();
        Self {
            result,
            error,
            logs: report.logs,
            duration_ms: report.duration_ms,
        }
    }
}

/// `results` and `errors` are both as long as the input
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchCustomTaskResponse {
    pub results: Vec<serde_json::Value>,
    pub errors: Vec<Option<String>>,
    pub logs: String,
    pub duration_ms: u64,
}

#[cfg(feature = "http-api")]
impl BatchCustomTaskResponse {
    pub fn from_report(report: ExecutionReport, count: usize) -> Self {
        let (results, errors) = report.batch(count);
        Self {
            results,
            errors,
            logs: report.logs,
            duration_ms: report.duration_ms,
        }
    }
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateRequest {
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateResponse {
    pub valid: bool,
    pub violations: Vec<AdmissionError>,
}

/// Input for running a saved task; which field is required follows the
/// task's `batch_mode`
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RunTaskRequest {
    #[serde(default)]
    pub input_text: Option<String>,
    #[serde(default)]
    pub input_texts: Option<Vec<String>>,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum RunTaskResponse {
    Single(CustomTaskResponse),
    Batch(BatchCustomTaskResponse),
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct TaskSearchQuery {
    /// Matched against name, description and tags
    pub q: String,
}

#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImportTasksResponse {
    pub imported: usize,
    pub ids: Vec<String>,
}

/// Error response structure
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
    /// Optional details
    pub details: Option<serde_json::Value>,
}
