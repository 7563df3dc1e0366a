//! HTTP API route handlers
//!
//! Every handler takes the provider from router state and maps
//! [`StudioError`] onto an [`ErrorResponse`] with a stable code. Failures of
//! user-submitted task code are not errors here; they travel inside the
//! response envelope with a 200.

#[cfg(feature = "http-api")]
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

#[cfg(feature = "http-api")]
use std::collections::BTreeMap;

#[cfg(feature = "http-api")]
use std::sync::Arc;

#[cfg(feature = "http-api")]
use super::traits::StudioApiProvider;

#[cfg(feature = "http-api")]
use super::types::{
    AvailableModelsQuery, BatchCustomTaskRequest, BatchCustomTaskResponse, ClassifyResponse,
    CustomTaskRequest, CustomTaskResponse, EmbedResponse, ErrorResponse, HealthResponse,
    ImportTasksResponse, MessageResponse, ModelIdRequest, RunTaskRequest, RunTaskResponse,
    TaskSearchQuery, TextsRequest, ValidateRequest, ValidateResponse,
};

#[cfg(feature = "http-api")]
use crate::sandbox::{ExecutionRequest, TaskInput};

#[cfg(feature = "http-api")]
use crate::scheduler::LoadingStatus;

#[cfg(feature = "http-api")]
use crate::service::{DownloadedModelInfo, Settings, StudioStats};

#[cfg(feature = "http-api")]
use crate::tasks::{TaskDefinition, TaskDraft, TaskStats};

#[cfg(feature = "http-api")]
use crate::types::{
    ModelEntry, ModelSummary, RegistryError, SandboxError, SchedulerError, StudioError,
    TaskStoreError,
};

#[cfg(feature = "http-api")]
pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[cfg(feature = "http-api")]
type Provider = State<Arc<dyn StudioApiProvider>>;

#[cfg(feature = "http-api")]
fn error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
            details: None,
        }),
    )
}

/// Map a runtime error onto its HTTP status and error code
#[cfg(feature = "http-api")]
pub fn error_response(err: StudioError) -> ApiError {
    let (status, code) = match &err {
        StudioError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        StudioError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StudioError::Admission(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: err.to_string(),
                    code: "ADMISSION_REJECTED".to_string(),
                    details: serde_json::to_value(rejection).ok(),
                }),
            )
        }
        StudioError::Scheduler(scheduler) => match scheduler {
            SchedulerError::EmptyModelId => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            SchedulerError::NotAvailable(_) => (StatusCode::BAD_REQUEST, "MODEL_NOT_AVAILABLE"),
            SchedulerError::Conflict { .. } => (StatusCode::CONFLICT, "MODEL_BUSY"),
            SchedulerError::ShuttingDown => (StatusCode::INTERNAL_SERVER_ERROR, "SHUTTING_DOWN"),
            SchedulerError::Registry(_) | SchedulerError::Backend(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SCHEDULER_ERROR")
            }
        },
        StudioError::Sandbox(SandboxError::ModelNotReady(_)) => {
            (StatusCode::BAD_REQUEST, "MODEL_NOT_READY")
        }
        StudioError::Sandbox(SandboxError::WorkerFailed(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "SANDBOX_FAILED")
        }
        StudioError::TaskStore(TaskStoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
        }
        StudioError::TaskStore(TaskStoreError::Invalid(_)) => {
            (StatusCode::BAD_REQUEST, "INVALID_TASK")
        }
        StudioError::Registry(RegistryError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StudioError::Registry(_)
        | StudioError::Backend(_)
        | StudioError::Configuration(_)
        | StudioError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if status.is_server_error() {
        tracing::error!(code, error = %err, "Request failed");
    }

    let message = match err {
        StudioError::InvalidRequest(message) | StudioError::NotFound(message) => message,
        StudioError::Scheduler(SchedulerError::EmptyModelId) => {
            SchedulerError::EmptyModelId.to_string()
        }
        other => other.to_string(),
    };
    error(status, code, message)
}

// Service

/// Liveness message
#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is running", body = MessageResponse)),
    tag = "service"
)]
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new("Backend is running!"))
}

/// Health check endpoint handler
#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "service"
)]
pub async fn health_check(State(provider): Provider) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: provider.uptime_seconds(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Dashboard counters", body = StudioStats)),
    tag = "service"
)]
pub async fn get_stats(State(provider): Provider) -> Json<StudioStats> {
    Json(provider.stats())
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/settings",
    responses((status = 200, description = "Current settings", body = Settings)),
    tag = "service"
)]
pub async fn get_settings(State(provider): Provider) -> Json<Settings> {
    Json(provider.settings())
}

/// Update the known settings keys; unknown keys are ignored
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/settings",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Settings updated", body = MessageResponse),
        (status = 400, description = "A known key has the wrong shape", body = ErrorResponse)
    ),
    tag = "service"
)]
pub async fn update_settings(
    State(provider): Provider,
    Json(update): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<MessageResponse>, ApiError> {
    provider.update_settings(update).map_err(error_response)?;
    Ok(Json(MessageResponse::new("Settings updated")))
}

// Models

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/models/available",
    params(AvailableModelsQuery),
    responses((status = 200, description = "Catalogue entries", body = [ModelSummary])),
    tag = "models"
)]
pub async fn available_models(
    State(provider): Provider,
    Query(query): Query<AvailableModelsQuery>,
) -> Json<Vec<ModelSummary>> {
    Json(provider.available_models(query.search, query.tag).await)
}

#[cfg(feature = "http-api")]
fn required_model_id(request: ModelIdRequest) -> Result<String, ApiError> {
    match request.model_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(error_response(SchedulerError::EmptyModelId.into())),
    }
}

/// Start downloading a model; repeats while in progress or complete are no-ops
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/models/download",
    request_body = ModelIdRequest,
    responses(
        (status = 200, description = "Download started or already present", body = MessageResponse),
        (status = 400, description = "Missing model id", body = ErrorResponse)
    ),
    tag = "models"
)]
pub async fn download_model(
    State(provider): Provider,
    Json(request): Json<ModelIdRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let model_id = required_model_id(request)?;
    let message = provider
        .request_download(&model_id)
        .await
        .map_err(error_response)?;
    Ok(Json(MessageResponse::new(message)))
}

/// Load a downloaded or cached model into memory
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/models/load",
    request_body = ModelIdRequest,
    responses(
        (status = 200, description = "Load started or already loaded", body = MessageResponse),
        (status = 400, description = "Model neither downloaded nor cached", body = ErrorResponse),
        (status = 409, description = "Model is still downloading", body = ErrorResponse)
    ),
    tag = "models"
)]
pub async fn load_model(
    State(provider): Provider,
    Json(request): Json<ModelIdRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let model_id = required_model_id(request)?;
    let message = provider
        .request_load(&model_id)
        .await
        .map_err(error_response)?;
    Ok(Json(MessageResponse::new(message)))
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/models/downloaded",
    responses((status = 200, description = "Downloads keyed by model id", body = serde_json::Value)),
    tag = "models"
)]
pub async fn downloaded_models(
    State(provider): Provider,
) -> Json<BTreeMap<String, DownloadedModelInfo>> {
    Json(provider.downloaded_models())
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    delete,
    path = "/models/downloaded/{model_id}",
    params(("model_id" = String, Path, description = "Model identifier")),
    responses(
        (status = 200, description = "Model removed", body = MessageResponse),
        (status = 404, description = "Model not found", body = ErrorResponse)
    ),
    tag = "models"
)]
pub async fn delete_model(
    State(provider): Provider,
    Path(model_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = provider
        .delete_model(model_id.trim_start_matches('/'))
        .await
        .map_err(error_response)?;
    Ok(Json(MessageResponse::new(message)))
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/models/loaded",
    responses((status = 200, description = "Ids of ready models", body = [String])),
    tag = "models"
)]
pub async fn loaded_models(State(provider): Provider) -> Json<Vec<String>> {
    Json(provider.loaded_models())
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/models/loading",
    responses((status = 200, description = "Recent load requests", body = [LoadingStatus])),
    tag = "models"
)]
pub async fn loading_models(State(provider): Provider) -> Json<Vec<LoadingStatus>> {
    Json(provider.loading_models())
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/models/status/{model_id}",
    params(("model_id" = String, Path, description = "Model identifier")),
    responses(
        (status = 200, description = "Registry entry", body = ModelEntry),
        (status = 404, description = "Model not found", body = ErrorResponse)
    ),
    tag = "models"
)]
pub async fn model_status(
    State(provider): Provider,
    Path(model_id): Path<String>,
) -> Result<Json<ModelEntry>, ApiError> {
    provider
        .model_status(model_id.trim_start_matches('/'))
        .map(Json)
        .map_err(error_response)
}

// Built-in operations

#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/embed",
    request_body = TextsRequest,
    responses(
        (status = 200, description = "One embedding per text", body = EmbedResponse),
        (status = 400, description = "Model not ready", body = ErrorResponse)
    ),
    tag = "inference"
)]
pub async fn embed(
    State(provider): Provider,
    Json(request): Json<TextsRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let embeddings = provider
        .embed(request.texts, request.model)
        .await
        .map_err(error_response)?;
    Ok(Json(EmbedResponse { embeddings }))
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/classify",
    request_body = TextsRequest,
    responses(
        (status = 200, description = "Top label per text", body = ClassifyResponse),
        (status = 400, description = "Model not ready", body = ErrorResponse)
    ),
    tag = "inference"
)]
pub async fn classify(
    State(provider): Provider,
    Json(request): Json<TextsRequest>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let results = provider
        .classify(request.texts, request.model)
        .await
        .map_err(error_response)?;
    Ok(Json(ClassifyResponse { results }))
}

// Custom tasks

/// Run one input through user-supplied code
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-task",
    request_body = CustomTaskRequest,
    responses(
        (status = 200, description = "Result or inline task error", body = CustomTaskResponse),
        (status = 400, description = "Admission rejected or model not ready", body = ErrorResponse)
    ),
    tag = "custom-tasks"
)]
pub async fn run_custom_task(
    State(provider): Provider,
    Json(request): Json<CustomTaskRequest>,
) -> Result<Json<CustomTaskResponse>, ApiError> {
    let report = provider
        .run_custom_task(ExecutionRequest {
            tokenizer_code: request.tokenizer_code,
            model_code: request.model_code,
            function_code: request.function_code,
            model_id: request.model_id,
            input: TaskInput::Single(request.input_text),
        })
        .await
        .map_err(error_response)?;
    Ok(Json(report.into()))
}

/// Run a list of inputs through one invocation; one failure fails them all
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-task/batch",
    request_body = BatchCustomTaskRequest,
    responses(
        (status = 200, description = "Results or inline task errors", body = BatchCustomTaskResponse),
        (status = 400, description = "Admission rejected or model not ready", body = ErrorResponse)
    ),
    tag = "custom-tasks"
)]
pub async fn run_custom_task_batch(
    State(provider): Provider,
    Json(request): Json<BatchCustomTaskRequest>,
) -> Result<Json<BatchCustomTaskResponse>, ApiError> {
    let count = request.input_texts.len();
    let report = provider
        .run_custom_task(ExecutionRequest {
            tokenizer_code: request.tokenizer_code,
            model_code: request.model_code,
            function_code: request.function_code,
            model_id: request.model_id,
            input: TaskInput::Batch(request.input_texts),
        })
        .await
        .map_err(error_response)?;
    Ok(Json(BatchCustomTaskResponse::from_report(report, count)))
}

/// Admission only; nothing is executed
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-task/validate",
    request_body = ValidateRequest,
    responses((status = 200, description = "Admission verdict", body = ValidateResponse)),
    tag = "custom-tasks"
)]
pub async fn validate_custom_task(
    State(provider): Provider,
    Json(request): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    let verdict = provider.validate_task(
        &request.tokenizer_code,
        &request.model_code,
        &request.function_code,
    );
    Json(match verdict {
        Ok(()) => ValidateResponse {
            valid: true,
            violations: Vec::new(),
        },
        Err(rejection) => ValidateResponse {
            valid: false,
            violations: rejection.violations,
        },
    })
}

// Saved tasks

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks",
    responses((status = 200, description = "Saved tasks, newest first", body = [TaskDefinition])),
    tag = "saved-tasks"
)]
pub async fn list_tasks(State(provider): Provider) -> Json<Vec<TaskDefinition>> {
    Json(provider.list_tasks().await)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-tasks",
    request_body = TaskDraft,
    responses(
        (status = 201, description = "Task created", body = TaskDefinition),
        (status = 400, description = "Invalid task", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn create_task(
    State(provider): Provider,
    Json(draft): Json<TaskDraft>,
) -> Result<(StatusCode, Json<TaskDefinition>), ApiError> {
    let task = provider.create_task(draft).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks/{id}",
    params(("id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Task", body = TaskDefinition),
        (status = 404, description = "Task not found", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn get_task(
    State(provider): Provider,
    Path(id): Path<String>,
) -> Result<Json<TaskDefinition>, ApiError> {
    provider.get_task(&id).await.map(Json).map_err(error_response)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    put,
    path = "/custom-tasks/{id}",
    params(("id" = String, Path, description = "Task identifier")),
    request_body = TaskDraft,
    responses(
        (status = 200, description = "Task updated", body = TaskDefinition),
        (status = 400, description = "Invalid task", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn update_task(
    State(provider): Provider,
    Path(id): Path<String>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<TaskDefinition>, ApiError> {
    provider
        .update_task(&id, draft)
        .await
        .map(Json)
        .map_err(error_response)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    delete,
    path = "/custom-tasks/{id}",
    params(("id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Task deleted", body = MessageResponse),
        (status = 404, description = "Task not found", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn delete_task(
    State(provider): Provider,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    provider.delete_task(&id).await.map_err(error_response)?;
    Ok(Json(MessageResponse::new(format!("Deleted task {}", id))))
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks/search",
    params(TaskSearchQuery),
    responses((status = 200, description = "Matching tasks", body = [TaskDefinition])),
    tag = "saved-tasks"
)]
pub async fn search_tasks(
    State(provider): Provider,
    Query(query): Query<TaskSearchQuery>,
) -> Json<Vec<TaskDefinition>> {
    Json(provider.search_tasks(&query.q).await)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks/model/{model_id}",
    params(("model_id" = String, Path, description = "Model identifier")),
    responses((status = 200, description = "Tasks bound to the model", body = [TaskDefinition])),
    tag = "saved-tasks"
)]
pub async fn tasks_for_model(
    State(provider): Provider,
    Path(model_id): Path<String>,
) -> Json<Vec<TaskDefinition>> {
    Json(
        provider
            .tasks_for_model(model_id.trim_start_matches('/'))
            .await,
    )
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks/export",
    responses((status = 200, description = "Every task without store identity", body = [TaskDraft])),
    tag = "saved-tasks"
)]
pub async fn export_tasks(State(provider): Provider) -> Json<Vec<TaskDraft>> {
    Json(provider.export_tasks().await)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    get,
    path = "/custom-tasks/stats",
    responses((status = 200, description = "Task counts, models and top tags", body = TaskStats)),
    tag = "saved-tasks"
)]
pub async fn task_stats(State(provider): Provider) -> Json<TaskStats> {
    Json(provider.task_stats().await)
}

#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-tasks/import",
    request_body = [TaskDraft],
    responses(
        (status = 200, description = "Tasks imported", body = ImportTasksResponse),
        (status = 400, description = "An entry is invalid; nothing was imported", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn import_tasks(
    State(provider): Provider,
    Json(drafts): Json<Vec<TaskDraft>>,
) -> Result<Json<ImportTasksResponse>, ApiError> {
    let ids = provider.import_tasks(drafts).await.map_err(error_response)?;
    Ok(Json(ImportTasksResponse {
        imported: ids.len(),
        ids,
    }))
}

/// Run a saved task; `batch_mode` decides between the single and batch contract
#[cfg(feature = "http-api")]
#[utoipa::path(
    post,
    path = "/custom-tasks/{id}/run",
    params(("id" = String, Path, description = "Task identifier")),
    request_body = RunTaskRequest,
    responses(
        (status = 200, description = "Result envelope", body = RunTaskResponse),
        (status = 400, description = "Wrong input for the task mode", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse)
    ),
    tag = "saved-tasks"
)]
pub async fn run_saved_task(
    State(provider): Provider,
    Path(id): Path<String>,
    Json(request): Json<RunTaskRequest>,
) -> Result<Json<RunTaskResponse>, ApiError> {
    let count = request.input_texts.as_ref().map(Vec::len);
    let (task, report) = provider
        .run_saved_task(&id, request.input_text, request.input_texts)
        .await
        .map_err(error_response)?;

    Ok(Json(match (task.batch_mode, count) {
        (true, Some(count)) => {
            RunTaskResponse::Batch(BatchCustomTaskResponse::from_report(report, count))
        }
        _ => RunTaskResponse::Single(report.into()),
    }))
}

#[cfg(all(test, feature = "http-api"))]
mod tests {
    use super::*;
    use crate::admission::{AdmissionError, AdmissionRejection, FragmentKind};
    use crate::types::OperationKind;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (StudioError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (SchedulerError::NotAvailable("m".into()).into(), StatusCode::BAD_REQUEST),
            (
                SchedulerError::Conflict {
                    id: "m".into(),
                    active: OperationKind::Download,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (SandboxError::ModelNotReady("m".into()).into(), StatusCode::BAD_REQUEST),
            (TaskStoreError::NotFound("t".into()).into(), StatusCode::NOT_FOUND),
            (StudioError::NotFound("Model not found".into()), StatusCode::NOT_FOUND),
            (StudioError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }

    #[test]
    fn test_admission_details_carry_violations() {
        let rejection = AdmissionRejection {
            violations: vec![AdmissionError::Forbidden {
                fragment: FragmentKind::Model,
                pattern: "eval(".to_string(),
            }],
        };
        let (status, Json(body)) = error_response(rejection.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "ADMISSION_REJECTED");
        let details = body.details.unwrap();
        assert_eq!(details["violations"][0]["pattern"], "eval(");
    }

    #[test]
    fn test_not_found_message_is_bare() {
        let (_, Json(body)) = error_response(StudioError::NotFound("Model not found".into()));
        assert_eq!(body.error, "Model not found");
    }
}
