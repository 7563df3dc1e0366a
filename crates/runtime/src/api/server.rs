//! HTTP API server implementation
//!
//! Builds the Axum router over a [`StudioApiProvider`] and serves it.

#[cfg(feature = "http-api")]
use axum::{http::HeaderValue, middleware, response::Json, Router};

#[cfg(feature = "http-api")]
use std::{future::Future, net::SocketAddr, sync::Arc};

#[cfg(feature = "http-api")]
use tokio::net::TcpListener;

#[cfg(feature = "http-api")]
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[cfg(feature = "http-api")]
use utoipa::OpenApi;

#[cfg(feature = "http-api")]
use super::middleware::{
    auth_middleware, logging_middleware, rate_limit_middleware, ClientRateLimiter,
};

#[cfg(feature = "http-api")]
use super::routes;

#[cfg(feature = "http-api")]
use super::traits::StudioApiProvider;

#[cfg(feature = "http-api")]
use super::types;

#[cfg(feature = "http-api")]
use crate::auth::{self, AuthGate};

#[cfg(feature = "http-api")]
use crate::config::ApiConfig;

#[cfg(feature = "http-api")]
use crate::types::StudioError;

/// OpenAPI document served at `/api-docs/openapi.json`
#[cfg(feature = "http-api")]
#[derive(OpenApi)]
#[openapi(
    paths(
        routes::root,
        routes::health_check,
        routes::get_stats,
        routes::get_settings,
        routes::update_settings,
        routes::available_models,
        routes::download_model,
        routes::load_model,
        routes::downloaded_models,
        routes::delete_model,
        routes::loaded_models,
        routes::loading_models,
        routes::model_status,
        routes::embed,
        routes::classify,
        routes::run_custom_task,
        routes::run_custom_task_batch,
        routes::validate_custom_task,
        routes::list_tasks,
        routes::create_task,
        routes::get_task,
        routes::update_task,
        routes::delete_task,
        routes::search_tasks,
        routes::tasks_for_model,
        routes::export_tasks,
        routes::task_stats,
        routes::import_tasks,
        routes::run_saved_task,
    ),
    components(schemas(
        types::MessageResponse,
        types::HealthResponse,
        types::ModelIdRequest,
        types::TextsRequest,
        types::EmbedResponse,
        types::ClassifyResponse,
        types::CustomTaskRequest,
        types::CustomTaskResponse,
        types::BatchCustomTaskRequest,
        types::BatchCustomTaskResponse,
        types::ValidateRequest,
        types::ValidateResponse,
        types::RunTaskRequest,
        types::RunTaskResponse,
        types::ImportTasksResponse,
        types::ErrorResponse,
        crate::admission::AdmissionError,
        crate::admission::AdmissionRejection,
        crate::admission::FragmentKind,
        crate::scheduler::LoadingPhase,
        crate::scheduler::LoadingStatus,
        crate::service::Classification,
        crate::service::DownloadedModelInfo,
        crate::service::NotificationSettings,
        crate::service::SecuritySettings,
        crate::service::Settings,
        crate::service::StudioStats,
        crate::tasks::TaskDefinition,
        crate::tasks::TaskDraft,
        crate::tasks::TaskStats,
        crate::tasks::TagCount,
        crate::types::DownloadState,
        crate::types::LoadState,
        crate::types::ModelEntry,
        crate::types::ModelSummary,
        crate::types::Progress,
    )),
    tags(
        (name = "service", description = "Liveness, stats and settings"),
        (name = "models", description = "Model lifecycle"),
        (name = "inference", description = "Built-in embedding and classification"),
        (name = "custom-tasks", description = "Sandboxed user code"),
        (name = "saved-tasks", description = "Stored task definitions")
    )
)]
pub struct ApiDoc;

#[cfg(feature = "http-api")]
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// HTTP API Server
#[cfg(feature = "http-api")]
pub struct HttpApiServer {
    config: ApiConfig,
    provider: Arc<dyn StudioApiProvider>,
    gate: Arc<dyn AuthGate>,
}

#[cfg(feature = "http-api")]
impl HttpApiServer {
    /// Server whose auth gate is built from the configured API keys
    pub fn new(config: ApiConfig, provider: Arc<dyn StudioApiProvider>) -> Self {
        let gate: Arc<dyn AuthGate> = Arc::from(auth::from_keys(&config.api_keys));
        Self {
            config,
            provider,
            gate,
        }
    }

    /// Replace the auth gate
    pub fn with_auth_gate(mut self, gate: Arc<dyn AuthGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Bind the configured address and serve until the process stops
    pub async fn start(&self) -> Result<(), StudioError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StudioError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), StudioError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| StudioError::Internal(format!("Listener has no address: {}", e)))?;
        tracing::info!("HTTP API server starting on {}", addr);

        axum::serve(
            listener,
            self.create_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| StudioError::Internal(format!("Server error: {}", e)))?;

        tracing::info!("HTTP API server stopped");
        Ok(())
    }

    /// Create the Axum router with all routes and middleware
    pub fn create_router(&self) -> Router {
        use axum::routing::{get, post};

        let mut router = Router::new()
            .route("/", get(routes::root))
            .route("/health", get(routes::health_check))
            .route("/stats", get(routes::get_stats))
            .route(
                "/settings",
                get(routes::get_settings).post(routes::update_settings),
            )
            .route("/models/available", get(routes::available_models))
            .route("/models/download", post(routes::download_model))
            .route("/models/load", post(routes::load_model))
            .route("/models/downloaded", get(routes::downloaded_models))
            .route(
                "/models/downloaded/*model_id",
                axum::routing::delete(routes::delete_model),
            )
            .route("/models/loaded", get(routes::loaded_models))
            .route("/models/loading", get(routes::loading_models))
            .route("/models/status/*model_id", get(routes::model_status))
            .route("/embed", post(routes::embed))
            .route("/classify", post(routes::classify))
            .route("/custom-task", post(routes::run_custom_task))
            .route("/custom-task/batch", post(routes::run_custom_task_batch))
            .route("/custom-task/validate", post(routes::validate_custom_task))
            .route(
                "/custom-tasks",
                get(routes::list_tasks).post(routes::create_task),
            )
            .route("/custom-tasks/search", get(routes::search_tasks))
            .route("/custom-tasks/export", get(routes::export_tasks))
            .route("/custom-tasks/stats", get(routes::task_stats))
            .route("/custom-tasks/import", post(routes::import_tasks))
            .route("/custom-tasks/model/*model_id", get(routes::tasks_for_model))
            .route(
                "/custom-tasks/:id",
                get(routes::get_task)
                    .put(routes::update_task)
                    .delete(routes::delete_task),
            )
            .route("/custom-tasks/:id/run", post(routes::run_saved_task))
            .route("/api-docs/openapi.json", get(openapi_json))
            .with_state(self.provider.clone())
            .layer(middleware::from_fn_with_state(
                self.gate.clone(),
                auth_middleware,
            ));

        if self.config.rate_limit.enabled {
            match ClientRateLimiter::new(&self.config.rate_limit) {
                Some(limiter) => {
                    router = router.layer(middleware::from_fn_with_state(
                        Arc::new(limiter),
                        rate_limit_middleware,
                    ));
                }
                None => tracing::warn!("Rate limit quota is empty, rate limiting disabled"),
            }
        }

        router = router.layer(middleware::from_fn(logging_middleware));

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router.layer(self.cors_layer())
    }

    fn cors_layer(&self) -> CorsLayer {
        if self.config.cors_origins.iter().any(|origin| origin == "*") {
            return CorsLayer::permissive();
        }

        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
