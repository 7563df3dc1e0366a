//! Error types for the studio runtime
//!
//! Each component owns a small `thiserror` enum; [`StudioError`] aggregates
//! them for callers that cross component boundaries (the service facade and
//! the HTTP layer).

use std::time::Duration;
use thiserror::Error;

use super::OperationKind;
use crate::admission::AdmissionRejection;

/// Main runtime error type
#[derive(Error, Debug, Clone)]
pub enum StudioError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionRejection),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Task store error: {0}")]
    TaskStore(#[from] TaskStoreError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Registry transition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Model {id} already has a {active} operation in progress")]
    Conflict { id: String, active: OperationKind },

    #[error("Cannot apply {event} to model {id} in state {state}")]
    InvalidTransition {
        id: String,
        event: &'static str,
        state: String,
    },

    #[error("Event from a superseded or evicted operation on model {id}")]
    Stale { id: String },

    #[error("Model {0} not found")]
    NotFound(String),
}

/// Lifecycle scheduler errors
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("model_id must be a non-empty string")]
    EmptyModelId,

    #[error("Model {0} is neither downloaded nor present in the local cache")]
    NotAvailable(String),

    #[error("Model {id} is busy: {active} in progress")]
    Conflict { id: String, active: OperationKind },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Model backend failures
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Model {0} not found")]
    ModelNotFound(String),

    #[error("Model {0} is not present in the local cache")]
    NotCached(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Model {id} is too large: {size_mb} MB exceeds the {limit_mb} MB limit")]
    TooLarge { id: String, size_mb: u64, limit_mb: u64 },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend failure: {0}")]
    Failed(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Network(err.to_string())
    }
}

/// Request-level sandbox errors.
///
/// Failures of the user's code are not errors at this level; they are
/// returned inside the execution report.
#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    #[error("Model not downloaded or ready. Please download it first.")]
    ModelNotReady(String),

    #[error("Sandbox worker failed: {0}")]
    WorkerFailed(String),
}

/// Task store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskStoreError {
    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Invalid task: {0}")]
    Invalid(String),
}
