//! BERT Studio runtime
//!
//! Two cores sit behind the REST service:
//!
//! - the model lifecycle manager ([`registry`], [`scheduler`]), which
//!   downloads and loads models in the background and keeps an observable
//!   per-model state machine;
//! - the custom-task gateway ([`admission`], [`sandbox`]), which checks
//!   user-submitted code and runs it against a loaded model in a namespace
//!   exposing only that model's capabilities.
//!
//! [`service::StudioRuntime`] wires them together with the task store,
//! settings and stats; [`api`] serves it over HTTP.

pub mod admission;
pub mod auth;
pub mod backend;
pub mod config;
pub mod registry;
pub mod sandbox;
pub mod scheduler;
pub mod service;
pub mod tasks;
pub mod types;

#[cfg(feature = "http-api")]
pub mod api;

// Re-export commonly used types
pub use admission::{AdmissionError, AdmissionRejection, FragmentKind};
pub use backend::{LoadedModel, ModelBackend, SimulatedBackend};
pub use config::Config;
pub use registry::{ModelRegistry, RegistryEvent};
pub use sandbox::{ExecutionReport, ExecutionRequest, SandboxExecutor, TaskFailure, TaskInput};
pub use scheduler::{LifecycleScheduler, LoadingStatus, RequestOutcome};
pub use service::StudioRuntime;
pub use tasks::{InMemoryTaskStore, TaskDefinition, TaskDraft, TaskStats, TaskStore};
pub use types::*;
