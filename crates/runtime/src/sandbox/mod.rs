//! Sandboxed custom-task execution
//!
//! A custom task is three fragments evaluated in order against a fresh
//! namespace: the tokenizer fragment must bind `tokenizer`, the model
//! fragment must bind `model`, and the function fragment must define
//! `custom_function`, which is then called exactly once. Admission runs
//! first; a rejected task never reaches the interpreter.
//!
//! Failures of the submitted code are data: they come back inside the
//! [`ExecutionReport`], never as a [`StudioError`].

pub mod capabilities;
pub mod tensor;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use studio_script::{CallArgs, ExecutionMonitor, Interpreter, Limits, Namespace, Value};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinError;

use crate::admission;
use crate::config::SandboxConfig;
use crate::registry::ModelRegistry;
use crate::types::{SandboxError, StudioError};

pub use capabilities::{ModelCapability, TransformersModule};
pub use tensor::{Tensor, TorchModule};

/// Input of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskInput {
    Single(String),
    Batch(Vec<String>),
}

impl TaskInput {
    pub fn len(&self) -> usize {
        match self {
            TaskInput::Single(_) => 1,
            TaskInput::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, TaskInput::Batch(_))
    }

    fn to_value(&self) -> Value {
        match self {
            TaskInput::Single(text) => Value::Str(text.clone()),
            TaskInput::Batch(texts) => {
                Value::List(texts.iter().cloned().map(Value::Str).collect())
            }
        }
    }
}

/// Transient request; built per call and dropped with the response
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
    pub model_id: String,
    pub input: TaskInput,
}

/// Why a submitted task failed after admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TaskFailure {
    /// The code ran but did not bind what the contract requires
    ContractViolation(String),
    /// The code raised, or hit a resource ceiling
    ExecutionFailure(String),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::ContractViolation(message) => write!(f, "Contract violation: {}", message),
            TaskFailure::ExecutionFailure(message) => write!(f, "Execution failed: {}", message),
        }
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub output: Result<JsonValue, TaskFailure>,
    /// Text printed by the fragments
    pub logs: String,
    pub steps: u64,
    pub duration_ms: u64,
}

impl ExecutionReport {
    fn failed(failure: TaskFailure, started: Instant) -> Self {
        Self {
            output: Err(failure),
            logs: String::new(),
            steps: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_ok()
    }

    /// Single-input envelope: `(result, error)`
    pub fn single(&self) -> (Option<JsonValue>, Option<String>) {
        match &self.output {
            Ok(value) => (Some(value.clone()), None),
            Err(failure) => (None, Some(failure.to_string())),
        }
    }

    /// Batch envelope over `count` inputs. The whole batch is one call, so a
    /// failure fails every input with the same error.
    pub fn batch(&self, count: usize) -> (Vec<JsonValue>, Vec<Option<String>>) {
        match &self.output {
            Ok(JsonValue::Array(items)) if items.len() == count => {
                (items.clone(), vec![None; count])
            }
            Ok(_) => (
                vec![JsonValue::Null; count],
                vec![Some("custom_function must return a list".to_string()); count],
            ),
            Err(failure) => (vec![JsonValue::Null; count], vec![Some(failure.to_string()); count]),
        }
    }
}

/// Runs custom tasks against loaded models
pub struct SandboxExecutor {
    registry: Arc<ModelRegistry>,
    config: SandboxConfig,
    monitor: Arc<ExecutionMonitor>,
    model_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig, registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            config,
            monitor: Arc::new(ExecutionMonitor::new()),
            model_locks: DashMap::new(),
        }
    }

    /// Instrumentation shared by every execution
    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Admit, then run the task against the target model.
    ///
    /// Returns `Err` only when the request itself is invalid: a rejected
    /// fragment or a model that is not ready.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, StudioError> {
        admission::check_all(
            &request.tokenizer_code,
            &request.model_code,
            &request.function_code,
        )?;

        let handles = self
            .registry
            .handles(&request.model_id)
            .ok_or_else(|| SandboxError::ModelNotReady(request.model_id.clone()))?;

        let _guard = self.lock_model(&request.model_id).await;

        let started = Instant::now();
        let model_id = request.model_id.clone();
        let capability = ModelCapability::new(&request.model_id, handles);
        let monitor = Arc::clone(&self.monitor);
        let limits = Limits {
            max_steps: self.config.max_steps,
            max_depth: self.config.max_depth,
            deadline: None,
            max_bytes: self.config.max_bytes,
        }
        .with_timeout(self.config.timeout);

        let worker =
            tokio::task::spawn_blocking(move || run_fragments(&request, capability, limits, monitor));

        let report = match tokio::time::timeout(self.config.timeout, worker).await {
            Ok(joined) => worker_outcome(joined, started)?,
            Err(_) => ExecutionReport::failed(
                TaskFailure::ExecutionFailure(format!(
                    "execution timed out after {:?}",
                    self.config.timeout
                )),
                started,
            ),
        };

        match &report.output {
            Ok(_) => tracing::info!(
                model_id = %model_id,
                steps = report.steps,
                duration_ms = report.duration_ms,
                "Custom task executed"
            ),
            Err(failure) => tracing::info!(
                model_id = %model_id,
                duration_ms = report.duration_ms,
                "Custom task failed: {}",
                failure
            ),
        }
        Ok(report)
    }

    /// Exclusive use of a model while `serialize_per_model` is set.
    ///
    /// Every inference path holds this guard, so backends never see two
    /// concurrent calls on the same model.
    pub async fn lock_model(&self, model_id: &str) -> Option<OwnedMutexGuard<()>> {
        if !self.config.serialize_per_model {
            return None;
        }
        Some(self.model_lock(model_id).lock_owned().await)
    }

    fn model_lock(&self, model_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.model_locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// A panicking worker is a failed execution; only a cancelled one is a
/// service fault.
fn worker_outcome(
    joined: Result<ExecutionReport, JoinError>,
    started: Instant,
) -> Result<ExecutionReport, StudioError> {
    match joined {
        Ok(report) => Ok(report),
        Err(e) if e.is_panic() => {
            tracing::warn!("Custom task worker panicked: {}", e);
            Ok(ExecutionReport::failed(
                TaskFailure::ExecutionFailure("execution aborted by an internal error".to_string()),
                started,
            ))
        }
        Err(e) => Err(SandboxError::WorkerFailed(e.to_string()).into()),
    }
}

/// The capability namespace of one execution
fn build_namespace(capability: &ModelCapability) -> Namespace {
    let mut namespace = Namespace::with_builtins();
    namespace.bind("torch", Value::host(TorchModule));
    namespace.bind(
        "transformers",
        Value::host(TransformersModule::new(capability.clone())),
    );
    namespace.bind("model_id", Value::Str(capability.model_id().to_string()));
    namespace
}

fn run_fragments(
    request: &ExecutionRequest,
    capability: ModelCapability,
    limits: Limits,
    monitor: Arc<ExecutionMonitor>,
) -> ExecutionReport {
    let started = Instant::now();
    let namespace = build_namespace(&capability);
    monitor.record_namespace(capability.model_id(), namespace.len());

    let mut interpreter = Interpreter::new(namespace, limits).with_monitor(monitor);
    let output = evaluate_contract(&mut interpreter, request);

    ExecutionReport {
        output,
        logs: interpreter.take_output(),
        steps: interpreter.steps(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn evaluate_contract(
    interpreter: &mut Interpreter,
    request: &ExecutionRequest,
) -> Result<JsonValue, TaskFailure> {
    let fragments = [
        ("tokenizer", &request.tokenizer_code, "tokenizer"),
        ("model", &request.model_code, "model"),
        ("function", &request.function_code, "custom_function"),
    ];

    for (label, source, binding) in fragments {
        interpreter
            .evaluate(label, source)
            .map_err(|e| TaskFailure::ExecutionFailure(e.to_string()))?;
        if interpreter.get(binding).is_none() {
            return Err(TaskFailure::ContractViolation(format!(
                "{} code must define '{}'",
                label, binding
            )));
        }
    }

    let function = match interpreter.get("custom_function") {
        Some(value @ (Value::Function(_) | Value::Builtin(_) | Value::Host(_))) => value.clone(),
        Some(other) => {
            return Err(TaskFailure::ContractViolation(format!(
                "'custom_function' must be callable, got {}",
                other.type_name()
            )))
        }
        None => {
            return Err(TaskFailure::ContractViolation(
                "function code must define 'custom_function'".to_string(),
            ))
        }
    };

    let result = interpreter
        .call(&function, CallArgs::new(vec![request.input.to_value()]))
        .map_err(|e| TaskFailure::ExecutionFailure(e.to_string()))?;
    let json = result.to_json();

    if let TaskInput::Batch(texts) = &request.input {
        match &json {
            JsonValue::Array(items) if items.len() == texts.len() => {}
            JsonValue::Array(items) => {
                return Err(TaskFailure::ContractViolation(format!(
                    "custom_function returned {} results for {} inputs",
                    items.len(),
                    texts.len()
                )))
            }
            _ => {
                return Err(TaskFailure::ContractViolation(format!(
                    "custom_function must return a list in batch mode, got {}",
                    result.type_name()
                )))
            }
        }
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HashingEncoder, HashingTokenizer, LoadedModel};
    use crate::registry::RegistryEvent;
    use crate::types::OperationId;
    use std::time::Duration;

    const TOKENIZER: &str = "from transformers import AutoTokenizer\ntokenizer = AutoTokenizer.from_pretrained(model_id)";
    const MODEL: &str = "from transformers import AutoModel\nmodel = AutoModel.from_pretrained(model_id)";

    fn ready_registry(id: &str) -> Arc<ModelRegistry> {
        let registry = Arc::new(ModelRegistry::new());
        registry.transition(id, RegistryEvent::DiscoveredInCache).unwrap();
        let operation = OperationId::new();
        registry
            .transition(id, RegistryEvent::StartLoad { operation })
            .unwrap();
        registry
            .transition(
                id,
                RegistryEvent::LoadDone {
                    operation,
                    handles: LoadedModel {
                        tokenizer: Arc::new(HashingTokenizer::default()),
                        model: Arc::new(HashingEncoder::new(id)),
                    },
                },
            )
            .unwrap();
        registry
    }

    fn request(function_code: &str, input: TaskInput) -> ExecutionRequest {
        ExecutionRequest {
            tokenizer_code: TOKENIZER.to_string(),
            model_code: MODEL.to_string(),
            function_code: function_code.to_string(),
            model_id: "m".to_string(),
            input,
        }
    }

    fn executor(config: SandboxConfig) -> SandboxExecutor {
        SandboxExecutor::new(config, ready_registry("m"))
    }

    #[tokio::test]
    async fn test_single_execution() {
        let executor = executor(SandboxConfig::default());
        let code = "def custom_function(text) {\n  print(\"got\", text)\n  let ids = tokenizer.encode(text)\n  return {\"length\": len(ids), \"upper\": text.upper()}\n}";
        let report = executor
            .execute(request(code, TaskInput::Single("hi there".to_string())))
            .await
            .unwrap();

        let output = report.output.unwrap();
        assert_eq!(output["upper"], "HI THERE");
        assert_eq!(output["length"], 4);
        assert_eq!(report.logs, "got hi there\n");
        assert_eq!(executor.monitor().stats().namespaces, 1);
    }

    #[tokio::test]
    async fn test_model_must_be_ready() {
        let executor = SandboxExecutor::new(SandboxConfig::default(), Arc::new(ModelRegistry::new()));
        let err = executor
            .execute(request("def custom_function(t) { return t }", TaskInput::Single("x".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Sandbox(SandboxError::ModelNotReady(_))));
    }

    #[tokio::test]
    async fn test_missing_binding_is_contract_violation() {
        let executor = executor(SandboxConfig::default());
        let report = executor
            .execute(request("def helper(t) { return t }", TaskInput::Single("x".into())))
            .await
            .unwrap();
        assert!(matches!(report.output, Err(TaskFailure::ContractViolation(_))));
    }

    #[tokio::test]
    async fn test_raised_error_is_execution_failure() {
        let executor = executor(SandboxConfig::default());
        let code = "def custom_function(t) { raise ValueError(\"bad input\") }";
        let report = executor
            .execute(request(code, TaskInput::Single("x".into())))
            .await
            .unwrap();
        match report.output {
            Err(TaskFailure::ExecutionFailure(message)) => assert!(message.contains("bad input")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runaway_loop_hits_limit() {
        let config = SandboxConfig {
            max_steps: 10_000,
            timeout: Duration::from_secs(5),
            ..SandboxConfig::default()
        };
        let executor = executor(config);
        let code = "def custom_function(t) {\n  while true { }\n}";
        let report = executor
            .execute(request(code, TaskInput::Single("x".into())))
            .await
            .unwrap();
        assert!(matches!(report.output, Err(TaskFailure::ExecutionFailure(_))));
    }

    #[tokio::test]
    async fn test_memory_hungry_fragment_is_execution_failure() {
        let executor = executor(SandboxConfig::default());
        let code = "def custom_function(t) {\n  let s = \"a\" * 1000000\n  let xs = [s] * 1000000\n  return len(xs)\n}";
        let report = executor
            .execute(request(code, TaskInput::Single("x".into())))
            .await
            .unwrap();
        match report.output {
            Err(TaskFailure::ExecutionFailure(message)) => {
                assert!(message.contains("memory budget"), "{}", message)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stored_tensors_count_against_memory_budget() {
        let executor = executor(SandboxConfig {
            max_bytes: 16 * 1024 * 1024,
            ..SandboxConfig::default()
        });
        let code = "import torch\ndef custom_function(t) {\n  let big = torch.zeros(1000000)\n  let kept = []\n  for i in range(10) {\n    kept.append(big)\n  }\n  return len(kept)\n}";
        let report = executor
            .execute(request(code, TaskInput::Single("x".into())))
            .await
            .unwrap();
        assert!(matches!(report.output, Err(TaskFailure::ExecutionFailure(_))));
    }

    #[tokio::test]
    async fn test_worker_panic_is_execution_failure() {
        let joined = tokio::task::spawn_blocking(|| -> ExecutionReport { panic!("worker blew up") })
            .await;
        let report = worker_outcome(joined, Instant::now()).unwrap();
        assert!(matches!(report.output, Err(TaskFailure::ExecutionFailure(_))));
    }

    #[tokio::test]
    async fn test_lock_model_serializes_per_model() {
        let serialized = executor(SandboxConfig::default());
        let guard = serialized.lock_model("m").await;
        assert!(guard.is_some());
        assert!(serialized.model_lock("m").try_lock().is_err());
        assert!(serialized.model_lock("other").try_lock().is_ok());
        drop(guard);
        assert!(serialized.model_lock("m").try_lock().is_ok());

        let unserialized = executor(SandboxConfig {
            serialize_per_model: false,
            ..SandboxConfig::default()
        });
        assert!(unserialized.lock_model("m").await.is_none());
    }

    #[test]
    fn test_batch_envelope_on_failure() {
        let report = ExecutionReport {
            output: Err(TaskFailure::ContractViolation("short".to_string())),
            logs: String::new(),
            steps: 0,
            duration_ms: 0,
        };
        let (results, errors) = report.batch(3);
        assert_eq!(results, vec![JsonValue::Null; 3]);
        assert!(errors.iter().all(|e| e == &errors[0] && e.is_some()));
    }
}
