//! Custom-task gateway integration tests
//!
//! Admission and sandbox execution against a model that is already ready in
//! the registry.

use std::sync::Arc;

use studio_runtime::backend::{HashingEncoder, HashingTokenizer};
use studio_runtime::config::SandboxConfig;
use studio_runtime::{
    AdmissionError, ExecutionRequest, FragmentKind, LoadedModel, ModelRegistry, OperationId,
    RegistryEvent, SandboxExecutor, StudioError, TaskFailure, TaskInput,
};

const MODEL_ID: &str = "bert-base-uncased";

const TOKENIZER: &str =
    "from transformers import AutoTokenizer\ntokenizer = AutoTokenizer.from_pretrained(model_id)";

const MODEL: &str = "from transformers import AutoModelForSequenceClassification\nmodel = AutoModelForSequenceClassification.from_pretrained(model_id)";

fn ready_registry() -> Arc<ModelRegistry> {
    let registry = Arc::new(ModelRegistry::new());
    registry
        .transition(MODEL_ID, RegistryEvent::DiscoveredInCache)
        .unwrap();
    let operation = OperationId::new();
    registry
        .transition(MODEL_ID, RegistryEvent::StartLoad { operation })
        .unwrap();
    registry
        .transition(
            MODEL_ID,
            RegistryEvent::LoadDone {
                operation,
                handles: LoadedModel {
                    tokenizer: Arc::new(HashingTokenizer::default()),
                    model: Arc::new(HashingEncoder::new(MODEL_ID)),
                },
            },
        )
        .unwrap();
    registry
}

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default(), ready_registry())
}

fn request(tokenizer: &str, model: &str, function: &str, input: TaskInput) -> ExecutionRequest {
    ExecutionRequest {
        tokenizer_code: tokenizer.to_string(),
        model_code: model.to_string(),
        function_code: function.to_string(),
        model_id: MODEL_ID.to_string(),
        input,
    }
}

#[tokio::test]
async fn test_forbidden_import_is_rejected_before_evaluation() {
    let executor = executor();

    let err = executor
        .execute(request(
            "import subprocess",
            MODEL,
            "def custom_function(t) { return t }",
            TaskInput::Single("x".to_string()),
        ))
        .await
        .unwrap_err();

    let StudioError::Admission(rejection) = err else {
        panic!("expected an admission rejection, got {:?}", err);
    };
    assert_eq!(rejection.violations.len(), 1);
    assert_eq!(rejection.violations[0].fragment(), FragmentKind::Tokenizer);

    let stats = executor.monitor().stats();
    assert_eq!(stats.namespaces, 0);
    assert_eq!(stats.evaluations, 0);
    assert_eq!(stats.invocations, 0);
}

#[tokio::test]
async fn test_every_failing_fragment_is_reported() {
    let executor = executor();

    let err = executor
        .execute(request(
            TOKENIZER,
            "model = eval(\"1\")",
            "import json\ndef custom_function(t) { return t }",
            TaskInput::Single("x".to_string()),
        ))
        .await
        .unwrap_err();

    let StudioError::Admission(rejection) = err else {
        panic!("expected an admission rejection, got {:?}", err);
    };
    let fragments: Vec<FragmentKind> = rejection.violations.iter().map(|v| v.fragment()).collect();
    assert_eq!(fragments, vec![FragmentKind::Model, FragmentKind::Function]);
    assert!(matches!(
        rejection.violations[1],
        AdmissionError::DisallowedImport { ref module, .. } if module == "json"
    ));
}

#[tokio::test]
async fn test_classification_through_capabilities() {
    let executor = executor();
    let function = "import torch\n\ndef custom_function(text) {\n  let inputs = tokenizer(text, return_tensors=\"pt\")\n  let outputs = model(inputs)\n  let probs = torch.softmax(outputs.logits, -1)\n  return probs.tolist()[0]\n}";

    let report = executor
        .execute(request(
            TOKENIZER,
            MODEL,
            function,
            TaskInput::Single("a wonderful film".to_string()),
        ))
        .await
        .unwrap();

    let (result, error) = report.single();
    assert!(error.is_none(), "unexpected error: {:?}", error);
    let probabilities = result.unwrap();
    let probabilities = probabilities.as_array().unwrap();
    assert_eq!(probabilities.len(), 2);
    let total: f64 = probabilities.iter().filter_map(|p| p.as_f64()).sum();
    assert!((total - 1.0).abs() < 1e-4);

    let stats = executor.monitor().stats();
    assert_eq!(stats.namespaces, 1);
    assert_eq!(stats.evaluations, 3);
    assert_eq!(stats.invocations, 1);
}

#[tokio::test]
async fn test_batch_length_mismatch_fails_every_input() {
    let executor = executor();
    let function = "def custom_function(texts) {\n  return [texts[0], texts[1]]\n}";
    let inputs = vec!["a".to_string(), "b".to_string(), "c".to_string()];

    let report = executor
        .execute(request(TOKENIZER, MODEL, function, TaskInput::Batch(inputs)))
        .await
        .unwrap();
    assert!(matches!(report.output, Err(TaskFailure::ContractViolation(_))));

    let (results, errors) = report.batch(3);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_null()));
    assert_eq!(errors.len(), 3);
    assert!(errors[0].is_some());
    assert!(errors.iter().all(|e| e == &errors[0]));
}

#[tokio::test]
async fn test_batch_success_returns_one_result_per_input() {
    let executor = executor();
    let function = "def custom_function(texts) {\n  let out = []\n  for t in texts {\n    out.append(len(tokenizer.tokenize(t)))\n  }\n  return out\n}";
    let inputs = vec!["one".to_string(), "two words".to_string()];

    let report = executor
        .execute(request(TOKENIZER, MODEL, function, TaskInput::Batch(inputs)))
        .await
        .unwrap();

    let (results, errors) = report.batch(2);
    assert_eq!(results, vec![serde_json::json!(1), serde_json::json!(2)]);
    assert!(errors.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_other_models_are_out_of_reach() {
    let executor = executor();
    let function = "from transformers import AutoModel\ndef custom_function(t) {\n  let other = AutoModel.from_pretrained(\"gpt2\")\n  return 1\n}";

    let report = executor
        .execute(request(
            TOKENIZER,
            MODEL,
            function,
            TaskInput::Single("x".to_string()),
        ))
        .await
        .unwrap();

    match report.output {
        Err(TaskFailure::ExecutionFailure(message)) => assert!(message.contains("OSError")),
        other => panic!("expected an execution failure, got {:?}", other),
    }
}

async fn run_single(function: &str) -> serde_json::Value {
    let report = executor()
        .execute(request(
            TOKENIZER,
            MODEL,
            function,
            TaskInput::Single("a wonderful film".to_string()),
        ))
        .await
        .unwrap();
    let (result, error) = report.single();
    assert!(error.is_none(), "unexpected error: {:?}", error);
    result.unwrap()
}

#[tokio::test]
async fn test_torch_functions_called_on_the_module() {
    let function = r#"import torch

def custom_function(text) {
  torch.no_grad()
  let t = torch.tensor([[1.0, 3.0], [2.0, 2.0]])
  let out = {}
  out["tensor"] = t.tolist()
  out["zeros"] = torch.zeros(2, 3).shape
  out["softmax"] = torch.softmax(torch.tensor([0.0, 0.0]), -1).tolist()
  out["argmax"] = torch.argmax(torch.tensor([0.1, 0.7, 0.2])).item()
  out["mean"] = torch.mean(t, 0).tolist()
  out["cosine"] = torch.cosine_similarity(torch.tensor([1.0, 0.0]), torch.tensor([1.0, 0.0])).item()
  return out
}"#;

    let output = run_single(function).await;
    assert_eq!(output["tensor"], serde_json::json!([[1.0, 3.0], [2.0, 2.0]]));
    assert_eq!(output["zeros"], serde_json::json!([2, 3]));
    assert_eq!(output["softmax"], serde_json::json!([0.5, 0.5]));
    assert_eq!(output["argmax"], serde_json::json!(1));
    assert_eq!(output["mean"], serde_json::json!([1.5, 2.5]));
    assert_eq!(output["cosine"], serde_json::json!(1.0));
}

#[tokio::test]
async fn test_module_functions_match_imported_names() {
    let through_module = r#"import torch
def custom_function(text) {
  return torch.softmax(torch.tensor([1.0, 2.0, 3.0]), -1).tolist()
}"#;
    let through_import = r#"from torch import softmax, tensor
def custom_function(text) {
  return softmax(tensor([1.0, 2.0, 3.0]), -1).tolist()
}"#;

    assert_eq!(run_single(through_module).await, run_single(through_import).await);
}

#[tokio::test]
async fn test_pipelines_through_transformers_module() {
    let function = r#"import transformers

def custom_function(text) {
  let classifier = transformers.pipeline("sentiment-analysis", model=model_id)
  let extractor = transformers.pipeline("feature-extraction", model=model, tokenizer=tokenizer)
  let out = {}
  out["label"] = classifier(text)[0]["label"]
  out["dims"] = len(extractor.embed(text))
  return out
}"#;

    let output = run_single(function).await;
    let label = output["label"].as_str().unwrap();
    assert!(label == "NEGATIVE" || label == "POSITIVE", "label {}", label);
    assert_eq!(output["dims"], serde_json::json!(32));
}

#[tokio::test]
async fn test_pipeline_for_another_model_is_refused() {
    let function = r#"import transformers
def custom_function(text) {
  return transformers.pipeline("sentiment-analysis", model="gpt2")(text)
}"#;

    let report = executor()
        .execute(request(
            TOKENIZER,
            MODEL,
            function,
            TaskInput::Single("x".to_string()),
        ))
        .await
        .unwrap();
    assert!(matches!(report.output, Err(TaskFailure::ExecutionFailure(_))));
}
