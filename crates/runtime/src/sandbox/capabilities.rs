//! The `transformers` capability and the handles it hands out
//!
//! Every handle wraps the borrowed tokenizer/model pair of the one model a
//! request targets. Nothing here can reach the registry, the backend or any
//! other model.

use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use studio_script::{CallArgs, HostObject, ScriptError, Value};

use super::tensor::{DType, Tensor};
use crate::backend::{mean_pool, softmax, Encoding, LoadedModel};

type ScriptResult<T> = studio_script::Result<T>;

/// BERT positional limit
const MODEL_MAX_LENGTH: usize = 512;

fn no_attribute(type_name: &str, name: &str) -> ScriptError {
    ScriptError::raised(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", type_name, name),
    )
}

/// Texts from a string or a list of strings; the flag tells which it was
fn texts_argument(value: &Value, function: &str) -> ScriptResult<(Vec<String>, bool)> {
    match value {
        Value::Str(text) => Ok((vec![text.clone()], false)),
        Value::List(items) => {
            let texts = items
                .iter()
                .map(|item| item.expect_str(function).map(str::to_string))
                .collect::<ScriptResult<Vec<String>>>()?;
            Ok((texts, true))
        }
        other => Err(ScriptError::type_error(format!(
            "{} expects a string or a list of strings, got {}",
            function,
            other.type_name()
        ))),
    }
}

/// The model a request targets, shared by every handle of one execution
#[derive(Debug, Clone)]
pub struct ModelCapability {
    model_id: Arc<str>,
    handles: LoadedModel,
}

impl ModelCapability {
    pub fn new(model_id: &str, handles: LoadedModel) -> Self {
        Self {
            model_id: Arc::from(model_id),
            handles,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Only the targeted model resolves
    fn resolve(&self, requested: &str) -> ScriptResult<()> {
        if requested == &*self.model_id {
            Ok(())
        } else {
            Err(ScriptError::raised(
                "OSError",
                format!(
                    "{} is not available in this sandbox; only {} can be loaded",
                    requested, self.model_id
                ),
            ))
        }
    }

    fn encode_batch(&self, texts: &[String], max_length: usize, pad: bool) -> Vec<Encoding> {
        let tokenizer = &self.handles.tokenizer;
        let mut encodings: Vec<Encoding> = texts
            .iter()
            .map(|text| tokenizer.encode(text, max_length))
            .collect();
        if pad {
            let longest = encodings.iter().map(Encoding::len).max().unwrap_or(0);
            for encoding in &mut encodings {
                encoding.pad_to(longest, tokenizer.pad_id());
            }
        }
        encodings
    }
}

/// `transformers` module handle
#[derive(Debug)]
pub struct TransformersModule {
    capability: ModelCapability,
}

impl TransformersModule {
    pub fn new(capability: ModelCapability) -> Self {
        Self { capability }
    }
}

impl HostObject for TransformersModule {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        let kind = match name {
            "AutoTokenizer" => AutoKind::Tokenizer,
            "AutoModel" => AutoKind::Model,
            "AutoModelForSequenceClassification" => AutoKind::SequenceClassification,
            "pipeline" => {
                return Ok(Value::host(PipelineFactory {
                    capability: self.capability.clone(),
                }))
            }
            _ => {
                return Err(ScriptError::raised(
                    "AttributeError",
                    format!("module 'transformers' has no attribute '{}'", name),
                ))
            }
        };
        Ok(Value::host(AutoClass {
            kind,
            capability: self.capability.clone(),
        }))
    }

    fn to_json(&self) -> JsonValue {
        JsonValue::String("<module 'transformers'>".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoKind {
    Tokenizer,
    Model,
    SequenceClassification,
}

/// `AutoTokenizer`, `AutoModel`, `AutoModelForSequenceClassification`
#[derive(Debug)]
struct AutoClass {
    kind: AutoKind,
    capability: ModelCapability,
}

impl HostObject for AutoClass {
    fn type_name(&self) -> &str {
        match self.kind {
            AutoKind::Tokenizer => "AutoTokenizer",
            AutoKind::Model => "AutoModel",
            AutoKind::SequenceClassification => "AutoModelForSequenceClassification",
        }
    }

    fn call_method(&self, name: &str, args: CallArgs) -> ScriptResult<Value> {
        if name != "from_pretrained" {
            return Err(no_attribute(self.type_name(), name));
        }
        let requested = args
            .required(0, "pretrained_model_name_or_path", "from_pretrained")?
            .expect_str("from_pretrained")?;
        self.capability.resolve(requested)?;

        Ok(match self.kind {
            AutoKind::Tokenizer => Value::host(TokenizerHandle {
                capability: self.capability.clone(),
            }),
            AutoKind::Model => Value::host(ModelHandle {
                capability: self.capability.clone(),
                classification: false,
            }),
            AutoKind::SequenceClassification => Value::host(ModelHandle {
                capability: self.capability.clone(),
                classification: true,
            }),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A tokenizer bound to the target model
#[derive(Debug, Clone)]
pub struct TokenizerHandle {
    capability: ModelCapability,
}

impl TokenizerHandle {
    fn max_length(args: &CallArgs) -> ScriptResult<usize> {
        match args.keyword("max_length") {
            None | Some(Value::Null) => Ok(MODEL_MAX_LENGTH),
            Some(value) => {
                let length = value.expect_i64("max_length")?;
                Ok((length.max(2) as usize).min(MODEL_MAX_LENGTH))
            }
        }
    }
}

impl HostObject for TokenizerHandle {
    fn type_name(&self) -> &str {
        "Tokenizer"
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "vocab_size" => Ok(Value::Int(self.capability.handles.tokenizer.vocab_size() as i64)),
            "model_max_length" => Ok(Value::Int(MODEL_MAX_LENGTH as i64)),
            "name_or_path" => Ok(Value::Str(self.capability.model_id().to_string())),
            _ => Err(no_attribute("Tokenizer", name)),
        }
    }

    /// `tokenizer(text_or_texts, padding=, truncation=, max_length=, return_tensors=)`
    fn call(&self, args: CallArgs) -> ScriptResult<Value> {
        let (texts, batched) = texts_argument(args.required(0, "text", "tokenizer")?, "tokenizer")?;
        let max_length = Self::max_length(&args)?;
        let pad = args.keyword("padding").map_or(false, Value::is_truthy) || !batched;
        let as_tensors = matches!(args.keyword("return_tensors"), Some(Value::Str(kind)) if kind == "pt");

        let encodings = self.capability.encode_batch(&texts, max_length, pad);
        let ids: Vec<Vec<f32>> = encodings
            .iter()
            .map(|e| e.input_ids.iter().map(|id| *id as f32).collect())
            .collect();
        let masks: Vec<Vec<f32>> = encodings
            .iter()
            .map(|e| e.attention_mask.iter().map(|m| *m as f32).collect())
            .collect();

        let mut output = BTreeMap::new();
        if as_tensors {
            if !pad && encodings.windows(2).any(|w| w[0].len() != w[1].len()) {
                return Err(ScriptError::value_error(
                    "Unable to create tensor, you should activate padding with 'padding=True'",
                ));
            }
            output.insert("input_ids".to_string(), Value::host(Tensor::from_rows(&ids, DType::Long)?));
            output.insert(
                "attention_mask".to_string(),
                Value::host(Tensor::from_rows(&masks, DType::Long)?),
            );
        } else {
            let to_lists = |rows: &[Vec<f32>]| -> Value {
                let lists: Vec<Value> = rows
                    .iter()
                    .map(|row| Value::List(row.iter().map(|v| Value::Int(*v as i64)).collect()))
                    .collect();
                if batched {
                    Value::List(lists)
                } else {
                    lists.into_iter().next().unwrap_or(Value::List(Vec::new()))
                }
            };
            output.insert("input_ids".to_string(), to_lists(&ids));
            output.insert("attention_mask".to_string(), to_lists(&masks));
        }
        Ok(Value::Map(output))
    }

    fn call_method(&self, name: &str, args: CallArgs) -> ScriptResult<Value> {
        let tokenizer = &self.capability.handles.tokenizer;
        match name {
            "tokenize" => {
                let text = args.required(0, "text", "tokenize")?.expect_str("tokenize")?;
                Ok(Value::List(
                    tokenizer.tokenize(text).into_iter().map(Value::Str).collect(),
                ))
            }
            "encode" => {
                let text = args.required(0, "text", "encode")?.expect_str("encode")?;
                let encoding = tokenizer.encode(text, Self::max_length(&args)?);
                Ok(Value::List(
                    encoding
                        .input_ids
                        .into_iter()
                        .map(|id| Value::Int(id as i64))
                        .collect(),
                ))
            }
            "decode" => {
                let ids = Tensor::from_value(args.required(0, "token_ids", "decode")?)?;
                let ids: Vec<u32> = ids.data().iter().map(|id| *id as u32).collect();
                Ok(Value::Str(tokenizer.decode(&ids)))
            }
            _ => Err(no_attribute("Tokenizer", name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A model bound to the target model
#[derive(Debug, Clone)]
pub struct ModelHandle {
    capability: ModelCapability,
    classification: bool,
}

impl ModelHandle {
    /// Run every row of `input_ids` through the model
    fn forward(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> ScriptResult<ModelOutput> {
        let model = &self.capability.handles.model;
        let ids = match input_ids.shape().len() {
            1 | 2 => input_ids.rows(),
            rank => {
                return Err(ScriptError::value_error(format!(
                    "input_ids must be 1-D or 2-D, got rank {}",
                    rank
                )))
            }
        };
        let masks = match attention_mask {
            Some(mask) if mask.shape() == input_ids.shape() => mask.rows(),
            Some(_) => {
                return Err(ScriptError::value_error(
                    "attention_mask must have the same shape as input_ids",
                ))
            }
            None => ids.iter().map(|row| vec![1.0; row.len()]).collect(),
        };

        let seq_len = ids.first().map(Vec::len).unwrap_or(0);
        let hidden = model.hidden_size();
        let mut hidden_states = Vec::with_capacity(ids.len() * seq_len * hidden);
        let mut logits = Vec::with_capacity(ids.len());
        for (row, mask) in ids.iter().zip(&masks) {
            let row: Vec<u32> = row.iter().map(|v| *v as u32).collect();
            let mask: Vec<u32> = mask.iter().map(|v| *v as u32).collect();
            let output = model.forward(&row, &mask);
            hidden_states.extend(output.last_hidden_state.into_iter().flatten());
            logits.push(output.logits);
        }

        Ok(ModelOutput {
            last_hidden_state: Tensor::new(hidden_states, vec![ids.len(), seq_len, hidden])?,
            logits: Tensor::from_rows(&logits, DType::Float)?,
            classification: self.classification,
        })
    }

    fn config(&self) -> Value {
        let model = &self.capability.handles.model;
        let labels = model.labels();
        let id2label = labels
            .iter()
            .enumerate()
            .map(|(index, label)| (index.to_string(), Value::Str(label.clone())))
            .collect();
        let label2id = labels
            .iter()
            .enumerate()
            .map(|(index, label)| (label.clone(), Value::Int(index as i64)))
            .collect();

        let mut config = BTreeMap::new();
        config.insert("hidden_size".to_string(), Value::Int(model.hidden_size() as i64));
        config.insert("num_labels".to_string(), Value::Int(labels.len() as i64));
        config.insert("id2label".to_string(), Value::Map(id2label));
        config.insert("label2id".to_string(), Value::Map(label2id));
        config.insert(
            "name_or_path".to_string(),
            Value::Str(self.capability.model_id().to_string()),
        );
        Value::Map(config)
    }
}

impl HostObject for ModelHandle {
    fn type_name(&self) -> &str {
        if self.classification {
            "BertForSequenceClassification"
        } else {
            "BertModel"
        }
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "config" => Ok(self.config()),
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    /// `model(inputs)` with the tokenizer's output map, or
    /// `model(input_ids=..., attention_mask=...)`
    fn call(&self, args: CallArgs) -> ScriptResult<Value> {
        let (input_ids, attention_mask) = match args.positional.first() {
            Some(Value::Map(inputs)) => (
                inputs
                    .get("input_ids")
                    .cloned()
                    .ok_or_else(|| ScriptError::raised("KeyError", "'input_ids'"))?,
                inputs.get("attention_mask").cloned(),
            ),
            _ => (
                args.required(0, "input_ids", "forward")?.clone(),
                args.get(1, "attention_mask").cloned(),
            ),
        };

        let input_ids = Tensor::from_value(&input_ids)?;
        let attention_mask = match attention_mask {
            Some(Value::Null) | None => None,
            Some(mask) => Some(Tensor::from_value(&mask)?),
        };
        Ok(Value::host(self.forward(&input_ids, attention_mask.as_ref())?))
    }

    fn call_method(&self, name: &str, _args: CallArgs) -> ScriptResult<Value> {
        match name {
            // Inference only; mode switches are accepted and ignored
            "eval" | "cpu" | "to" => Ok(Value::host(self.clone())),
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forward-pass output
#[derive(Debug)]
pub struct ModelOutput {
    last_hidden_state: Tensor,
    logits: Tensor,
    classification: bool,
}

impl HostObject for ModelOutput {
    fn type_name(&self) -> &str {
        "ModelOutput"
    }

    fn heap_size(&self) -> usize {
        self.last_hidden_state.heap_size() + self.logits.heap_size()
    }

    fn get_attr(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "last_hidden_state" => Ok(Value::host(self.last_hidden_state.clone())),
            "logits" => Ok(Value::host(self.logits.clone())),
            _ => Err(no_attribute("ModelOutput", name)),
        }
    }

    fn get_item(&self, index: &Value) -> ScriptResult<Value> {
        match index {
            Value::Str(key) => self.get_attr(key),
            Value::Int(0) if self.classification => self.get_attr("logits"),
            Value::Int(0) => self.get_attr("last_hidden_state"),
            _ => Err(ScriptError::raised("IndexError", "tuple index out of range")),
        }
    }

    fn to_json(&self) -> JsonValue {
        let mut output = serde_json::Map::new();
        output.insert("logits".to_string(), self.logits.to_list().to_json());
        if !self.classification {
            output.insert(
                "last_hidden_state".to_string(),
                self.last_hidden_state.to_list().to_json(),
            );
        }
        JsonValue::Object(output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineTask {
    TextClassification,
    FeatureExtraction,
}

/// `pipeline(task, model=..., tokenizer=...)`
#[derive(Debug)]
struct PipelineFactory {
    capability: ModelCapability,
}

impl PipelineFactory {
    /// `model=`/`tokenizer=` may be an id string or a handle of the target model
    fn check_reference(&self, value: Option<&Value>) -> ScriptResult<()> {
        match value {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Str(id)) => self.capability.resolve(id),
            Some(Value::Host(object)) => {
                let any = object.as_any();
                if any.is::<ModelHandle>() || any.is::<TokenizerHandle>() {
                    Ok(())
                } else {
                    Err(ScriptError::type_error(format!(
                        "pipeline cannot use a {}",
                        object.type_name()
                    )))
                }
            }
            Some(other) => Err(ScriptError::type_error(format!(
                "pipeline cannot use a {}",
                other.type_name()
            ))),
        }
    }
}

impl HostObject for PipelineFactory {
    fn type_name(&self) -> &str {
        "function"
    }

    fn call(&self, args: CallArgs) -> ScriptResult<Value> {
        let task = args.required(0, "task", "pipeline")?.expect_str("pipeline")?;
        let task = match task {
            "text-classification" | "sentiment-analysis" => PipelineTask::TextClassification,
            "feature-extraction" => PipelineTask::FeatureExtraction,
            other => {
                return Err(ScriptError::raised(
                    "KeyError",
                    format!("Unknown task {}, available tasks are text-classification, sentiment-analysis, feature-extraction", other),
                ))
            }
        };
        self.check_reference(args.keyword("model"))?;
        self.check_reference(args.keyword("tokenizer"))?;

        Ok(Value::host(Pipeline {
            task,
            capability: self.capability.clone(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A constructed pipeline; callable on a text or a list of texts
#[derive(Debug)]
struct Pipeline {
    task: PipelineTask,
    capability: ModelCapability,
}

impl Pipeline {
    fn classify(&self, text: &str) -> Value {
        let handles = &self.capability.handles;
        let encoding = handles.tokenizer.encode(text, MODEL_MAX_LENGTH);
        let output = handles
            .model
            .forward(&encoding.input_ids, &encoding.attention_mask);
        let probabilities = softmax(&output.logits);

        let (best, score) = probabilities
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (index, p)| {
                if *p > best.1 {
                    (index, *p)
                } else {
                    best
                }
            });
        let label = handles
            .model
            .labels()
            .get(best)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", best));

        let mut result = BTreeMap::new();
        result.insert("label".to_string(), Value::Str(label));
        result.insert("score".to_string(), Value::Float(score as f64));
        Value::Map(result)
    }

    fn extract(&self, text: &str) -> Value {
        let handles = &self.capability.handles;
        let encoding = handles.tokenizer.encode(text, MODEL_MAX_LENGTH);
        let output = handles
            .model
            .forward(&encoding.input_ids, &encoding.attention_mask);
        let tokens: Vec<Value> = output
            .last_hidden_state
            .iter()
            .map(|vector| Value::List(vector.iter().map(|v| Value::Float(*v as f64)).collect()))
            .collect();
        Value::List(vec![Value::List(tokens)])
    }

    /// Mean-pooled sentence embedding, exposed as `pipeline.embed(text)`
    fn embed(&self, text: &str) -> Value {
        let handles = &self.capability.handles;
        let encoding = handles.tokenizer.encode(text, MODEL_MAX_LENGTH);
        let output = handles
            .model
            .forward(&encoding.input_ids, &encoding.attention_mask);
        let pooled = mean_pool(&output.last_hidden_state, &encoding.attention_mask);
        Value::List(pooled.into_iter().map(|v| Value::Float(v as f64)).collect())
    }
}

impl HostObject for Pipeline {
    fn type_name(&self) -> &str {
        match self.task {
            PipelineTask::TextClassification => "TextClassificationPipeline",
            PipelineTask::FeatureExtraction => "FeatureExtractionPipeline",
        }
    }

    fn call(&self, args: CallArgs) -> ScriptResult<Value> {
        let (texts, batched) = texts_argument(args.required(0, "inputs", "pipeline")?, "pipeline")?;
        let results: Vec<Value> = texts
            .iter()
            .map(|text| match self.task {
                PipelineTask::TextClassification => self.classify(text),
                PipelineTask::FeatureExtraction => self.extract(text),
            })
            .collect();

        match (self.task, batched) {
            (_, true) => Ok(Value::List(results)),
            (PipelineTask::TextClassification, false) => Ok(Value::List(results)),
            (PipelineTask::FeatureExtraction, false) => {
                Ok(results.into_iter().next().unwrap_or(Value::Null))
            }
        }
    }

    fn call_method(&self, name: &str, args: CallArgs) -> ScriptResult<Value> {
        match (name, self.task) {
            ("embed", PipelineTask::FeatureExtraction) => {
                let text = args.required(0, "text", "embed")?.expect_str("embed")?;
                Ok(self.embed(text))
            }
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HashingEncoder, HashingTokenizer};

    fn capability() -> ModelCapability {
        ModelCapability::new(
            "bert-base-uncased",
            LoadedModel {
                tokenizer: Arc::new(HashingTokenizer::default()),
                model: Arc::new(HashingEncoder::new("bert-base-uncased")),
            },
        )
    }

    fn module() -> TransformersModule {
        TransformersModule::new(capability())
    }

    fn from_pretrained(class: &str, id: &str) -> ScriptResult<Value> {
        match module().get_attr(class)? {
            Value::Host(object) => {
                object.call_method("from_pretrained", CallArgs::new(vec![Value::Str(id.to_string())]))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_only_target_model_resolves() {
        assert!(from_pretrained("AutoTokenizer", "bert-base-uncased").is_ok());
        let err = from_pretrained("AutoModel", "gpt2").unwrap_err();
        assert!(matches!(err, ScriptError::Raised { ref kind, .. } if kind == "OSError"));
    }

    #[test]
    fn test_tokenizer_and_model_shapes() {
        let tokenizer = from_pretrained("AutoTokenizer", "bert-base-uncased").unwrap();
        let Value::Host(tokenizer) = tokenizer else { panic!("expected handle") };
        let inputs = tokenizer
            .call(
                CallArgs::new(vec![Value::List(vec![
                    Value::Str("a short one".to_string()),
                    Value::Str("a slightly longer sentence here".to_string()),
                ])])
                .with_keyword("padding", Value::Bool(true))
                .with_keyword("return_tensors", Value::Str("pt".to_string())),
            )
            .unwrap();

        let model = from_pretrained("AutoModelForSequenceClassification", "bert-base-uncased").unwrap();
        let Value::Host(model) = model else { panic!("expected handle") };
        let output = model.call(CallArgs::new(vec![inputs])).unwrap();
        let Value::Host(output) = output else { panic!("expected output") };

        let logits = output.get_attr("logits").unwrap();
        let Value::Host(logits) = logits else { panic!("expected tensor") };
        let logits = logits.as_any().downcast_ref::<Tensor>().unwrap();
        assert_eq!(logits.shape(), [2, 2]);

        let hidden = output.get_attr("last_hidden_state").unwrap();
        let Value::Host(hidden) = hidden else { panic!("expected tensor") };
        let hidden = hidden.as_any().downcast_ref::<Tensor>().unwrap();
        assert_eq!(hidden.shape()[0], 2);
        assert_eq!(hidden.shape()[2], 32);
    }

    #[test]
    fn test_pipeline_classification() {
        let factory = module().get_attr("pipeline").unwrap();
        let Value::Host(factory) = factory else { panic!("expected factory") };
        let pipeline = factory
            .call(
                CallArgs::new(vec![Value::Str("sentiment-analysis".to_string())])
                    .with_keyword("model", Value::Str("bert-base-uncased".to_string())),
            )
            .unwrap();
        let Value::Host(pipeline) = pipeline else { panic!("expected pipeline") };

        let result = pipeline
            .call(CallArgs::new(vec![Value::Str("great movie".to_string())]))
            .unwrap();
        let json = result.to_json();
        let label = json[0]["label"].as_str().unwrap();
        assert!(label == "NEGATIVE" || label == "POSITIVE");
        let score = json[0]["score"].as_f64().unwrap();
        assert!(score >= 0.5 && score <= 1.0);

        let other = factory.call(
            CallArgs::new(vec![Value::Str("text-classification".to_string())])
                .with_keyword("model", Value::Str("roberta-base".to_string())),
        );
        assert!(other.is_err());
    }
}
