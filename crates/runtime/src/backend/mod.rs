//! Model backend seam
//!
//! The lifecycle scheduler only talks to models through [`ModelBackend`]:
//! listing and fetching files, discovering cache hits, and producing the
//! tokenizer/model handle pair that the registry installs once a load
//! succeeds. Inference itself stays behind the [`Tokenizer`] and
//! [`InferenceModel`] traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{BackendKind, ModelsConfig};
use crate::types::{BackendError, ModelSummary};

pub mod encoder;
pub mod hub;
pub mod simulated;

pub use encoder::{HashingEncoder, HashingTokenizer, WordPieceTokenizer};
pub use hub::HubBackend;
pub use simulated::SimulatedBackend;

/// One file of a remote model repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

/// Token ids and attention mask for one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub tokens: Vec<String>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Right-pad to `length` with the pad id and a zero mask
    pub fn pad_to(&mut self, length: usize, pad_id: u32) {
        while self.input_ids.len() < length {
            self.tokens.push("[PAD]".to_string());
            self.input_ids.push(pad_id);
            self.attention_mask.push(0);
        }
    }
}

/// Raw forward-pass output for one sequence
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutput {
    /// One hidden vector per input position
    pub last_hidden_state: Vec<Vec<f32>>,
    /// One score per label
    pub logits: Vec<f32>,
}

pub trait Tokenizer: Send + Sync + fmt::Debug {
    /// Split text into word pieces
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Tokenize, add `[CLS]`/`[SEP]` and truncate to `max_length`
    fn encode(&self, text: &str, max_length: usize) -> Encoding;

    fn decode(&self, ids: &[u32]) -> String;

    fn pad_id(&self) -> u32 {
        0
    }

    fn vocab_size(&self) -> usize;
}

pub trait InferenceModel: Send + Sync + fmt::Debug {
    fn hidden_size(&self) -> usize;

    /// Label names, indexed like `ForwardOutput::logits`
    fn labels(&self) -> &[String];

    fn forward(&self, input_ids: &[u32], attention_mask: &[u32]) -> ForwardOutput;
}

/// Attention-mask weighted mean of hidden states
pub fn mean_pool(hidden: &[Vec<f32>], attention_mask: &[u32]) -> Vec<f32> {
    let width = hidden.first().map(Vec::len).unwrap_or(0);
    let mut pooled = vec![0.0f32; width];
    let mut count = 0.0f32;
    for (position, vector) in hidden.iter().enumerate() {
        let weight = attention_mask.get(position).copied().unwrap_or(1) as f32;
        for (acc, v) in pooled.iter_mut().zip(vector) {
            *acc += v * weight;
        }
        count += weight;
    }
    let count = count.max(1e-9);
    pooled.iter_mut().for_each(|v| *v /= count);
    pooled
}

/// Numerically stable softmax
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 {
        exps.iter().map(|e| e / total).collect()
    } else {
        exps
    }
}

/// Tokenizer and model handles of one loaded model
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub tokenizer: Arc<dyn Tokenizer>,
    pub model: Arc<dyn InferenceModel>,
}

/// Progress callback reporting cumulative bytes of the current file
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Files that make up the model
    async fn list_files(&self, id: &str) -> Result<Vec<RemoteFile>, BackendError>;

    /// Fetch one file, reporting progress as it streams
    async fn download_file(
        &self,
        id: &str,
        file: &RemoteFile,
        progress: ProgressFn<'_>,
    ) -> Result<(), BackendError>;

    /// Whether the model is already present in the local cache
    async fn is_cached(&self, id: &str) -> bool;

    /// Build tokenizer and model handles from local files
    async fn load(&self, id: &str) -> Result<LoadedModel, BackendError>;

    /// Browse the catalogue
    async fn search(&self, query: Option<&str>, tag: Option<&str>) -> Vec<ModelSummary>;

    /// Drop cached files (best effort)
    async fn remove(&self, id: &str) -> Result<(), BackendError>;
}

/// Build the backend selected by configuration
pub fn from_config(config: &ModelsConfig) -> Result<Arc<dyn ModelBackend>, BackendError> {
    let backend: Arc<dyn ModelBackend> = match config.backend {
        BackendKind::Simulated => Arc::new(
            SimulatedBackend::new()
                .with_file_delay(config.simulated_file_delay)
                .with_cached(config.simulated_cached.iter().cloned()),
        ),
        BackendKind::Hub => Arc::new(HubBackend::new(config)?),
    };
    tracing::info!(backend = ?config.backend, "Model backend initialized");
    Ok(backend)
}

/// Catalogue filter shared by the backends: only BERT-family ids, optional tag
pub(crate) fn is_listed(summary: &ModelSummary, tag: Option<&str>) -> bool {
    if !summary.id.to_lowercase().contains("bert") {
        return false;
    }
    match tag {
        Some(tag) => summary.tags.iter().any(|t| t == tag),
        None => true,
    }
}
