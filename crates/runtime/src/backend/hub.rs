//! Backend for a Hugging Face compatible model hub
//!
//! Files are streamed into `{cache_dir}/{org}--{name}/`; a model counts as
//! cached once its `config.json` is present there.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::{
    is_listed, HashingEncoder, HashingTokenizer, LoadedModel, ModelBackend, ProgressFn,
    RemoteFile, Tokenizer, WordPieceTokenizer,
};
use crate::config::ModelsConfig;
use crate::types::{BackendError, ModelSummary};

/// Repository files needed to load a model
const WANTED_FILES: &[&str] = &[
    "config.json",
    "vocab.txt",
    "tokenizer.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "model.safetensors",
    "pytorch_model.bin",
];

const SEARCH_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct HubModelInfo {
    #[serde(default)]
    siblings: Vec<HubSibling>,
}

#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HubListing {
    #[serde(alias = "modelId")]
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    downloads: u64,
    #[serde(default)]
    likes: u64,
}

#[derive(Debug, Deserialize)]
struct HubModelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
    #[serde(default)]
    hidden_size: Option<usize>,
}

pub struct HubBackend {
    client: reqwest::Client,
    endpoint: String,
    cache_dir: PathBuf,
    token: Option<String>,
    max_model_size_mb: u64,
}

impl HubBackend {
    pub fn new(config: &ModelsConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bert-studio/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.hub_endpoint.trim_end_matches('/').to_string(),
            cache_dir: config.cache_dir.clone(),
            token: config.hf_token.clone(),
            max_model_size_mb: config.max_model_size_mb,
        })
    }

    /// Local directory holding the files of `id`
    pub fn model_dir(&self, id: &str) -> PathBuf {
        self.cache_dir.join(id.replace('/', "--"))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_config(dir: &Path) -> Option<HubModelConfig> {
        let raw = tokio::fs::read_to_string(dir.join("config.json")).await.ok()?;
        serde_json::from_str(&raw).ok()
    }
}

#[async_trait]
impl ModelBackend for HubBackend {
    async fn list_files(&self, id: &str) -> Result<Vec<RemoteFile>, BackendError> {
        let url = format!("{}/api/models/{}?blobs=true", self.endpoint, id);
        let response = self.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::ModelNotFound(id.to_string()));
        }
        let info: HubModelInfo = response.error_for_status()?.json().await?;

        let mut files: Vec<RemoteFile> = info
            .siblings
            .into_iter()
            .filter(|s| WANTED_FILES.contains(&s.rfilename.as_str()))
            .map(|s| RemoteFile {
                name: s.rfilename,
                size: s.size.unwrap_or(0),
            })
            .collect();

        // Safetensors make the pickle weights redundant
        if files.iter().any(|f| f.name == "model.safetensors") {
            files.retain(|f| f.name != "pytorch_model.bin");
        }

        if !files.iter().any(|f| f.name == "config.json") {
            return Err(BackendError::Failed(format!(
                "{} has no config.json and cannot be loaded",
                id
            )));
        }

        let total_mb = files.iter().map(|f| f.size).sum::<u64>() / (1024 * 1024);
        if total_mb > self.max_model_size_mb {
            return Err(BackendError::TooLarge {
                id: id.to_string(),
                size_mb: total_mb,
                limit_mb: self.max_model_size_mb,
            });
        }

        Ok(files)
    }

    async fn download_file(
        &self,
        id: &str,
        file: &RemoteFile,
        progress: ProgressFn<'_>,
    ) -> Result<(), BackendError> {
        let dir = self.model_dir(id);
        tokio::fs::create_dir_all(&dir).await?;

        let url = format!("{}/{}/resolve/main/{}", self.endpoint, id, file.name);
        let response = self.get(&url).send().await?.error_for_status()?;

        let partial = dir.join(format!("{}.part", file.name));
        let mut output = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(written);
        }
        output.flush().await?;
        drop(output);

        tokio::fs::rename(&partial, dir.join(&file.name)).await?;
        tracing::debug!(model_id = %id, file = %file.name, bytes = written, "File downloaded");
        Ok(())
    }

    async fn is_cached(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.model_dir(id).join("config.json"))
            .await
            .unwrap_or(false)
    }

    async fn load(&self, id: &str) -> Result<LoadedModel, BackendError> {
        let dir = self.model_dir(id);
        if !self.is_cached(id).await {
            return Err(BackendError::NotCached(id.to_string()));
        }

        let vocab = dir.join("vocab.txt");
        let tokenizer: Arc<dyn Tokenizer> = if tokio::fs::try_exists(&vocab).await.unwrap_or(false) {
            let vocab = vocab.clone();
            let wordpiece = tokio::task::spawn_blocking(move || {
                WordPieceTokenizer::from_vocab_file(&vocab)
            })
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))??;
            Arc::new(wordpiece)
        } else {
            Arc::new(HashingTokenizer::default())
        };

        let mut encoder = HashingEncoder::new(id);
        if let Some(config) = Self::read_config(&dir).await {
            let mut labels: Vec<(usize, String)> = config
                .id2label
                .into_iter()
                .filter_map(|(index, label)| index.parse().ok().map(|i| (i, label)))
                .collect();
            labels.sort_by_key(|(index, _)| *index);
            encoder = encoder.with_labels(labels.into_iter().map(|(_, label)| label).collect());
            if let Some(hidden) = config.hidden_size {
                encoder = encoder.with_hidden_size(hidden.min(1024));
            }
        }

        Ok(LoadedModel {
            tokenizer,
            model: Arc::new(encoder),
        })
    }

    async fn search(&self, query: Option<&str>, tag: Option<&str>) -> Vec<ModelSummary> {
        let url = format!("{}/api/models", self.endpoint);
        let limit = SEARCH_LIMIT.to_string();
        let params = [
            ("search", query.unwrap_or("bert")),
            ("filter", "text-classification"),
            ("sort", "downloads"),
            ("direction", "-1"),
            ("limit", limit.as_str()),
        ];

        let listing: Vec<HubListing> = match self.get(&url).query(&params).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => response.json().await.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!("Could not fetch from model hub: {}", e);
                    return Vec::new();
                }
            },
            Err(e) => {
                tracing::warn!("Could not fetch from model hub: {}", e);
                return Vec::new();
            }
        };

        listing
            .into_iter()
            .map(|m| {
                let (name, description) = match &m.author {
                    Some(author) => (
                        m.id.trim_start_matches(&format!("{}/", author)).to_string(),
                        format!("A text-classification model by {}.", author),
                    ),
                    None => (m.id.clone(), "A text-classification model.".to_string()),
                };
                ModelSummary {
                    id: m.id,
                    name,
                    description,
                    tags: m.tags,
                    downloads: m.downloads,
                    likes: m.likes,
                }
            })
            .filter(|m| is_listed(m, tag))
            .collect()
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let dir = self.model_dir(id);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}
