//! In-process backend with deterministic models
//!
//! Used by default and by every test: downloads are paced by a configurable
//! per-file delay so progress is observable, failures are injected per id.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    is_listed, HashingEncoder, HashingTokenizer, LoadedModel, ModelBackend, ProgressFn,
    RemoteFile,
};
use crate::types::{BackendError, ModelSummary};

const CHUNKS_PER_FILE: u64 = 4;

pub struct SimulatedBackend {
    file_delay: Duration,
    files: Vec<RemoteFile>,
    failing_downloads: HashSet<String>,
    failing_loads: HashSet<String>,
    cached: RwLock<HashSet<String>>,
    download_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            file_delay: Duration::from_millis(50),
            files: vec![
                RemoteFile {
                    name: "config.json".to_string(),
                    size: 570,
                },
                RemoteFile {
                    name: "vocab.txt".to_string(),
                    size: 231_508,
                },
                RemoteFile {
                    name: "model.safetensors".to_string(),
                    size: 4 * 1024 * 1024,
                },
            ],
            failing_downloads: HashSet::new(),
            failing_loads: HashSet::new(),
            cached: RwLock::new(HashSet::new()),
            download_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_file_delay(mut self, delay: Duration) -> Self {
        self.file_delay = delay;
        self
    }

    pub fn with_failing_download(mut self, id: impl Into<String>) -> Self {
        self.failing_downloads.insert(id.into());
        self
    }

    pub fn with_failing_load(mut self, id: impl Into<String>) -> Self {
        self.failing_loads.insert(id.into());
        self
    }

    pub fn with_cached<I: IntoIterator<Item = String>>(self, ids: I) -> Self {
        self.cached.write().extend(ids);
        self
    }

    /// Number of downloads started (file listings requested)
    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn catalogue() -> Vec<ModelSummary> {
        let entries: [(&str, &str, u64, &[&str]); 5] = [
            ("bert-base-uncased", "google", 52_000_000, &["fill-mask", "en"]),
            (
                "distilbert-base-uncased-finetuned-sst-2-english",
                "distilbert",
                9_100_000,
                &["text-classification", "en"],
            ),
            (
                "nlptown/bert-base-multilingual-uncased-sentiment",
                "nlptown",
                1_600_000,
                &["text-classification", "multilingual"],
            ),
            (
                "ProsusAI/finbert",
                "ProsusAI",
                1_200_000,
                &["text-classification", "finance"],
            ),
            ("roberta-base", "FacebookAI", 9_000_000, &["fill-mask"]),
        ];

        entries
            .iter()
            .map(|(id, author, downloads, tags)| ModelSummary {
                id: id.to_string(),
                name: id.rsplit('/').next().unwrap_or(*id).to_string(),
                description: format!("A text-classification model by {}.", author),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                downloads: *downloads,
                likes: downloads / 1000,
            })
            .collect()
    }
}

#[async_trait]
impl ModelBackend for SimulatedBackend {
    async fn list_files(&self, id: &str) -> Result<Vec<RemoteFile>, BackendError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_downloads.contains(id) {
            return Err(BackendError::ModelNotFound(id.to_string()));
        }
        Ok(self.files.clone())
    }

    async fn download_file(
        &self,
        id: &str,
        file: &RemoteFile,
        progress: ProgressFn<'_>,
    ) -> Result<(), BackendError> {
        let chunk = file.size / CHUNKS_PER_FILE;
        for step in 1..=CHUNKS_PER_FILE {
            tokio::time::sleep(self.file_delay / CHUNKS_PER_FILE as u32).await;
            let done = if step == CHUNKS_PER_FILE {
                file.size
            } else {
                chunk * step
            };
            progress(done);
        }

        if file.name == self.files.last().map(|f| f.name.as_str()).unwrap_or_default() {
            self.cached.write().insert(id.to_string());
        }
        Ok(())
    }

    async fn is_cached(&self, id: &str) -> bool {
        self.cached.read().contains(id)
    }

    async fn load(&self, id: &str) -> Result<LoadedModel, BackendError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.file_delay).await;

        if !self.cached.read().contains(id) {
            return Err(BackendError::NotCached(id.to_string()));
        }
        if self.failing_loads.contains(id) {
            return Err(BackendError::Failed(format!(
                "weights of {} could not be deserialized",
                id
            )));
        }

        Ok(LoadedModel {
            tokenizer: Arc::new(HashingTokenizer::default()),
            model: Arc::new(HashingEncoder::new(id)),
        })
    }

    async fn search(&self, query: Option<&str>, tag: Option<&str>) -> Vec<ModelSummary> {
        let query = query.unwrap_or("bert").to_lowercase();
        let mut models: Vec<ModelSummary> = Self::catalogue()
            .into_iter()
            .filter(|m| m.id.to_lowercase().contains(&query))
            .filter(|m| is_listed(m, tag))
            .collect();
        models.sort_by(|a, b| b.downloads.cmp(&a.downloads));
        models
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.cached.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_download_reports_cumulative_progress() {
        let backend = SimulatedBackend::new().with_file_delay(Duration::from_millis(4));
        let files = backend.list_files("m").await.unwrap();
        let seen = Mutex::new(Vec::new());
        let record = |bytes: u64| seen.lock().unwrap().push(bytes);

        backend.download_file("m", &files[1], &record).await.unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last(), Some(&files[1].size));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_load_requires_cache() {
        let backend = SimulatedBackend::new()
            .with_file_delay(Duration::from_millis(1))
            .with_cached(vec!["cached/model".to_string()]);

        assert!(backend.load("cached/model").await.is_ok());
        assert!(matches!(
            backend.load("other/model").await,
            Err(BackendError::NotCached(_))
        ));
        assert_eq!(backend.load_calls(), 2);
    }

    #[tokio::test]
    async fn test_search_only_lists_bert_models() {
        let backend = SimulatedBackend::new();
        let all = backend.search(None, None).await;
        assert!(all.iter().all(|m| m.id.to_lowercase().contains("bert")));
        assert_eq!(all[0].id, "bert-base-uncased");

        let finance = backend.search(None, Some("finance")).await;
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].name, "finbert");

        assert!(!backend.search(Some("roberta"), None).await.is_empty());
    }
}
