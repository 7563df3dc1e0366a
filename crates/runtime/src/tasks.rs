//! Saved custom-task definitions
//!
//! The service only needs a narrow CRUD contract over task definitions;
//! [`TaskStore`] is that contract and [`InMemoryTaskStore`] the bundled
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::types::TaskStoreError;

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_TAGS_CHARS: usize = 200;
const TOP_TAGS: usize = 10;

/// A saved task. The code fragments are never changed by execution; edits
/// go through [`TaskStore::update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub model_id: String,
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
    /// Free-form, comma separated
    pub tags: Option<String>,
    #[serde(default)]
    pub batch_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Content of a task as submitted for create, update and import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_id: String,
    pub tokenizer_code: String,
    pub model_code: String,
    pub function_code: String,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub batch_mode: bool,
}

impl TaskDraft {
    pub fn validate(&self) -> Result<(), TaskStoreError> {
        let name = self.name.trim().chars().count();
        if name == 0 || name > MAX_NAME_CHARS {
            return Err(TaskStoreError::Invalid(format!(
                "name must be between 1 and {} characters",
                MAX_NAME_CHARS
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(TaskStoreError::Invalid(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
        if self
            .tags
            .as_deref()
            .map_or(false, |tags| tags.chars().count() > MAX_TAGS_CHARS)
        {
            return Err(TaskStoreError::Invalid(format!(
                "tags must be at most {} characters",
                MAX_TAGS_CHARS
            )));
        }
        if self.model_id.trim().is_empty() {
            return Err(TaskStoreError::Invalid("model_id must not be empty".to_string()));
        }
        Ok(())
    }
}

impl TaskDefinition {
    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self
                .tags
                .as_deref()
                .map_or(false, |tags| tags.to_lowercase().contains(needle))
    }

    fn draft(&self) -> TaskDraft {
        TaskDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            model_id: self.model_id.clone(),
            tokenizer_code: self.tokenizer_code.clone(),
            model_code: self.model_code.clone(),
            function_code: self.function_code.clone(),
            tags: self.tags.clone(),
            batch_mode: self.batch_mode,
        }
    }
}

/// How often a tag appears across stored tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Aggregate view of the task store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct TaskStats {
    pub total_tasks: usize,
    pub batch_tasks: usize,
    pub unique_models: usize,
    /// Distinct model ids, sorted
    pub models: Vec<String>,
    /// Up to ten most used tags, most frequent first
    pub top_tags: Vec<TagCount>,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[TaskDefinition]) -> Self {
        let models: BTreeSet<&str> = tasks.iter().map(|task| task.model_id.as_str()).collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for tag in tasks
            .iter()
            .filter_map(|task| task.tags.as_deref())
            .flat_map(|tags| tags.split(','))
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
        {
            *counts.entry(tag).or_default() += 1;
        }
        let mut top_tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(TOP_TAGS);

        Self {
            total_tasks: tasks.len(),
            batch_tasks: tasks.iter().filter(|task| task.batch_mode).count(),
            unique_models: models.len(),
            models: models.into_iter().map(str::to_string).collect(),
            top_tags,
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, draft: TaskDraft) -> Result<TaskDefinition, TaskStoreError>;

    async fn get(&self, id: &str) -> Result<TaskDefinition, TaskStoreError>;

    /// All tasks, most recently updated first
    async fn list(&self) -> Vec<TaskDefinition>;

    async fn update(&self, id: &str, draft: TaskDraft) -> Result<TaskDefinition, TaskStoreError>;

    async fn delete(&self, id: &str) -> Result<(), TaskStoreError>;

    /// Case-insensitive match over name, description and tags
    async fn search(&self, query: &str) -> Vec<TaskDefinition>;

    async fn by_model(&self, model_id: &str) -> Vec<TaskDefinition>;

    /// Every task without store identity, for re-import elsewhere
    async fn export(&self) -> Vec<TaskDraft>;

    /// Create tasks from drafts; returns the new ids
    async fn import(&self, drafts: Vec<TaskDraft>) -> Result<Vec<String>, TaskStoreError>;

    async fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(&self.list().await)
    }
}

pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, TaskDefinition>>,
    max_tasks: usize,
}

impl InMemoryTaskStore {
    pub fn new(max_tasks: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_tasks,
        }
    }

    fn sorted<I: Iterator<Item = TaskDefinition>>(tasks: I) -> Vec<TaskDefinition> {
        let mut tasks: Vec<TaskDefinition> = tasks.collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.name.cmp(&b.name)));
        tasks
    }

    fn insert(
        &self,
        tasks: &mut HashMap<String, TaskDefinition>,
        draft: TaskDraft,
    ) -> Result<TaskDefinition, TaskStoreError> {
        draft.validate()?;
        if tasks.len() >= self.max_tasks {
            return Err(TaskStoreError::Invalid(format!(
                "task limit of {} reached",
                self.max_tasks
            )));
        }

        let now = Utc::now();
        let task = TaskDefinition {
            id: Uuid::new_v4().to_string(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            model_id: draft.model_id,
            tokenizer_code: draft.tokenizer_code,
            model_code: draft.model_code,
            function_code: draft.function_code,
            tags: draft.tags,
            batch_mode: draft.batch_mode,
            created_at: now,
            updated_at: now,
        };
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, draft: TaskDraft) -> Result<TaskDefinition, TaskStoreError> {
        let mut tasks = self.tasks.write();
        let task = self.insert(&mut tasks, draft)?;
        tracing::debug!(task_id = %task.id, "Task created");
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<TaskDefinition, TaskStoreError> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Vec<TaskDefinition> {
        Self::sorted(self.tasks.read().values().cloned())
    }

    async fn update(&self, id: &str, draft: TaskDraft) -> Result<TaskDefinition, TaskStoreError> {
        draft.validate()?;
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;

        task.name = draft.name.trim().to_string();
        task.description = draft.description;
        task.model_id = draft.model_id;
        task.tokenizer_code = draft.tokenizer_code;
        task.model_code = draft.model_code;
        task.function_code = draft.function_code;
        task.tags = draft.tags;
        task.batch_mode = draft.batch_mode;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), TaskStoreError> {
        match self.tasks.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(TaskStoreError::NotFound(id.to_string())),
        }
    }

    async fn search(&self, query: &str) -> Vec<TaskDefinition> {
        let needle = query.trim().to_lowercase();
        Self::sorted(
            self.tasks
                .read()
                .values()
                .filter(|task| task.matches(&needle))
                .cloned(),
        )
    }

    async fn by_model(&self, model_id: &str) -> Vec<TaskDefinition> {
        Self::sorted(
            self.tasks
                .read()
                .values()
                .filter(|task| task.model_id == model_id)
                .cloned(),
        )
    }

    async fn export(&self) -> Vec<TaskDraft> {
        self.list().await.iter().map(TaskDefinition::draft).collect()
    }

    async fn import(&self, drafts: Vec<TaskDraft>) -> Result<Vec<String>, TaskStoreError> {
        // Validate everything first so a bad entry imports nothing
        for draft in &drafts {
            draft.validate()?;
        }
        let mut tasks = self.tasks.write();
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            ids.push(self.insert(&mut tasks, draft)?.id);
        }
        tracing::info!(count = ids.len(), "Tasks imported");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, model_id: &str) -> TaskDraft {
        TaskDraft {
            name: name.to_string(),
            description: format!("{} task", name),
            model_id: model_id.to_string(),
            tokenizer_code: "tokenizer = 1".to_string(),
            model_code: "model = 1".to_string(),
            function_code: "def custom_function(t) { return t }".to_string(),
            tags: Some("sentiment, demo".to_string()),
            batch_mode: false,
        }
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let store = InMemoryTaskStore::default();
        let task = store.create(draft("Sentiment", "m")).await.unwrap();
        assert_eq!(store.get(&task.id).await.unwrap().name, "Sentiment");

        let mut edit = draft("Sentiment v2", "m");
        edit.batch_mode = true;
        let updated = store.update(&task.id, edit).await.unwrap();
        assert!(updated.batch_mode);
        assert!(updated.updated_at >= task.updated_at);
        assert_eq!(updated.created_at, task.created_at);

        store.delete(&task.id).await.unwrap();
        assert_eq!(
            store.get(&task.id).await.unwrap_err(),
            TaskStoreError::NotFound(task.id.clone())
        );
        assert!(store.delete(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_validation_limits() {
        let store = InMemoryTaskStore::default();
        assert!(store.create(draft("", "m")).await.is_err());
        assert!(store.create(draft(&"x".repeat(101), "m")).await.is_err());

        let mut long_tags = draft("ok", "m");
        long_tags.tags = Some("t".repeat(201));
        assert!(store.create(long_tags).await.is_err());

        let limited = InMemoryTaskStore::new(1);
        limited.create(draft("one", "m")).await.unwrap();
        assert!(limited.create(draft("two", "m")).await.is_err());
    }

    #[tokio::test]
    async fn test_search_and_filter() {
        let store = InMemoryTaskStore::default();
        store.create(draft("Sentiment", "bert-base-uncased")).await.unwrap();
        let mut other = draft("Keywords", "finbert");
        other.tags = Some("extraction".to_string());
        store.create(other).await.unwrap();

        assert_eq!(store.search("SENTI").await.len(), 1);
        assert_eq!(store.search("extraction").await[0].name, "Keywords");
        assert_eq!(store.search("task").await.len(), 2);
        assert_eq!(store.by_model("finbert").await.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_count_models_tags_and_batches() {
        let store = InMemoryTaskStore::default();
        assert_eq!(store.stats().await, TaskStats::default());

        store.create(draft("Sentiment", "bert-base-uncased")).await.unwrap();
        let mut batch = draft("Batch sentiment", "bert-base-uncased");
        batch.batch_mode = true;
        batch.tags = Some("sentiment , batch,".to_string());
        store.create(batch).await.unwrap();
        let mut other = draft("Keywords", "finbert");
        other.tags = None;
        store.create(other).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.batch_tasks, 1);
        assert_eq!(stats.unique_models, 2);
        assert_eq!(stats.models, vec!["bert-base-uncased", "finbert"]);
        assert_eq!(
            stats.top_tags,
            vec![
                TagCount { tag: "sentiment".into(), count: 2 },
                TagCount { tag: "batch".into(), count: 1 },
                TagCount { tag: "demo".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_export_import_assigns_new_ids() {
        let source = InMemoryTaskStore::default();
        let original = source.create(draft("Sentiment", "m")).await.unwrap();
        let exported = source.export().await;

        let target = InMemoryTaskStore::default();
        let ids = target.import(exported).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], original.id);
        assert_eq!(target.get(&ids[0]).await.unwrap().function_code, original.function_code);

        let bad = vec![draft("fine", "m"), draft("", "m")];
        assert!(target.import(bad).await.is_err());
        assert_eq!(target.list().await.len(), 1);
    }
}
