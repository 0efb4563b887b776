//! 本地文件任务库
//!
//! 无网络依赖的后端：任务与其注释串存在单个 JSON 文件里，
//! 同主机多进程共享同一文件，进程内读改写全程持锁。
//! 文件不存在视为空库；损坏则报错而不是悄悄清空（任务库是事实源，
//! 与建议性的退避 / owner 状态文件不同）。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::KanbanError;
use crate::kanban::task::{BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus};
use crate::kanban::TaskBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTask {
    #[serde(flatten)]
    task: Task,
    comments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    tasks: BTreeMap<String, StoredTask>,
}

/// 文件后端
pub struct InternalBackend {
    path: PathBuf,
    label: String,
    guard: Mutex<()>,
}

impl InternalBackend {
    pub fn new(path: impl AsRef<Path>, label: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            label: label.to_string(),
            guard: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<StoreFile, KanbanError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| KanbanError::Transient(format!("task store read failed: {}", e)))?;
        serde_json::from_str(&data)
            .map_err(|e| KanbanError::Permanent(format!("task store corrupt: {}", e)))
    }

    fn save(&self, store: &StoreFile) -> Result<(), KanbanError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KanbanError::Transient(format!("task store mkdir failed: {}", e)))?;
        }
        let data = serde_json::to_string_pretty(store)
            .map_err(|e| KanbanError::Permanent(format!("task store encode failed: {}", e)))?;
        std::fs::write(&self.path, data)
            .map_err(|e| KanbanError::Transient(format!("task store write failed: {}", e)))
    }
}

#[async_trait]
impl TaskBackend for InternalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Internal
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let store = self.load()?;
        Ok(store
            .tasks
            .values()
            .map(|stored| stored.task.clone())
            .filter(|t| {
                filter.labels.iter().all(|l| t.labels.contains(l))
                    && filter.status.map(|s| t.status == s).unwrap_or(true)
            })
            .collect())
    }

    async fn get_task(&self, id: &str) -> Result<Task, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let store = self.load()?;
        store
            .tasks
            .get(id)
            .map(|stored| stored.task.clone())
            .ok_or_else(|| KanbanError::NotFound(id.to_string()))
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let mut store = self.load()?;
        store.next_id += 1;
        let id = store.next_id.to_string();
        let task = Task {
            id: id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            status: TaskStatus::Todo,
            labels: std::iter::once(self.label.clone()).collect(),
            assignee: None,
            task_url: format!("internal://tasks/{}", id),
            backend: BackendKind::Internal,
        };
        store.tasks.insert(
            id,
            StoredTask {
                task: task.clone(),
                comments: Vec::new(),
            },
        );
        self.save(&store)?;
        Ok(task)
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let mut store = self.load()?;
        let stored = store
            .tasks
            .get_mut(id)
            .ok_or_else(|| KanbanError::NotFound(id.to_string()))?;
        if let Some(title) = &patch.title {
            stored.task.title = title.clone();
        }
        if let Some(description) = &patch.description {
            stored.task.description = description.clone();
        }
        if let Some(assignee) = &patch.assignee {
            stored.task.assignee = Some(assignee.clone());
        }
        let task = stored.task.clone();
        self.save(&store)?;
        Ok(task)
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Task, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let mut store = self.load()?;
        let stored = store
            .tasks
            .get_mut(id)
            .ok_or_else(|| KanbanError::NotFound(id.to_string()))?;
        // 原生词汇即规范词汇，无需翻译
        stored.task.status = status;
        let task = stored.task.clone();
        self.save(&store)?;
        Ok(task)
    }

    async fn delete_task(&self, id: &str) -> Result<bool, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let mut store = self.load()?;
        let removed = store.tasks.remove(id).is_some();
        if removed {
            self.save(&store)?;
        }
        Ok(removed)
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let mut store = self.load()?;
        let stored = store
            .tasks
            .get_mut(id)
            .ok_or_else(|| KanbanError::NotFound(id.to_string()))?;
        stored.comments.push(body.to_string());
        self.save(&store)?;
        Ok(true)
    }

    async fn comments(&self, id: &str) -> Result<Vec<String>, KanbanError> {
        let _guard = self.guard.lock().expect("task store lock poisoned");
        let store = self.load()?;
        store
            .tasks
            .get(id)
            .map(|stored| stored.comments.clone())
            .ok_or_else(|| KanbanError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_at(dir: &Path) -> InternalBackend {
        InternalBackend::new(dir.join("tasks.json"), "bosun")
    }

    #[tokio::test]
    async fn test_create_list_get() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_at(dir.path());

        let created = backend
            .create_task(&TaskDraft {
                title: "First".to_string(),
                description: "body".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(created.id, "1");
        assert_eq!(created.status, TaskStatus::Todo);
        assert!(created.labels.contains("bosun"));

        let tasks = backend.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(backend.get_task("1").await.unwrap().title, "First");
    }

    #[tokio::test]
    async fn test_update_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_at(dir.path());
        backend
            .create_task(&TaskDraft {
                title: "First".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();

        let patched = backend
            .update_task(
                "1",
                &TaskPatch {
                    title: Some("Renamed".to_string()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.title, "Renamed");

        let done = backend
            .update_task_status("1", TaskStatus::Done)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_comments_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_at(dir.path());
        backend
            .create_task(&TaskDraft {
                title: "First".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();

        assert!(backend.add_comment("1", "hello").await.unwrap());
        assert!(backend.add_comment("1", "world").await.unwrap());
        assert_eq!(backend.comments("1").await.unwrap(), vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_delete_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_at(dir.path());
        backend
            .create_task(&TaskDraft {
                title: "First".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();

        assert!(backend.delete_task("1").await.unwrap());
        assert!(!backend.delete_task("1").await.unwrap());
        assert!(matches!(
            backend.get_task("1").await,
            Err(KanbanError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sibling_instance_sees_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = backend_at(dir.path());
        first
            .create_task(&TaskDraft {
                title: "Shared".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();

        // 新实例（模拟兄弟进程）直接看到同一文件里的任务
        let second = backend_at(dir.path());
        let tasks = second.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Shared");
    }

    #[tokio::test]
    async fn test_corrupt_store_is_an_error_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tasks.json"), "not json").unwrap();
        let backend = backend_at(dir.path());
        assert!(matches!(
            backend.list_tasks(&TaskFilter::default()).await,
            Err(KanbanError::Permanent(_))
        ));
    }
}
