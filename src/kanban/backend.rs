//! 后端抽象
//!
//! 所有后端（GitHub CLI / Jira REST / 本地文件）实现 TaskBackend。
//! 各操作都可被多进程并发调用；updateTaskStatus 负责把规范状态翻译成
//! 后端原生迁移（GitHub: reopen/close + 标签；Jira: transitions 查找 + 提交）。

use async_trait::async_trait;

use crate::core::KanbanError;
use crate::kanban::task::{BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus};

/// 任务后端契约
#[async_trait]
pub trait TaskBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError>;

    async fn get_task(&self, id: &str) -> Result<Task, KanbanError>;

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError>;

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError>;

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Task, KanbanError>;

    async fn delete_task(&self, id: &str) -> Result<bool, KanbanError>;

    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError>;

    /// 任务全部注释正文，按时间序；租约编解码靠它扫 marker 块
    async fn comments(&self, id: &str) -> Result<Vec<String>, KanbanError>;
}
