//! KanbanAdapter 门面
//!
//! 按配置选择后端，对调度循环暴露统一的任务契约 + 租约协议。
//! 租约写入是「读改写」：先读注释里的最新 marker 块，再追加新块。
//! persist 只在写入被后端确认后返回 true；重试额度耗尽返回 false，
//! 调用方把 false 当「本轮没拿到租约」处理，不是致命错误。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordination::{CoordinationState, FailureKind};
use crate::core::KanbanError;
use crate::kanban::github::GithubBackend;
use crate::kanban::internal::InternalBackend;
use crate::kanban::jira::JiraBackend;
use crate::kanban::shared_state::{
    claim_decision, encode_shared_state, latest_shared_state, ClaimDecision, LeaseStatus,
    SharedState,
};
use crate::kanban::task::{BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus};
use crate::kanban::{RetryPolicy, TaskBackend};

/// 看板门面：统一契约 + 租约协议
pub struct KanbanAdapter {
    backend: Arc<dyn TaskBackend>,
    coord: Arc<CoordinationState>,
    retry: RetryPolicy,
    lease_ttl_ms: i64,
}

impl KanbanAdapter {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        coord: Arc<CoordinationState>,
        retry: RetryPolicy,
        lease_ttl_ms: i64,
    ) -> Self {
        Self {
            backend,
            coord,
            retry,
            lease_ttl_ms,
        }
    }

    /// 按 kanban.backend 选择后端
    pub fn from_config(cfg: &AppConfig, coord: Arc<CoordinationState>) -> anyhow::Result<Self> {
        let backend: Arc<dyn TaskBackend> = match cfg.kanban.backend.as_str() {
            "github" => Arc::new(GithubBackend::from_config(cfg, Arc::clone(&coord))?),
            "jira" => Arc::new(JiraBackend::from_config(cfg, Arc::clone(&coord))?),
            "internal" => Arc::new(InternalBackend::new(
                cfg.coordination.state_dir.join("tasks.json"),
                &cfg.kanban.label,
            )),
            other => anyhow::bail!("unknown kanban backend: {}", other),
        };
        tracing::info!(backend = backend.kind().as_str(), "kanban backend selected");
        Ok(Self::new(
            backend,
            coord,
            RetryPolicy::from_config(&cfg.coordination),
            cfg.coordination.lease_ttl_ms(),
        ))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn coordination(&self) -> &Arc<CoordinationState> {
        &self.coord
    }

    pub fn lease_ttl_ms(&self) -> i64 {
        self.lease_ttl_ms
    }

    // ---- 统一任务契约（薄委托） ----

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
        self.backend.list_tasks(filter).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, KanbanError> {
        self.backend.get_task(id).await
    }

    pub async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError> {
        self.backend.create_task(draft).await
    }

    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError> {
        self.backend.update_task(id, patch).await
    }

    pub async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Result<Task, KanbanError> {
        self.backend.update_task_status(id, status).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<bool, KanbanError> {
        self.backend.delete_task(id).await
    }

    pub async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError> {
        self.backend.add_comment(id, body).await
    }

    // ---- 租约协议 ----

    /// 注释写入的有界重试；所有租约写路径共用
    async fn write_state_comment(&self, id: &str, body: &str) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.add_comment(id, body).await {
                Ok(acked) => return acked,
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::debug!(id = %id, attempt, error = %err, "shared state write failed, will retry");
                    tokio::time::sleep(Duration::from_millis(self.retry.transient_delay_ms)).await;
                }
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "shared state write abandoned");
                    return false;
                }
            }
        }
    }

    /// 把租约写为任务最新注释；确认写入才返回 true
    pub async fn persist_shared_state(&self, id: &str, state: &SharedState) -> bool {
        self.write_state_comment(id, &encode_shared_state(state)).await
    }

    /// 读任务注释里最新的有效租约块；缺失、不可解析或资源不存在都返回 None。
    /// 已知缺失的资源进入负缓存窗口，窗口内不再发查询。
    pub async fn read_shared_state(&self, id: &str) -> Option<SharedState> {
        let miss_key = format!("state-miss:{}:{}", self.backend.kind().as_str(), id);
        if self.coord.backoff.should_skip(&miss_key) {
            return None;
        }
        match self.backend.comments(id).await {
            Ok(comments) => latest_shared_state(&comments),
            Err(KanbanError::NotFound(_)) => {
                self.coord
                    .backoff
                    .record_failure(&miss_key, FailureKind::Generic, "resource not found");
                None
            }
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "shared state read failed");
                None
            }
        }
    }

    /// 终态标记：绕过认领逻辑，写 ignored 租约 + 人类可读原因，
    /// 并尽力同步任务状态标签
    pub async fn mark_task_ignored(&self, id: &str, reason: &str) -> bool {
        let owner = crate::coordination::worker_owner_id("policy");
        let mut state = SharedState::new_claim(&owner, self.coord.now_ms());
        state.status = LeaseStatus::Ignored;
        let body = format!(
            "Task ignored: {}\n\n{}",
            reason,
            encode_shared_state(&state)
        );
        let written = self.write_state_comment(id, &body).await;
        if written {
            if let Err(err) = self.backend.update_task_status(id, TaskStatus::Ignored).await {
                tracing::warn!(id = %id, error = %err, "ignored label sync failed");
            }
        }
        written
    }

    /// 尝试认领：读最新租约、判定、写新租约。
    /// 判定与写入之间没有原子性，两个 worker 可能都认领成功，
    /// 接受为有界的罕见不一致（重复工作由执行层幂等上报收敛）。
    pub async fn try_claim(&self, id: &str, worker_owner_id: &str) -> Option<SharedState> {
        let existing = self.read_shared_state(id).await;
        let now = self.coord.now_ms();
        match claim_decision(existing.as_ref(), now, self.lease_ttl_ms) {
            ClaimDecision::Claimable => {
                let mut state = SharedState::new_claim(worker_owner_id, now);
                if let Some(prior) = existing {
                    // 续接前任的重试计数，过期回收不清零
                    state.retry_count = prior.retry_count;
                }
                if self.persist_shared_state(id, &state).await {
                    Some(state)
                } else {
                    tracing::debug!(id = %id, "lease not established this cycle");
                    None
                }
            }
            decision => {
                tracing::debug!(id = %id, decision = ?decision, "task not claimable");
                None
            }
        }
    }

    /// 心跳续约：刷新时间戳并置 working
    pub async fn heartbeat(&self, id: &str, state: &mut SharedState) -> bool {
        state.touch(self.coord.now_ms());
        state.status = LeaseStatus::Working;
        self.persist_shared_state(id, state).await
    }

    /// 完成：租约置 done 并同步任务状态
    pub async fn finish_task(&self, id: &str, state: &mut SharedState) -> bool {
        state.touch(self.coord.now_ms());
        state.status = LeaseStatus::Done;
        let written = self.persist_shared_state(id, state).await;
        if let Err(err) = self.backend.update_task_status(id, TaskStatus::Done).await {
            tracing::warn!(id = %id, error = %err, "done status sync failed");
        }
        written
    }

    /// 失败释放：重试计数 +1，心跳拨回 TTL 之前让租约立即过期，任务退回 todo
    pub async fn release_task(&self, id: &str, state: &mut SharedState) -> bool {
        state.retry_count += 1;
        state.status = LeaseStatus::Claimed;
        state.heartbeat_ms = self.coord.now_ms() - self.lease_ttl_ms - 1;
        let written = self.persist_shared_state(id, state).await;
        if let Err(err) = self.backend.update_task_status(id, TaskStatus::Todo).await {
            tracing::warn!(id = %id, error = %err, "todo status sync failed");
        }
        written
    }
}
