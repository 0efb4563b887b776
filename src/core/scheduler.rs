//! 调度主循环
//!
//! 周期性拉取任务、尝试认领、派发执行器、心跳续约、回写结果。
//! 协调状态（退避、无效 Owner）每轮与磁盘合并；心跳由本循环显式驱动，
//! 没有可能泄漏到测试外的隐藏定时器。列表失败、租约没拿到都只是
//! 「下一轮再试」，循环本身不崩溃。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinationSection;
use crate::coordination::worker_owner_id;
use crate::kanban::{KanbanAdapter, SharedState, Task, TaskFilter, TaskStatus};

/// 执行器边界：真实部署中由 Agent 会话管理器实现
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, task: &Task) -> Result<String, String>;
}

/// 调度器：单进程单循环，一轮最多执行一个任务
pub struct Scheduler {
    adapter: Arc<KanbanAdapter>,
    executor: Arc<dyn AgentExecutor>,
    worker_id: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        adapter: Arc<KanbanAdapter>,
        executor: Arc<dyn AgentExecutor>,
        worker_name: &str,
        cfg: &CoordinationSection,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            executor,
            worker_id: worker_owner_id(worker_name),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_secs.max(1)),
            cancel,
        }
    }

    /// 主循环：run_once + 轮询间隔，取消即退出
    pub async fn run(&self) {
        tracing::info!(worker = %self.worker_id, "scheduler started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.run_once().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::info!(worker = %self.worker_id, "scheduler stopped");
    }

    /// 单轮：合并协调状态、找可认领任务、认领并执行一个
    pub async fn run_once(&self) {
        self.adapter.coordination().reload();

        let tasks = match self.adapter.list_tasks(&TaskFilter::default()).await {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::warn!(error = %err, "task listing failed, will retry next cycle");
                return;
            }
        };

        for task in tasks.iter().filter(|t| t.status == TaskStatus::Todo) {
            let Some(mut lease) = self.adapter.try_claim(&task.id, &self.worker_id).await else {
                continue;
            };
            tracing::info!(task = %task.id, title = %task.title, "task claimed");
            if let Err(err) = self
                .adapter
                .update_task_status(&task.id, TaskStatus::InProgress)
                .await
            {
                tracing::warn!(task = %task.id, error = %err, "inprogress status sync failed");
            }
            self.execute_with_heartbeat(task, &mut lease).await;
            // 一轮只执行一个任务，其余留给下一轮（或兄弟进程）
            break;
        }
    }

    /// 执行任务，期间按间隔续约；完成 / 失败 / 取消都落到租约终写
    async fn execute_with_heartbeat(&self, task: &Task, lease: &mut SharedState) {
        let executor = Arc::clone(&self.executor);
        let task_clone = task.clone();
        let mut execution = Box::pin(async move { executor.run(&task_clone).await });

        loop {
            tokio::select! {
                result = &mut execution => {
                    match result {
                        Ok(summary) => {
                            tracing::info!(task = %task.id, "task completed");
                            if let Err(err) = self.adapter.add_comment(&task.id, &summary).await {
                                tracing::warn!(task = %task.id, error = %err, "completion comment failed");
                            }
                            self.adapter.finish_task(&task.id, lease).await;
                        }
                        Err(err) => {
                            tracing::warn!(task = %task.id, error = %err, "task failed, releasing lease");
                            self.adapter.release_task(&task.id, lease).await;
                        }
                    }
                    return;
                }
                _ = tokio::time::sleep(self.heartbeat_interval) => {
                    if !self.adapter.heartbeat(&task.id, lease).await {
                        tracing::warn!(task = %task.id, "heartbeat write failed");
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!(task = %task.id, "cancelled mid-task, releasing lease");
                    self.adapter.release_task(&task.id, lease).await;
                    return;
                }
            }
        }
    }
}
