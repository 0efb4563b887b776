//! Bosun - 看板协调层
//!
//! 入口：初始化日志与配置，构造协调状态与 KanbanAdapter，运行调度主循环。

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use bosun::config::load_config;
use bosun::coordination::{CoordinationState, SystemClock};
use bosun::core::{AgentExecutor, Scheduler};
use bosun::kanban::{KanbanAdapter, Task};

/// 占位执行器：真实部署中由 Agent 会话管理器实现 AgentExecutor
struct LoggingExecutor;

#[async_trait::async_trait]
impl AgentExecutor for LoggingExecutor {
    async fn run(&self, task: &Task) -> Result<String, String> {
        tracing::info!(task = %task.id, title = %task.title, "dispatching task to executor");
        Ok(format!("Acknowledged task {}", task.id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bosun::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let configured_owners: Vec<String> = cfg.kanban.owner.iter().cloned().collect();
    let coord = Arc::new(CoordinationState::new(
        &cfg.coordination,
        configured_owners,
        Arc::new(SystemClock),
    ));
    let adapter = Arc::new(
        KanbanAdapter::from_config(&cfg, Arc::clone(&coord))
            .context("Failed to create kanban adapter")?,
    );

    // Ctrl-C 触发取消，让循环在安全点退出并释放租约
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("ctrl-c received, shutting down");
            cancel.cancel();
        });
    }

    let scheduler = Scheduler::new(
        adapter,
        Arc::new(LoggingExecutor),
        &cfg.kanban.worker_name,
        &cfg.coordination,
        cancel,
    );
    scheduler.run().await;

    Ok(())
}
