//! 看板层：任务模型、后端抽象与租约协议
//!
//! - **task**: 后端无关的工作项与规范状态
//! - **payload**: list 响应的形状归一化
//! - **backend**: TaskBackend 契约
//! - **github / jira / internal**: 三个后端实现
//! - **shared_state**: 租约记录的编解码与认领判定
//! - **adapter**: 门面，统一契约 + 租约协议

pub mod adapter;
pub mod backend;
pub mod github;
pub mod internal;
pub mod jira;
pub mod payload;
pub mod shared_state;
pub mod task;

pub use adapter::KanbanAdapter;
pub use backend::TaskBackend;
pub use shared_state::{
    claim_decision, decode_shared_state, encode_shared_state, latest_shared_state, ClaimDecision,
    LeaseStatus, SharedState,
};
pub use task::{BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus};

use crate::config::CoordinationSection;

/// 瞬时失败重试策略：有界次数 + 固定短延迟（限流用更长的延迟）
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub transient_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(cfg: &CoordinationSection) -> Self {
        Self {
            transient_delay_ms: cfg.transient_retry_delay_ms,
            rate_limit_delay_ms: cfg.rate_limit_retry_delay_ms,
            // 至少尝试一次
            max_attempts: cfg.transient_retry_count.max(1),
        }
    }
}
