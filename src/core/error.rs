//! 看板层错误分类
//!
//! 分类决定重试与退避策略：瞬时类本地有界重试后降级为空结果 / false，
//! InvalidIdentifier 与未分类后端错误原样上抛。调度循环的调用方永远
//! 能继续下一轮，不因后端故障崩溃。

use thiserror::Error;

use crate::coordination::FailureKind;

/// 看板后端操作错误
#[derive(Error, Debug)]
pub enum KanbanError {
    /// 格式错误的任务标识：立即失败，不重试
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 配置的 owner 作用域被后端拒绝
    #[error("Owner scope rejected: {0}")]
    OwnerType(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 网络、超时、5xx、命令非零退出等
    #[error("Transient backend failure: {0}")]
    Transient(String),

    #[error("Backend error: {0}")]
    Permanent(String),
}

impl KanbanError {
    /// 可本地重试的类别
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }

    /// 映射到退避分类；不参与退避的类别返回 None
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::OwnerType(_) => Some(FailureKind::OwnerType),
            Self::RateLimited(_) => Some(FailureKind::RateLimited),
            Self::Transient(_) => Some(FailureKind::Generic),
            _ => None,
        }
    }
}
