//! 跨进程协调状态
//!
//! CoordinationState 每进程构造一次，持有退避登记表、无效 Owner 追踪与请求去重器，
//! 由各后端实例共享（替代模块级可变全局）。进程之间没有 IPC，
//! 只通过共享状态文件与外部后端间接收敛。

pub mod backoff;
pub mod clock;
pub mod dedupe;
pub mod invalid_owner;

use std::sync::Arc;

pub use backoff::{BackoffEntry, BackoffRegistry, BackoffWindows, FailureKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedupe::RequestDeduper;
pub use invalid_owner::{InvalidOwnerState, InvalidOwnerTracker};

use crate::config::CoordinationSection;

/// 协调状态：退避、无效 Owner、去重，共用同一注入时钟
pub struct CoordinationState {
    clock: Arc<dyn Clock>,
    pub backoff: BackoffRegistry,
    pub invalid_owners: InvalidOwnerTracker,
    pub deduper: RequestDeduper,
}

impl CoordinationState {
    /// 按配置构造；状态文件放在 cfg.state_dir 下
    pub fn new(
        cfg: &CoordinationSection,
        configured_owners: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let windows = cfg.backoff_windows();
        let owner_retry_ms = windows.window_for(FailureKind::OwnerType);
        let backoff = BackoffRegistry::new(
            Arc::clone(&clock),
            cfg.state_dir.join("backoff_state.json"),
            windows,
        );
        let invalid_owners = InvalidOwnerTracker::new(
            Arc::clone(&clock),
            cfg.state_dir.join("invalid_owners.json"),
            owner_retry_ms,
            configured_owners,
        );
        Self {
            clock,
            backoff,
            invalid_owners,
            deduper: RequestDeduper::new(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// 与磁盘上的兄弟进程状态合并；由调度循环显式触发
    pub fn reload(&self) {
        if let Err(err) = self.backoff.reload_and_merge() {
            tracing::warn!(error = %err, "backoff state reload failed");
        }
        if let Err(err) = self.invalid_owners.reload() {
            tracing::warn!(error = %err, "invalid owner state reload failed");
        }
    }
}

/// owner_id 约定为 "<host>/<worker>"
pub fn worker_owner_id(worker: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}/{}", host, worker)
}
