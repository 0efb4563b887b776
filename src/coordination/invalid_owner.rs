//! 无效 Owner 追踪
//!
//! 记录后端拒绝过的 owner 作用域；当配置的 owner 全部被证明无效时进入全局冷却。
//! 持久化并与兄弟进程做并集合并：不同进程可能各自发现不同的无效 owner，
//! 重载只增不减。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::coordination::Clock;

/// 共享文件里的状态：{owners: [...], allInvalidUntil}
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidOwnerState {
    pub owners: BTreeSet<String>,
    pub all_invalid_until: i64,
}

/// 无效 Owner 追踪器：每进程一份，经共享文件与兄弟进程合并
pub struct InvalidOwnerTracker {
    clock: Arc<dyn Clock>,
    path: PathBuf,
    owner_retry_ms: i64,
    /// 配置里声明的全部 owner；全部失效时触发全局冷却
    configured: Vec<String>,
    state: Mutex<InvalidOwnerState>,
}

impl InvalidOwnerTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        path: impl AsRef<Path>,
        owner_retry_ms: i64,
        configured: Vec<String>,
    ) -> Self {
        let tracker = Self {
            clock,
            path: path.as_ref().to_path_buf(),
            owner_retry_ms,
            configured,
            state: Mutex::new(InvalidOwnerState::default()),
        };
        if let Err(err) = tracker.reload() {
            tracing::warn!(error = %err, path = %tracker.path.display(), "invalid owner state load failed, starting empty");
        }
        tracker
    }

    /// 登记一个被拒绝的 owner；配置的 owner 全部失效时开启全局冷却
    pub fn mark_invalid(&self, owner: &str) {
        {
            let mut state = self.state.lock().expect("invalid owner state lock poisoned");
            state.owners.insert(owner.to_string());
            let all_known_invalid = !self.configured.is_empty()
                && self.configured.iter().all(|o| state.owners.contains(o));
            if all_known_invalid {
                let until = self.clock.now_ms() + self.owner_retry_ms;
                if until > state.all_invalid_until {
                    state.all_invalid_until = until;
                }
            }
        }
        tracing::info!(owner = %owner, "owner marked invalid");
        if let Err(err) = self.persist() {
            tracing::warn!(error = %err, "invalid owner state persist failed");
        }
    }

    /// 该 owner 是否已知无效（含全局冷却）
    pub fn is_invalid(&self, owner: &str) -> bool {
        let state = self.state.lock().expect("invalid owner state lock poisoned");
        state.owners.contains(owner) || self.clock.now_ms() < state.all_invalid_until
    }

    /// 是否处于「全部 owner 无效」的全局冷却中
    pub fn all_invalid(&self) -> bool {
        let state = self.state.lock().expect("invalid owner state lock poisoned");
        self.clock.now_ms() < state.all_invalid_until
    }

    /// 并集合并磁盘状态：本地不会移除兄弟进程添加的条目
    pub fn reload(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let on_disk: InvalidOwnerState = serde_json::from_str(&data)?;
        let mut state = self.state.lock().expect("invalid owner state lock poisoned");
        merge_union(&mut state, on_disk);
        Ok(())
    }

    /// 先与磁盘并集合并再写回完整状态
    pub fn persist(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("invalid owner state lock poisoned");
        if self.path.exists() {
            if let Ok(data) = std::fs::read_to_string(&self.path) {
                if let Ok(on_disk) = serde_json::from_str::<InvalidOwnerState>(&data) {
                    merge_union(&mut state, on_disk);
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&*state)?)?;
        Ok(())
    }

    /// 当前状态快照（测试与诊断用）
    pub fn snapshot(&self) -> InvalidOwnerState {
        self.state
            .lock()
            .expect("invalid owner state lock poisoned")
            .clone()
    }
}

fn merge_union(target: &mut InvalidOwnerState, incoming: InvalidOwnerState) {
    target.owners.extend(incoming.owners);
    if incoming.all_invalid_until > target.all_invalid_until {
        target.all_invalid_until = incoming.all_invalid_until;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::backoff::DEFAULT_OWNER_RETRY_MS;
    use crate::coordination::ManualClock;

    fn tracker_at(
        dir: &Path,
        clock: Arc<ManualClock>,
        configured: Vec<String>,
    ) -> InvalidOwnerTracker {
        InvalidOwnerTracker::new(
            clock,
            dir.join("invalid_owners.json"),
            DEFAULT_OWNER_RETRY_MS,
            configured,
        )
    }

    #[test]
    fn test_mark_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let tracker = tracker_at(dir.path(), clock, vec!["acme".to_string(), "beta".to_string()]);

        assert!(!tracker.is_invalid("acme"));
        tracker.mark_invalid("acme");
        assert!(tracker.is_invalid("acme"));
        // 还有未失效的配置 owner，不触发全局冷却
        assert!(!tracker.all_invalid());
    }

    #[test]
    fn test_all_configured_invalid_starts_global_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let tracker = tracker_at(dir.path(), Arc::clone(&clock), vec!["acme".to_string()]);

        tracker.mark_invalid("acme");
        assert!(tracker.all_invalid());
        // 全局冷却期间，未见过的 owner 也视为无效
        assert!(tracker.is_invalid("unseen"));

        clock.advance(DEFAULT_OWNER_RETRY_MS + 1);
        assert!(!tracker.all_invalid());
        assert!(!tracker.is_invalid("unseen"));
        // 明确标记过的仍然无效
        assert!(tracker.is_invalid("acme"));
    }

    #[test]
    fn test_reload_is_union_merge() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        let sibling = tracker_at(dir.path(), Arc::clone(&clock), vec![]);
        sibling.mark_invalid("from-sibling");

        let local = tracker_at(dir.path(), Arc::clone(&clock), vec![]);
        local.mark_invalid("from-local");
        local.reload().unwrap();

        let snapshot = local.snapshot();
        assert!(snapshot.owners.contains("from-sibling"));
        assert!(snapshot.owners.contains("from-local"));
    }

    #[test]
    fn test_fresh_instance_inherits_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        let first = tracker_at(dir.path(), Arc::clone(&clock), vec![]);
        first.mark_invalid("acme");

        let second = tracker_at(dir.path(), clock, vec![]);
        assert!(second.is_invalid("acme"));
    }
}
