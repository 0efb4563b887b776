//! 退避登记表
//!
//! 按「命令类型 + 资源」键记录冷却窗口；持久化到共享 JSON 文件，
//! 与磁盘合并时按键取较晚的 untilMs（只延长、不缩短），兄弟进程借此收敛出
//! 「现在不要重试什么」的共同视图，无需任何 IPC。
//! 同一机制还承担告警节流：同一键在窗口内最多输出一次 warning。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::coordination::Clock;

/// 窗口默认值（毫秒）
pub const DEFAULT_OWNER_RETRY_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_RATE_LIMIT_BACKOFF_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_COMMAND_BACKOFF_MS: i64 = 60 * 1000;
pub const DEFAULT_MODE_FALLBACK_MS: i64 = 3 * 60 * 1000;
pub const DEFAULT_WARN_THROTTLE_MS: i64 = 5 * 60 * 1000;

/// 失败分类：决定冷却窗口长短，OwnerType 还会升级到无效 Owner 追踪
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Owner 作用域被后端拒绝
    OwnerType,
    /// 限流，使用加长窗口
    RateLimited,
    /// 一般瞬时失败（网络、超时、命令非零退出）
    Generic,
}

/// 单键冷却记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffEntry {
    /// 此时间（epoch 毫秒）之前跳过该键
    pub until_ms: i64,
    pub reason: String,
}

/// 各类窗口时长（毫秒）
///
/// 配置为 0 的窗口回退到通用命令窗口，防止误配把退避整个关掉造成重试风暴。
#[derive(Debug, Clone)]
pub struct BackoffWindows {
    pub owner_retry_ms: i64,
    pub rate_limit_ms: i64,
    pub command_ms: i64,
    pub mode_fallback_ms: i64,
    pub warn_throttle_ms: i64,
}

impl Default for BackoffWindows {
    fn default() -> Self {
        Self {
            owner_retry_ms: DEFAULT_OWNER_RETRY_MS,
            rate_limit_ms: DEFAULT_RATE_LIMIT_BACKOFF_MS,
            command_ms: DEFAULT_COMMAND_BACKOFF_MS,
            mode_fallback_ms: DEFAULT_MODE_FALLBACK_MS,
            warn_throttle_ms: DEFAULT_WARN_THROTTLE_MS,
        }
    }
}

impl BackoffWindows {
    fn effective(ms: i64, fallback: i64) -> i64 {
        if ms <= 0 {
            fallback
        } else {
            ms
        }
    }

    fn command_window(&self) -> i64 {
        Self::effective(self.command_ms, DEFAULT_COMMAND_BACKOFF_MS)
    }

    /// 按失败分类取窗口
    pub fn window_for(&self, kind: FailureKind) -> i64 {
        match kind {
            FailureKind::OwnerType => Self::effective(self.owner_retry_ms, self.command_window()),
            FailureKind::RateLimited => Self::effective(self.rate_limit_ms, self.command_window()),
            FailureKind::Generic => self.command_window(),
        }
    }

    pub fn mode_fallback_window(&self) -> i64 {
        Self::effective(self.mode_fallback_ms, self.command_window())
    }

    pub fn warn_window(&self) -> i64 {
        Self::effective(self.warn_throttle_ms, self.command_window())
    }
}

/// 退避登记表：进程内共享一份，经共享文件与兄弟进程合并
pub struct BackoffRegistry {
    clock: Arc<dyn Clock>,
    path: PathBuf,
    windows: BackoffWindows,
    entries: Mutex<HashMap<String, BackoffEntry>>,
}

impl BackoffRegistry {
    /// 构造时立即尝试载入共享文件；文件缺失或损坏回退为空表
    pub fn new(clock: Arc<dyn Clock>, path: impl AsRef<Path>, windows: BackoffWindows) -> Self {
        let registry = Self {
            clock,
            path: path.as_ref().to_path_buf(),
            windows,
            entries: Mutex::new(HashMap::new()),
        };
        if let Err(err) = registry.reload_and_merge() {
            tracing::warn!(error = %err, path = %registry.path.display(), "backoff state load failed, starting empty");
        }
        registry
    }

    /// 该键是否仍在冷却窗口内
    pub fn should_skip(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let entries = self.entries.lock().expect("backoff entries lock poisoned");
        entries.get(key).map(|e| now < e.until_ms).unwrap_or(false)
    }

    /// 距离窗口结束还剩多少毫秒；不在窗口内返回 0
    pub fn remaining_ms(&self, key: &str) -> i64 {
        let now = self.clock.now_ms();
        let entries = self.entries.lock().expect("backoff entries lock poisoned");
        entries
            .get(key)
            .map(|e| (e.until_ms - now).max(0))
            .unwrap_or(0)
    }

    /// 记录一次已分类的失败并持久化；返回窗口结束时间
    pub fn record_failure(&self, key: &str, kind: FailureKind, reason: &str) -> i64 {
        let until = self.record_window(key, self.windows.window_for(kind), reason);
        tracing::debug!(key = %key, kind = ?kind, until_ms = until, "backoff recorded");
        until
    }

    /// 记录一次模式回退（如 project 列表失败后改走 issue 列表）
    pub fn record_mode_fallback(&self, key: &str, reason: &str) -> i64 {
        let until = self.record_window(key, self.windows.mode_fallback_window(), reason);
        tracing::debug!(key = %key, until_ms = until, "mode fallback recorded");
        until
    }

    fn record_window(&self, key: &str, window_ms: i64, reason: &str) -> i64 {
        let now = self.clock.now_ms();
        let candidate = now + window_ms;
        let until = {
            let mut entries = self.entries.lock().expect("backoff entries lock poisoned");
            let entry = entries.entry(key.to_string()).or_insert_with(|| BackoffEntry {
                until_ms: 0,
                reason: String::new(),
            });
            // 只延长，不缩短
            if candidate > entry.until_ms {
                entry.until_ms = candidate;
                entry.reason = reason.to_string();
            }
            entry.until_ms
        };
        // 持久化失败仅在此边界告警，协调状态是建议性缓存
        if let Err(err) = self.persist() {
            tracing::warn!(error = %err, "backoff state persist failed");
        }
        until
    }

    /// 节流告警：同一键在窗口内最多输出一次；节流记录只保留在内存
    pub fn warn_throttled(&self, key: &str, message: &str) {
        let throttle_key = format!("warn:{}", key);
        let now = self.clock.now_ms();
        {
            let mut entries = self.entries.lock().expect("backoff entries lock poisoned");
            if let Some(entry) = entries.get(&throttle_key) {
                if now < entry.until_ms {
                    return;
                }
            }
            entries.insert(
                throttle_key,
                BackoffEntry {
                    until_ms: now + self.windows.warn_window(),
                    reason: message.to_string(),
                },
            );
        }
        tracing::warn!(key = %key, "{}", message);
    }

    /// 重新读共享文件并按键取较晚的 untilMs 合并进内存
    pub fn reload_and_merge(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let on_disk: HashMap<String, BackoffEntry> = serde_json::from_str(&data)?;
        let mut entries = self.entries.lock().expect("backoff entries lock poisoned");
        merge_later_wins(&mut entries, on_disk);
        Ok(())
    }

    /// 先与磁盘合并再整体写回，避免覆盖兄弟进程刚延长的窗口
    pub fn persist(&self) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().expect("backoff entries lock poisoned");
        if self.path.exists() {
            if let Ok(data) = std::fs::read_to_string(&self.path) {
                if let Ok(on_disk) = serde_json::from_str::<HashMap<String, BackoffEntry>>(&data) {
                    merge_later_wins(&mut entries, on_disk);
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&*entries)?)?;
        Ok(())
    }
}

fn merge_later_wins(target: &mut HashMap<String, BackoffEntry>, incoming: HashMap<String, BackoffEntry>) {
    for (key, entry) in incoming {
        match target.get_mut(&key) {
            Some(existing) => {
                if entry.until_ms > existing.until_ms {
                    *existing = entry;
                }
            }
            None => {
                target.insert(key, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::ManualClock;

    fn registry_at(dir: &Path, clock: Arc<ManualClock>) -> BackoffRegistry {
        BackoffRegistry::new(clock, dir.join("backoff_state.json"), BackoffWindows::default())
    }

    #[test]
    fn test_record_then_skip_until_window_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = registry_at(dir.path(), Arc::clone(&clock));

        assert!(!registry.should_skip("issue-list"));
        registry.record_failure("issue-list", FailureKind::Generic, "exit 1");
        assert!(registry.should_skip("issue-list"));

        clock.advance(DEFAULT_COMMAND_BACKOFF_MS + 1);
        assert!(!registry.should_skip("issue-list"));
    }

    #[test]
    fn test_rate_limit_uses_extended_window() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let registry = registry_at(dir.path(), Arc::clone(&clock));

        registry.record_failure("api", FailureKind::RateLimited, "rate limit");
        clock.advance(DEFAULT_COMMAND_BACKOFF_MS + 1);
        // 命令窗口已过，但限流窗口更长
        assert!(registry.should_skip("api"));
        clock.advance(DEFAULT_RATE_LIMIT_BACKOFF_MS);
        assert!(!registry.should_skip("api"));
    }

    #[test]
    fn test_zero_window_falls_back_to_command_default() {
        let windows = BackoffWindows {
            owner_retry_ms: 0,
            rate_limit_ms: 0,
            command_ms: 0,
            mode_fallback_ms: 0,
            warn_throttle_ms: 0,
        };
        assert_eq!(windows.window_for(FailureKind::Generic), DEFAULT_COMMAND_BACKOFF_MS);
        assert_eq!(windows.window_for(FailureKind::OwnerType), DEFAULT_COMMAND_BACKOFF_MS);
        assert_eq!(windows.window_for(FailureKind::RateLimited), DEFAULT_COMMAND_BACKOFF_MS);
        assert_eq!(windows.mode_fallback_window(), DEFAULT_COMMAND_BACKOFF_MS);
    }

    #[test]
    fn test_merge_never_shortens_sibling_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        // 兄弟进程先写入一个较长的冷却
        let sibling = registry_at(dir.path(), Arc::clone(&clock));
        sibling.record_failure("api", FailureKind::RateLimited, "rate limit");

        // 本进程记录同键的较短冷却后重载，取较晚的 untilMs
        let local = registry_at(dir.path(), Arc::clone(&clock));
        local.record_failure("api", FailureKind::Generic, "exit 1");
        local.reload_and_merge().unwrap();

        clock.advance(DEFAULT_COMMAND_BACKOFF_MS + 1);
        assert!(local.should_skip("api"));
    }

    #[test]
    fn test_sibling_process_inherits_cooldown_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        let first = registry_at(dir.path(), Arc::clone(&clock));
        first.record_failure("project-items:5", FailureKind::Generic, "exit 1");

        // 新构造的实例（模拟兄弟进程）直接从文件继承冷却
        let second = registry_at(dir.path(), Arc::clone(&clock));
        assert!(second.should_skip("project-items:5"));
    }

    #[test]
    fn test_warn_throttled_once_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let registry = registry_at(dir.path(), Arc::clone(&clock));

        registry.warn_throttled("shape:project-items:5", "unexpected shape");
        // 窗口内第二次：节流键已登记
        assert!(registry.should_skip("warn:shape:project-items:5"));

        clock.advance(DEFAULT_WARN_THROTTLE_MS + 1);
        assert!(!registry.should_skip("warn:shape:project-items:5"));
    }

    #[test]
    fn test_missing_or_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        std::fs::write(dir.path().join("backoff_state.json"), "not json").unwrap();
        let registry = registry_at(dir.path(), clock);
        assert!(!registry.should_skip("anything"));
    }
}
