//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BOSUN__*` 覆盖
//! （双下划线表示嵌套，如 `BOSUN__KANBAN__BACKEND=jira`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::coordination::BackoffWindows;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub kanban: KanbanSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
    #[serde(default)]
    pub jira: JiraSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            kanban: KanbanSection::default(),
            coordination: CoordinationSection::default(),
            jira: JiraSection::default(),
        }
    }
}

/// [kanban] 段：后端选择与 GitHub 作用域
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KanbanSection {
    /// 后端：github / jira / internal
    pub backend: String,
    /// GitHub 仓库 slug（owner/repo）
    pub repo: Option<String>,
    /// 属于编排器的任务标签
    pub label: String,
    /// GitHub project 编号（可选，设置后列表走 project item-list）
    pub project: Option<String>,
    /// project 调用的 --owner 作用域（可选）
    pub owner: Option<String>,
    /// 新建任务的默认 assignee
    pub default_assignee: Option<String>,
    /// gh CLI 单次调用超时（秒）
    pub cli_timeout_secs: u64,
    /// 本 worker 名（owner_id 的后半段）
    pub worker_name: String,
}

impl Default for KanbanSection {
    fn default() -> Self {
        Self {
            backend: "internal".to_string(),
            repo: None,
            label: "bosun".to_string(),
            project: None,
            owner: None,
            default_assignee: None,
            cli_timeout_secs: 30,
            worker_name: "worker-1".to_string(),
        }
    }
}

/// [coordination] 段：退避窗口、重试与租约参数
///
/// 窗口配置为 0 时回退到通用命令窗口（见 BackoffWindows），防止误配关掉退避。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinationSection {
    /// owner 重试窗口（秒）
    pub owner_retry_secs: u64,
    /// 通用命令退避窗口（秒）
    pub command_backoff_secs: u64,
    /// 模式回退窗口（秒），如 project 列表失败后改走 issue 列表
    pub mode_fallback_secs: u64,
    /// 限流退避窗口（秒）
    pub rate_limit_backoff_secs: u64,
    /// 告警节流窗口（秒）
    pub warn_throttle_secs: u64,
    /// 限流后单次重试延迟（毫秒）
    pub rate_limit_retry_delay_ms: u64,
    /// 瞬时失败单次重试延迟（毫秒）
    pub transient_retry_delay_ms: u64,
    /// 瞬时失败最大尝试次数
    pub transient_retry_count: u32,
    /// 租约 TTL（秒）：心跳超龄即视为过期可回收
    pub lease_ttl_secs: u64,
    /// 心跳间隔（秒）
    pub heartbeat_secs: u64,
    /// 调度轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 共享状态文件目录
    pub state_dir: PathBuf,
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            owner_retry_secs: 300,
            command_backoff_secs: 60,
            mode_fallback_secs: 180,
            rate_limit_backoff_secs: 300,
            warn_throttle_secs: 300,
            rate_limit_retry_delay_ms: 5_000,
            transient_retry_delay_ms: 2_000,
            transient_retry_count: 3,
            lease_ttl_secs: 300,
            heartbeat_secs: 60,
            poll_interval_secs: 30,
            state_dir: PathBuf::from(".bosun"),
        }
    }
}

impl CoordinationSection {
    pub fn backoff_windows(&self) -> BackoffWindows {
        BackoffWindows {
            owner_retry_ms: (self.owner_retry_secs * 1000) as i64,
            rate_limit_ms: (self.rate_limit_backoff_secs * 1000) as i64,
            command_ms: (self.command_backoff_secs * 1000) as i64,
            mode_fallback_ms: (self.mode_fallback_secs * 1000) as i64,
            warn_throttle_ms: (self.warn_throttle_secs * 1000) as i64,
        }
    }

    pub fn lease_ttl_ms(&self) -> i64 {
        (self.lease_ttl_secs * 1000) as i64
    }
}

/// [jira] 段：REST 端点与项目；凭据走环境变量 JIRA_EMAIL / JIRA_API_TOKEN
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraSection {
    /// 站点根（如 https://example.atlassian.net）
    pub base_url: Option<String>,
    /// 项目 key（如 BOS）
    pub project_key: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for JiraSection {
    fn default() -> Self {
        Self {
            base_url: None,
            project_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BOSUN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BOSUN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BOSUN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
