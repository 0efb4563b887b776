//! GitHub 后端
//!
//! 经由本地 gh CLI 访问 issue 与 project：显式参数向量，绝不拼 shell 字符串，
//! 单次调用带超时。gh 的人类可读输出（如 "✓ Closed issue #42"）不猜语义，
//! 统一补一次 issue view --json 取权威结构化状态。
//! project item-list / field-list 走请求去重 + 载荷归一化；
//! owner 作用域被拒时在同一调用序列内去掉 --owner 重试一次，并登记无效 owner。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::coordination::{CoordinationState, FailureKind};
use crate::core::KanbanError;
use crate::kanban::payload::normalize_list_payload;
use crate::kanban::task::{
    BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus, STATUS_LABEL_IGNORED,
    STATUS_LABEL_IN_PROGRESS,
};
use crate::kanban::{RetryPolicy, TaskBackend};

/// issue view 统一要的字段集
const ISSUE_JSON_FIELDS: &str = "number,title,body,state,labels,assignees,url";

/// CLI 一次调用的原始输出
#[derive(Debug, Clone)]
pub struct CliOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// gh 调用抽象；测试注入脚本化的 Mock
#[async_trait]
pub trait GhRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<CliOutput, String>;
}

/// 真实 gh CLI：tokio 子进程 + 超时
pub struct GhCli {
    timeout_secs: u64,
}

impl GhCli {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl GhRunner for GhCli {
    async fn run(&self, args: &[String]) -> Result<CliOutput, String> {
        tracing::debug!(args = ?args, "gh invoke");
        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new("gh").args(args).output(),
        )
        .await
        .map_err(|_| format!("gh timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("gh spawn failed: {}", e))?;

        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// 按 stderr 内容分类 gh 失败；认不出的非零退出按一般瞬时失败走短退避
fn classify_gh_failure(stderr: &str) -> KanbanError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if lower.contains("rate limit") || lower.contains("http 429") {
        KanbanError::RateLimited(message)
    } else if lower.contains("unknown owner type")
        || lower.contains("could not resolve to an organization")
        || lower.contains("could not resolve to a user")
    {
        KanbanError::OwnerType(message)
    } else if lower.contains("not found")
        || lower.contains("no issues matched")
        || lower.contains("http 404")
    {
        KanbanError::NotFound(message)
    } else {
        KanbanError::Transient(message)
    }
}

/// 带退避检查与有界重试的单命令执行；最终失败时按分类记入退避登记表
async fn run_gh_with_retries(
    runner: Arc<dyn GhRunner>,
    coord: Arc<CoordinationState>,
    retry: RetryPolicy,
    key: String,
    args: Vec<String>,
) -> Result<String, KanbanError> {
    if coord.backoff.should_skip(&key) {
        return Err(KanbanError::Transient(format!(
            "backoff window active for {}",
            key
        )));
    }
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match runner.run(&args).await {
            Ok(out) if out.success => return Ok(out.stdout),
            Ok(out) => classify_gh_failure(&out.stderr),
            Err(e) => KanbanError::Transient(e),
        };
        if err.is_retryable() && attempt < retry.max_attempts {
            let delay_ms = match err {
                KanbanError::RateLimited(_) => retry.rate_limit_delay_ms,
                _ => retry.transient_delay_ms,
            };
            tracing::debug!(key = %key, attempt, error = %err, "gh call failed, will retry");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            continue;
        }
        if let Some(kind) = err.failure_kind() {
            coord.backoff.record_failure(&key, kind, &err.to_string());
        }
        return Err(err);
    }
}

/// project 的 Status 字段及其选项，按 project 缓存一个进程生命周期
#[derive(Debug, Clone)]
pub struct ProjectFields {
    pub status_field_id: String,
    /// (option id, 显示名)
    pub status_options: Vec<(String, String)>,
}

impl ProjectFields {
    /// 找与规范状态对应的选项 id
    pub fn option_for(&self, status: TaskStatus) -> Option<&str> {
        self.status_options
            .iter()
            .find(|(_, name)| TaskStatus::parse_column(name) == Some(status))
            .map(|(id, _)| id.as_str())
    }
}

/// GitHub 后端
pub struct GithubBackend {
    repo: String,
    label: String,
    project: Option<String>,
    owner: Option<String>,
    default_assignee: Option<String>,
    runner: Arc<dyn GhRunner>,
    coord: Arc<CoordinationState>,
    retry: RetryPolicy,
    field_cache: Mutex<HashMap<String, ProjectFields>>,
}

impl GithubBackend {
    pub fn new(
        repo: String,
        label: String,
        project: Option<String>,
        owner: Option<String>,
        default_assignee: Option<String>,
        runner: Arc<dyn GhRunner>,
        coord: Arc<CoordinationState>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            label,
            project,
            owner,
            default_assignee,
            runner,
            coord,
            retry,
            field_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &AppConfig, coord: Arc<CoordinationState>) -> anyhow::Result<Self> {
        let repo = cfg
            .kanban
            .repo
            .clone()
            .ok_or_else(|| anyhow::anyhow!("kanban.repo is required for the github backend"))?;
        Ok(Self::new(
            repo,
            cfg.kanban.label.clone(),
            cfg.kanban.project.clone(),
            cfg.kanban.owner.clone(),
            cfg.kanban.default_assignee.clone(),
            Arc::new(GhCli::new(cfg.kanban.cli_timeout_secs)),
            coord,
            RetryPolicy::from_config(&cfg.coordination),
        ))
    }

    async fn run_gh(&self, key: &str, args: Vec<String>) -> Result<String, KanbanError> {
        run_gh_with_retries(
            Arc::clone(&self.runner),
            Arc::clone(&self.coord),
            self.retry.clone(),
            key.to_string(),
            args,
        )
        .await
    }

    /// issue list 路径（project 未配置或其回退窗口生效时）
    async fn list_issue_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
        let mut args = string_args(&["issue", "list", "--repo", &self.repo, "--state", "all"]);
        let labels = if filter.labels.is_empty() {
            std::slice::from_ref(&self.label)
        } else {
            &filter.labels[..]
        };
        for label in labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        args.extend(string_args(&["--json", ISSUE_JSON_FIELDS, "--limit", "100"]));

        let key = format!("issue-list:{}", self.repo);
        let stdout = self.run_gh(&key, args).await?;
        let raw = parse_json(&stdout)?;
        let issues = normalize_list_payload(&self.coord.backoff, &key, &raw);
        Ok(issues
            .iter()
            .filter_map(|issue| task_from_issue(issue, &self.repo))
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .collect())
    }

    /// project item-list 路径：去重 + 归一化 + owner 回退
    async fn list_project_tasks(
        &self,
        project: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, KanbanError> {
        let mode_key = format!("mode:project:{}", project);
        if self.coord.backoff.should_skip(&mode_key) {
            // project 列表最近失败过，窗口内直接走 issue 列表
            tracing::debug!(project = %project, "project list in fallback window, using issue list");
            return self.list_issue_tasks(filter).await;
        }
        match self.fetch_project_items(project).await {
            Ok(raw) => {
                let key = format!("project-items:{}", project);
                let items = normalize_list_payload(&self.coord.backoff, &key, &raw);
                Ok(items
                    .iter()
                    .filter_map(|item| task_from_project_item(item, &self.repo, &self.label))
                    .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
                    .collect())
            }
            Err(err) => {
                self.coord
                    .backoff
                    .record_mode_fallback(&mode_key, &err.to_string());
                tracing::warn!(project = %project, error = %err, "project item list failed, falling back to issue list");
                self.list_issue_tasks(filter).await
            }
        }
    }

    /// 取 project item 原始载荷；并发同键调用共享一个 in-flight 请求
    pub async fn fetch_project_items(&self, project: &str) -> Result<Value, KanbanError> {
        let owner = self
            .owner
            .clone()
            .filter(|o| !self.coord.invalid_owners.is_invalid(o));
        let dedupe_key = format!("project-items:{}", project);
        let runner = Arc::clone(&self.runner);
        let coord = Arc::clone(&self.coord);
        let retry = self.retry.clone();
        let project = project.to_string();
        self.coord
            .deduper
            .dedupe(&dedupe_key, move || {
                fetch_project_items_raw(runner, coord, retry, project, owner).boxed()
            })
            .await
            .map_err(KanbanError::Transient)
    }

    /// project 的 Status 字段定义；进程内按 project 缓存
    pub async fn project_fields(&self, project: &str) -> Result<ProjectFields, KanbanError> {
        if let Some(hit) = self
            .field_cache
            .lock()
            .expect("field cache lock poisoned")
            .get(project)
        {
            return Ok(hit.clone());
        }

        let key = format!("project-fields:{}", project);
        let runner = Arc::clone(&self.runner);
        let coord = Arc::clone(&self.coord);
        let retry = self.retry.clone();
        let project_arg = project.to_string();
        let key_arg = key.clone();
        let raw = self
            .coord
            .deduper
            .dedupe(&key, move || {
                async move {
                    let args = string_args(&[
                        "project",
                        "field-list",
                        &project_arg,
                        "--format",
                        "json",
                    ]);
                    let stdout = run_gh_with_retries(runner, coord, retry, key_arg, args)
                        .await
                        .map_err(|e| e.to_string())?;
                    serde_json::from_str(&stdout)
                        .map_err(|e| format!("unparsable field list: {}", e))
                }
                .boxed()
            })
            .await
            .map_err(KanbanError::Transient)?;

        let fields = normalize_list_payload(&self.coord.backoff, &key, &raw);
        let status_field = fields
            .iter()
            .find(|f| {
                f.get("name")
                    .and_then(Value::as_str)
                    .map(|n| n.eq_ignore_ascii_case("status"))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                KanbanError::NotFound(format!("status field for project {}", project))
            })?;

        let resolved = ProjectFields {
            status_field_id: status_field
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status_options: status_field
                .get("options")
                .and_then(Value::as_array)
                .map(|options| {
                    options
                        .iter()
                        .filter_map(|o| {
                            let id = o.get("id").and_then(Value::as_str)?;
                            let name = o.get("name").and_then(Value::as_str)?;
                            Some((id.to_string(), name.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        self.field_cache
            .lock()
            .expect("field cache lock poisoned")
            .insert(project.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// 把 project 看板列同步到目标状态；失败不影响 issue 侧的权威状态
    async fn sync_project_column(
        &self,
        project: &str,
        issue_number: &str,
        status: TaskStatus,
    ) -> Result<(), KanbanError> {
        let fields = self.project_fields(project).await?;
        let option_id = fields.option_for(status).ok_or_else(|| {
            KanbanError::NotFound(format!(
                "no status option matching {} on project {}",
                status.as_str(),
                project
            ))
        })?;

        let raw = self.fetch_project_items(project).await?;
        let key = format!("project-items:{}", project);
        let items = normalize_list_payload(&self.coord.backoff, &key, &raw);
        let item_id = items
            .iter()
            .find(|item| {
                item.get("content")
                    .and_then(|c| c.get("number"))
                    .and_then(Value::as_u64)
                    .map(|n| n.to_string() == issue_number)
                    .unwrap_or(false)
            })
            .and_then(|item| item.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                KanbanError::NotFound(format!(
                    "issue {} not on project {}",
                    issue_number, project
                ))
            })?
            .to_string();

        let args = string_args(&[
            "project",
            "item-edit",
            "--id",
            &item_id,
            "--project-id",
            project,
            "--field-id",
            &fields.status_field_id,
            "--single-select-option-id",
            option_id,
        ]);
        self.run_gh(&format!("project-item-edit:{}", item_id), args)
            .await
            .map(|_| ())
    }

    /// 标签增删；不存在的删除 gh 自身容忍
    async fn edit_labels(
        &self,
        number: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), KanbanError> {
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        let mut args = string_args(&["issue", "edit", number, "--repo", &self.repo]);
        for label in add {
            args.push("--add-label".to_string());
            args.push((*label).to_string());
        }
        for label in remove {
            args.push("--remove-label".to_string());
            args.push((*label).to_string());
        }
        self.run_gh(&format!("issue-edit:{}", number), args)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TaskBackend for GithubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Github
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
        match self.project.clone() {
            Some(project) => self.list_project_tasks(&project, filter).await,
            None => self.list_issue_tasks(filter).await,
        }
    }

    async fn get_task(&self, id: &str) -> Result<Task, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let args = string_args(&[
            "issue",
            "view",
            &n,
            "--repo",
            &self.repo,
            "--json",
            ISSUE_JSON_FIELDS,
        ]);
        let stdout = self.run_gh(&format!("issue-view:{}", n), args).await?;
        let raw = parse_json(&stdout)?;
        task_from_issue(&raw, &self.repo)
            .ok_or_else(|| KanbanError::Permanent(format!("malformed issue payload for #{}", n)))
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError> {
        let mut args = string_args(&[
            "issue",
            "create",
            "--repo",
            &self.repo,
            "--title",
            &draft.title,
            "--body",
            &draft.description,
            "--label",
            &self.label,
        ]);
        if let Some(assignee) = &self.default_assignee {
            args.push("--assignee".to_string());
            args.push(assignee.clone());
        }
        // create 的输出是人类可读的 issue URL，取编号后补 view 拿权威状态
        let stdout = self.run_gh("issue-create", args).await?;
        let number = extract_issue_number(&stdout).ok_or_else(|| {
            KanbanError::Permanent(format!(
                "could not find issue number in gh output: {}",
                stdout.trim()
            ))
        })?;
        self.get_task(&number.to_string()).await
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let mut args = string_args(&["issue", "edit", &n, "--repo", &self.repo]);
        if let Some(title) = &patch.title {
            args.push("--title".to_string());
            args.push(title.clone());
        }
        if let Some(description) = &patch.description {
            args.push("--body".to_string());
            args.push(description.clone());
        }
        if let Some(assignee) = &patch.assignee {
            args.push("--add-assignee".to_string());
            args.push(assignee.clone());
        }
        self.run_gh(&format!("issue-edit:{}", n), args).await?;
        self.get_task(&n).await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Task, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let current = self.get_task(&n).await?;
        let closed = current.status == TaskStatus::Done;

        match status {
            TaskStatus::Todo => {
                self.edit_labels(&n, &[], &[STATUS_LABEL_IN_PROGRESS, STATUS_LABEL_IGNORED])
                    .await?;
                if closed {
                    let args = string_args(&["issue", "reopen", &n, "--repo", &self.repo]);
                    self.run_gh(&format!("issue-reopen:{}", n), args).await?;
                }
            }
            TaskStatus::InProgress => {
                self.edit_labels(&n, &[STATUS_LABEL_IN_PROGRESS], &[STATUS_LABEL_IGNORED])
                    .await?;
                if closed {
                    let args = string_args(&["issue", "reopen", &n, "--repo", &self.repo]);
                    self.run_gh(&format!("issue-reopen:{}", n), args).await?;
                }
            }
            TaskStatus::Done => {
                self.edit_labels(&n, &[], &[STATUS_LABEL_IN_PROGRESS]).await?;
                if !closed {
                    // 输出形如 "✓ Closed issue #42"，忽略正文，靠后面的 view 拿权威状态
                    let args = string_args(&["issue", "close", &n, "--repo", &self.repo]);
                    self.run_gh(&format!("issue-close:{}", n), args).await?;
                }
            }
            TaskStatus::Ignored => {
                self.edit_labels(&n, &[STATUS_LABEL_IGNORED], &[STATUS_LABEL_IN_PROGRESS])
                    .await?;
            }
        }

        if let Some(project) = self.project.clone() {
            if let Err(err) = self.sync_project_column(&project, &n, status).await {
                tracing::debug!(project = %project, issue = %n, error = %err, "project column sync skipped");
            }
        }

        self.get_task(&n).await
    }

    async fn delete_task(&self, id: &str) -> Result<bool, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let args = string_args(&["issue", "delete", &n, "--repo", &self.repo, "--yes"]);
        match self.run_gh(&format!("issue-delete:{}", n), args).await {
            Ok(_) => Ok(true),
            Err(KanbanError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let args = string_args(&[
            "issue", "comment", &n, "--repo", &self.repo, "--body", body,
        ]);
        self.run_gh(&format!("issue-comment:{}", n), args).await?;
        Ok(true)
    }

    async fn comments(&self, id: &str) -> Result<Vec<String>, KanbanError> {
        let number = validate_issue_number(id)?;
        let n = number.to_string();
        let key = format!("issue-comments:{}", n);
        let args = string_args(&[
            "issue", "view", &n, "--repo", &self.repo, "--json", "comments",
        ]);
        let stdout = self.run_gh(&key, args).await?;
        let raw = parse_json(&stdout)?;
        let comments = normalize_list_payload(&self.coord.backoff, &key, &raw);
        Ok(comments
            .iter()
            .filter_map(|c| c.get("body").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

/// item-list 原始取数：先带 --owner，被拒则登记无效并在同一序列内去掉 owner 重试
async fn fetch_project_items_raw(
    runner: Arc<dyn GhRunner>,
    coord: Arc<CoordinationState>,
    retry: RetryPolicy,
    project: String,
    owner: Option<String>,
) -> Result<Value, String> {
    let key = match &owner {
        Some(o) => format!("project-items:{}:{}", project, o),
        None => format!("project-items:{}", project),
    };
    let mut args = string_args(&["project", "item-list", &project]);
    if let Some(o) = &owner {
        args.push("--owner".to_string());
        args.push(o.clone());
    }
    args.push("--format".to_string());
    args.push("json".to_string());

    let first = run_gh_with_retries(
        Arc::clone(&runner),
        Arc::clone(&coord),
        retry.clone(),
        key,
        args,
    )
    .await;

    let stdout = match first {
        Ok(out) => out,
        Err(KanbanError::OwnerType(_)) if owner.is_some() => {
            let rejected = owner.as_deref().unwrap_or_default();
            tracing::warn!(owner = %rejected, "gh rejected owner scope, retrying without --owner");
            coord.invalid_owners.mark_invalid(rejected);
            let bare_key = format!("project-items:{}", project);
            let args = string_args(&["project", "item-list", &project, "--format", "json"]);
            match run_gh_with_retries(
                Arc::clone(&runner),
                Arc::clone(&coord),
                retry,
                bare_key.clone(),
                args,
            )
            .await
            {
                Ok(out) => out,
                Err(second) => {
                    // owner 失败后的第二次失败：该键进入 owner-retry 冷却窗口
                    coord.backoff.record_failure(
                        &bare_key,
                        FailureKind::OwnerType,
                        &second.to_string(),
                    );
                    return Err(second.to_string());
                }
            }
        }
        Err(err) => return Err(err.to_string()),
    };

    serde_json::from_str(&stdout).map_err(|e| format!("unparsable project item list: {}", e))
}

fn string_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_json(stdout: &str) -> Result<Value, KanbanError> {
    serde_json::from_str(stdout)
        .map_err(|e| KanbanError::Transient(format!("unparsable gh output: {}", e)))
}

/// issue 编号必须是十进制数字，格式错误立即失败不重试
fn validate_issue_number(id: &str) -> Result<u64, KanbanError> {
    id.parse::<u64>()
        .map_err(|_| KanbanError::InvalidIdentifier(id.to_string()))
}

/// 从人类可读输出里取 issue 编号（URL 或 "#42" 形式）
fn extract_issue_number(text: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?:/issues/|#)(\d+)").expect("issue number regex"));
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn issue_labels(value: &Value) -> BTreeSet<String> {
    value
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| {
                    l.as_str()
                        .map(str::to_string)
                        .or_else(|| l.get("name").and_then(Value::as_str).map(str::to_string))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// GitHub 原生状态（open/closed + 标签）到规范状态
fn status_from_native(state: &str, labels: &BTreeSet<String>) -> TaskStatus {
    if labels.contains(STATUS_LABEL_IGNORED) {
        return TaskStatus::Ignored;
    }
    if state.eq_ignore_ascii_case("closed") {
        return TaskStatus::Done;
    }
    if labels.contains(STATUS_LABEL_IN_PROGRESS) {
        TaskStatus::InProgress
    } else {
        TaskStatus::Todo
    }
}

/// issue JSON 到 Task
pub fn task_from_issue(value: &Value, repo: &str) -> Option<Task> {
    let number = value.get("number")?.as_u64()?;
    let labels = issue_labels(value);
    let state = value
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("OPEN");
    let assignee = value
        .get("assignees")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|a| a.get("login"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let task_url = value
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://github.com/{}/issues/{}", repo, number));

    Some(Task {
        id: number.to_string(),
        title: value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: value
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: status_from_native(state, &labels),
        labels,
        assignee,
        task_url,
        backend: BackendKind::Github,
    })
}

/// project item 到 Task；content 缺 number（草稿项等）或不带任务标签的项跳过
pub fn task_from_project_item(item: &Value, repo: &str, required_label: &str) -> Option<Task> {
    let content = item.get("content")?;
    let number = content.get("number")?.as_u64()?;
    let labels = issue_labels(content);
    if !required_label.is_empty() && !labels.contains(required_label) {
        return None;
    }

    let column_status = item
        .get("status")
        .and_then(Value::as_str)
        .and_then(TaskStatus::parse_column);
    let state = content
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("OPEN");
    // 标签里的 ignored 终态优先于看板列
    let status = if labels.contains(STATUS_LABEL_IGNORED) {
        TaskStatus::Ignored
    } else {
        column_status.unwrap_or_else(|| status_from_native(state, &labels))
    };

    let task_url = content
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://github.com/{}/issues/{}", repo, number));

    Some(Task {
        id: number.to_string(),
        title: content
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: content
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status,
        labels,
        assignee: content
            .get("assignees")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|a| {
                a.as_str()
                    .map(str::to_string)
                    .or_else(|| a.get("login").and_then(Value::as_str).map(str::to_string))
            }),
        task_url,
        backend: BackendKind::Github,
    })
}
