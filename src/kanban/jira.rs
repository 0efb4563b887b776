//! Jira 后端
//!
//! REST v2（/rest/api/2）。状态变更不能按显示名猜：先 GET transitions，
//! 再按目标状态类别（statusCategory: new / indeterminate / done）匹配后提交。
//! 凭据走环境变量 JIRA_EMAIL / JIRA_API_TOKEN（Basic auth）。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::coordination::CoordinationState;
use crate::core::KanbanError;
use crate::kanban::payload::normalize_list_payload;
use crate::kanban::task::{
    BackendKind, Task, TaskDraft, TaskFilter, TaskPatch, TaskStatus, STATUS_LABEL_IGNORED,
};
use crate::kanban::{RetryPolicy, TaskBackend};

/// 一次 REST 调用的结果
#[derive(Debug, Clone)]
pub struct JiraResponse {
    pub status: u16,
    pub body: Value,
}

/// 传输抽象；测试注入脚本化的 Mock
#[async_trait]
pub trait JiraTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<JiraResponse, String>;
}

/// 真实 HTTP 传输：reqwest + Basic auth + 超时
pub struct JiraHttp {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
}

impl JiraHttp {
    pub fn new(base_url: &str, email: &str, api_token: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            api_token: api_token.to_string(),
        })
    }
}

#[async_trait]
impl JiraTransport for JiraHttp {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<JiraResponse, String> {
        let url = format!("{}/rest/api/2{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "jira request");
        let mut request = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => return Err(format!("unsupported method: {}", other)),
        };
        request = request.basic_auth(&self.email, Some(&self.api_token));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("jira request failed: {}", e))?;
        let status = response.status().as_u16();
        // 204 等无正文响应解析成 Null
        let text = response
            .text()
            .await
            .map_err(|e| format!("jira body read failed: {}", e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok(JiraResponse { status, body })
    }
}

/// 按 HTTP 状态分类；5xx 走短退避，4xx 原样上抛
fn classify_jira_response(status: u16, body: &Value, context: &str) -> KanbanError {
    let detail = body
        .get("errorMessages")
        .and_then(Value::as_array)
        .and_then(|msgs| msgs.first())
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = format!("{} (HTTP {}) {}", context, status, detail);
    match status {
        404 => KanbanError::NotFound(message),
        429 => KanbanError::RateLimited(message),
        500..=599 => KanbanError::Transient(message),
        _ => KanbanError::Permanent(message),
    }
}

/// Jira 后端
pub struct JiraBackend {
    project_key: String,
    label: String,
    default_assignee: Option<String>,
    base_url: String,
    transport: Arc<dyn JiraTransport>,
    coord: Arc<CoordinationState>,
    retry: RetryPolicy,
}

impl JiraBackend {
    pub fn new(
        project_key: String,
        label: String,
        default_assignee: Option<String>,
        base_url: String,
        transport: Arc<dyn JiraTransport>,
        coord: Arc<CoordinationState>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            project_key,
            label,
            default_assignee,
            base_url,
            transport,
            coord,
            retry,
        }
    }

    pub fn from_config(cfg: &AppConfig, coord: Arc<CoordinationState>) -> anyhow::Result<Self> {
        let base_url = cfg
            .jira
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("jira.base_url is required for the jira backend"))?;
        let project_key = cfg
            .jira
            .project_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("jira.project_key is required for the jira backend"))?;
        let email = std::env::var("JIRA_EMAIL").unwrap_or_default();
        let api_token = std::env::var("JIRA_API_TOKEN").unwrap_or_default();
        if email.is_empty() || api_token.is_empty() {
            tracing::warn!("JIRA_EMAIL / JIRA_API_TOKEN not set, jira requests will be unauthenticated");
        }
        let transport = Arc::new(JiraHttp::new(
            &base_url,
            &email,
            &api_token,
            cfg.jira.request_timeout_secs,
        )?);
        Ok(Self::new(
            project_key,
            cfg.kanban.label.clone(),
            cfg.kanban.default_assignee.clone(),
            base_url,
            transport,
            coord,
            RetryPolicy::from_config(&cfg.coordination),
        ))
    }

    /// 带退避检查与有界重试的单请求；最终失败按分类记入退避登记表
    async fn call(
        &self,
        key: &str,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, KanbanError> {
        if self.coord.backoff.should_skip(key) {
            return Err(KanbanError::Transient(format!(
                "backoff window active for {}",
                key
            )));
        }
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.transport.request(method, path, body.clone()).await {
                Ok(resp) if resp.status < 300 => return Ok(resp.body),
                Ok(resp) => classify_jira_response(resp.status, &resp.body, path),
                Err(e) => KanbanError::Transient(e),
            };
            if err.is_retryable() && attempt < self.retry.max_attempts {
                let delay_ms = match err {
                    KanbanError::RateLimited(_) => self.retry.rate_limit_delay_ms,
                    _ => self.retry.transient_delay_ms,
                };
                tracing::debug!(key = %key, attempt, error = %err, "jira call failed, will retry");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                continue;
            }
            if let Some(kind) = err.failure_kind() {
                self.coord.backoff.record_failure(key, kind, &err.to_string());
            }
            return Err(err);
        }
    }

    fn issue_path(key: &str) -> String {
        format!("/issue/{}", key)
    }
}

#[async_trait]
impl TaskBackend for JiraBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Jira
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, KanbanError> {
        let label = filter
            .labels
            .first()
            .cloned()
            .unwrap_or_else(|| self.label.clone());
        let jql = format!(
            "project = {} AND labels = \"{}\" ORDER BY created ASC",
            self.project_key, label
        );
        let body = json!({
            "jql": jql,
            "maxResults": 100,
            "fields": ["summary", "description", "status", "labels", "assignee"],
        });
        let key = format!("jira-search:{}", self.project_key);
        let raw = self.call(&key, "POST", "/search", Some(body)).await?;
        let issues = normalize_list_payload(&self.coord.backoff, &key, &raw);
        Ok(issues
            .iter()
            .filter_map(|issue| task_from_jira_issue(issue, &self.base_url))
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .collect())
    }

    async fn get_task(&self, id: &str) -> Result<Task, KanbanError> {
        let key_id = validate_issue_key(id)?;
        let path = format!(
            "{}?fields=summary,description,status,labels,assignee",
            Self::issue_path(&key_id)
        );
        let raw = self
            .call(&format!("jira-issue:{}", key_id), "GET", &path, None)
            .await?;
        task_from_jira_issue(&raw, &self.base_url)
            .ok_or_else(|| KanbanError::Permanent(format!("malformed issue payload for {}", key_id)))
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<Task, KanbanError> {
        let mut fields = json!({
            "project": {"key": self.project_key},
            "summary": draft.title,
            "description": draft.description,
            "issuetype": {"name": "Task"},
            "labels": [self.label],
        });
        if let Some(assignee) = &self.default_assignee {
            fields["assignee"] = json!({"name": assignee});
        }
        let raw = self
            .call("jira-create", "POST", "/issue", Some(json!({"fields": fields})))
            .await?;
        let created_key = raw
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                KanbanError::Permanent(format!("create response missing issue key: {}", raw))
            })?
            .to_string();
        self.get_task(&created_key).await
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, KanbanError> {
        let key_id = validate_issue_key(id)?;
        let mut fields = serde_json::Map::new();
        if let Some(title) = &patch.title {
            fields.insert("summary".to_string(), json!(title));
        }
        if let Some(description) = &patch.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(assignee) = &patch.assignee {
            fields.insert("assignee".to_string(), json!({"name": assignee}));
        }
        if !fields.is_empty() {
            self.call(
                &format!("jira-update:{}", key_id),
                "PUT",
                &Self::issue_path(&key_id),
                Some(json!({"fields": fields})),
            )
            .await?;
        }
        self.get_task(&key_id).await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Task, KanbanError> {
        let key_id = validate_issue_key(id)?;

        // ignored 是标签语义，不走工作流迁移
        if status == TaskStatus::Ignored {
            self.call(
                &format!("jira-update:{}", key_id),
                "PUT",
                &Self::issue_path(&key_id),
                Some(json!({"update": {"labels": [{"add": STATUS_LABEL_IGNORED}]}})),
            )
            .await?;
            return self.get_task(&key_id).await;
        }

        let transitions_path = format!("{}/transitions", Self::issue_path(&key_id));
        let key = format!("jira-transitions:{}", key_id);
        let raw = self.call(&key, "GET", &transitions_path, None).await?;
        let transitions = normalize_list_payload(&self.coord.backoff, &key, &raw);

        let target_category = status_category_for(status);
        let transition_id = transitions
            .iter()
            .find(|t| {
                t.get("to")
                    .and_then(|to| to.get("statusCategory"))
                    .and_then(|c| c.get("key"))
                    .and_then(Value::as_str)
                    == Some(target_category)
            })
            .and_then(|t| t.get("id"))
            .and_then(|id| {
                id.as_str()
                    .map(str::to_string)
                    .or_else(|| id.as_u64().map(|n| n.to_string()))
            })
            .ok_or_else(|| {
                KanbanError::Permanent(format!(
                    "no transition to category {} available for {}",
                    target_category, key_id
                ))
            })?;

        self.call(
            &key,
            "POST",
            &transitions_path,
            Some(json!({"transition": {"id": transition_id}})),
        )
        .await?;
        self.get_task(&key_id).await
    }

    async fn delete_task(&self, id: &str) -> Result<bool, KanbanError> {
        let key_id = validate_issue_key(id)?;
        match self
            .call(
                &format!("jira-delete:{}", key_id),
                "DELETE",
                &Self::issue_path(&key_id),
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(KanbanError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, KanbanError> {
        let key_id = validate_issue_key(id)?;
        self.call(
            &format!("jira-comment:{}", key_id),
            "POST",
            &format!("{}/comment", Self::issue_path(&key_id)),
            Some(json!({"body": body})),
        )
        .await?;
        Ok(true)
    }

    async fn comments(&self, id: &str) -> Result<Vec<String>, KanbanError> {
        let key_id = validate_issue_key(id)?;
        let key = format!("jira-comments:{}", key_id);
        let raw = self
            .call(
                &key,
                "GET",
                &format!("{}/comment", Self::issue_path(&key_id)),
                None,
            )
            .await?;
        let comments = normalize_list_payload(&self.coord.backoff, &key, &raw);
        Ok(comments
            .iter()
            .filter_map(|c| c.get("body").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

/// 规范状态到 Jira 状态类别
fn status_category_for(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "new",
        TaskStatus::InProgress => "indeterminate",
        TaskStatus::Done => "done",
        // 调用前已分流
        TaskStatus::Ignored => "new",
    }
}

/// issue key 形如 BOS-42；格式错误立即失败不重试
fn validate_issue_key(id: &str) -> Result<String, KanbanError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]*-\d+$").expect("issue key regex"));
    if re.is_match(id) {
        Ok(id.to_string())
    } else {
        Err(KanbanError::InvalidIdentifier(id.to_string()))
    }
}

/// issue JSON 到 Task；状态看 statusCategory，ignored 标签终态优先
pub fn task_from_jira_issue(issue: &Value, base_url: &str) -> Option<Task> {
    let key = issue.get("key")?.as_str()?.to_string();
    let fields = issue.get("fields")?;
    let labels: std::collections::BTreeSet<String> = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let status = if labels.contains(STATUS_LABEL_IGNORED) {
        TaskStatus::Ignored
    } else {
        match fields
            .get("status")
            .and_then(|s| s.get("statusCategory"))
            .and_then(|c| c.get("key"))
            .and_then(Value::as_str)
        {
            Some("done") => TaskStatus::Done,
            Some("indeterminate") => TaskStatus::InProgress,
            _ => TaskStatus::Todo,
        }
    };

    Some(Task {
        task_url: format!("{}/browse/{}", base_url.trim_end_matches('/'), key),
        id: key,
        title: fields
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        description: fields
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status,
        labels,
        assignee: fields
            .get("assignee")
            .and_then(|a| {
                a.get("name")
                    .or_else(|| a.get("displayName"))
            })
            .and_then(Value::as_str)
            .map(str::to_string),
        backend: BackendKind::Jira,
    })
}
