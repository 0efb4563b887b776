//! 任务模型
//!
//! 后端无关的工作项。status 恒为四个规范值之一，各后端负责与其
//! 原生词汇（open/closed、To Do/In Progress 等）双向映射。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// open/closed 之外的细分状态通过标签表达（GitHub / Jira 共用）
pub const STATUS_LABEL_IN_PROGRESS: &str = "bosun:in-progress";
pub const STATUS_LABEL_IGNORED: &str = "bosun:ignored";

/// 规范任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    /// 终态：不再自动认领，由人工或策略显式设置
    Ignored,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "inprogress",
            Self::Done => "done",
            Self::Ignored => "ignored",
        }
    }

    /// 解析规范值
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "inprogress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }

    /// 宽松解析 project 列名（"To Do"、"In Progress"、"Backlog" 等）
    pub fn parse_column(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "todo" | "backlog" | "open" => Some(Self::Todo),
            "inprogress" | "doing" | "inreview" => Some(Self::InProgress),
            "done" | "closed" | "completed" => Some(Self::Done),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// 任务来源后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Github,
    Jira,
    Internal,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Jira => "jira",
            Self::Internal => "internal",
        }
    }
}

/// 后端无关的工作项；id 在后端 + 项目作用域内唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// 后端原生标识（issue 编号或 Jira key）
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub labels: BTreeSet<String>,
    pub assignee: Option<String>,
    pub task_url: String,
    pub backend: BackendKind,
}

/// 新建任务的输入
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
}

/// 任务字段补丁；None 表示不改
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assignee: Option<String>,
}

/// 列表筛选；labels 为空时用后端配置的默认标签
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub labels: Vec<String>,
    pub status: Option<TaskStatus>,
}
