//! Bosun - 看板协调层（多进程任务编排）
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **coordination**: 跨进程协调状态（退避登记、无效 Owner 追踪、请求去重、时钟）
//! - **core**: 错误分类与调度主循环
//! - **kanban**: 任务模型、后端抽象（GitHub CLI / Jira REST / 本地文件）、租约协议
//! - **observability**: tracing 初始化

pub mod config;
pub mod coordination;
pub mod core;
pub mod kanban;
pub mod observability;
