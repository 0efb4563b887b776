//! 核心层：错误分类与调度主循环

pub mod error;
pub mod scheduler;

pub use error::KanbanError;
pub use scheduler::{AgentExecutor, Scheduler};
