//! 核心层：错误分类、作业级错误与恢复策略

pub mod error;
pub mod recovery;

pub use error::{AgentError, ErrorClass, ToolError};
pub use recovery::{RecoveryAction, RecoveryEngine, RetryPolicy};
