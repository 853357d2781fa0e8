//! 错误分类与作业级错误类型
//!
//! 工具级失败（ToolError）与模型级失败（LlmError）都会被归入 ErrorClass，
//! 由 RecoveryEngine 决定重试 / 反馈给模型 / 收尾；只有 AgentError 会让作业进入 FAILED。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobStatus, JobStoreError};

/// 错误分类（决定重试策略）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// 网络抖动等：指数退避 + 抖动后重试
    Transient,
    /// 参数错误、实体不存在：不重试，直接反馈
    Permanent,
    /// 限流：更长的退避，必要时推迟整个步骤
    RateLimit,
    /// 超时：重试一次，之后按 Permanent 处理
    Timeout,
    /// 工具协议违规：调用方调整顺序即可恢复
    ProtocolViolation,
    /// 预算耗尽：进入收尾流程
    ResourceExhausted,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "TRANSIENT",
            ErrorClass::Permanent => "PERMANENT",
            ErrorClass::RateLimit => "RATE_LIMIT",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorClass::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Transient | ErrorClass::RateLimit | ErrorClass::Timeout
        )
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具调用失败（由协作方返回，或由执行器在超时/未知工具时生成）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("tool timed out: {0}")]
    Timeout(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ToolError::Transient(_) => ErrorClass::Transient,
            ToolError::Permanent(_) | ToolError::UnknownTool(_) => ErrorClass::Permanent,
            ToolError::RateLimited { .. } => ErrorClass::RateLimit,
            ToolError::Timeout(_) => ErrorClass::Timeout,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ToolError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// 编排层故障：会让作业进入 FAILED（或拒绝本次调用）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} already finished")]
    JobFinished(String),

    #[error("Invalid job transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Cyclic dependency detected: {0}")]
    CyclicDependency(String),

    #[error("Dependency {dependency} of job {job} failed")]
    DependencyFailed { job: String, dependency: String },

    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_classification() {
        assert_eq!(ToolError::Transient("blip".into()).class(), ErrorClass::Transient);
        assert_eq!(ToolError::UnknownTool("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(
            ToolError::RateLimited { retry_after_ms: Some(500) }.class(),
            ErrorClass::RateLimit
        );
        assert_eq!(ToolError::Timeout("slow".into()).class(), ErrorClass::Timeout);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::Timeout.is_retryable());
        assert!(!ErrorClass::Permanent.is_retryable());
        assert!(!ErrorClass::ProtocolViolation.is_retryable());
    }

    #[test]
    fn test_class_serializes_screaming_case() {
        let json = serde_json::to_string(&ErrorClass::ProtocolViolation).unwrap();
        assert_eq!(json, "\"PROTOCOL_VIOLATION\"");
    }
}
