//! 模型推理抽象
//!
//! 推理调用本身是不透明的协作方：输入上下文 + 可用工具 + 推理档位，输出文本或工具调用，并附带 token 用量。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ErrorClass;
use crate::tools::ToolSpec;

/// 消息角色
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// 推理档位：单个作业内只升不降
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningTier {
    #[default]
    Low,
    Medium,
    High,
    Max,
}

impl ReasoningTier {
    /// 上一档；已是最高档时返回自身
    pub fn raised(self) -> Self {
        match self {
            ReasoningTier::Low => ReasoningTier::Medium,
            ReasoningTier::Medium => ReasoningTier::High,
            ReasoningTier::High | ReasoningTier::Max => ReasoningTier::Max,
        }
    }
}

/// 一次调用的 token 用量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// 模型提议的工具调用（{"tool": "...", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: serde_json::Value,
}

/// 一次推理请求
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// 指令段：任务说明、预算提示、工具调用格式
    pub instructions: String,
    /// 装配好的上下文（身份 / 历史 / 记忆 / 结构化信息）
    pub context: String,
    /// 本作业内的对话轨迹
    pub transcript: Vec<Message>,
    /// 可用工具；为空表示本轮不允许调用工具
    pub tools: Vec<ToolSpec>,
    pub reasoning_tier: ReasoningTier,
}

/// 推理结果：文本与工具调用至多其一生效（同时存在时工具调用优先）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub usage: TokenUsage,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: Some(text.into()),
            tool_call: None,
            usage,
        }
    }

    pub fn tool(tool: impl Into<String>, args: serde_json::Value, usage: TokenUsage) -> Self {
        Self {
            text: None,
            tool_call: Some(ToolCall {
                tool: tool.into(),
                args,
            }),
            usage,
        }
    }
}

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("model call timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("transient model error: {0}")]
    Transient(String),

    #[error("model error: {0}")]
    Permanent(String),

    #[error("context window exceeded")]
    ContextWindowExceeded,
}

impl LlmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LlmError::Timeout => ErrorClass::Timeout,
            LlmError::RateLimited { .. } => ErrorClass::RateLimit,
            LlmError::Transient(_) => ErrorClass::Transient,
            LlmError::Permanent(_) | LlmError::ContextWindowExceeded => ErrorClass::Permanent,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}
