//! 模型层：推理客户端抽象与脚本化 Mock

pub mod mock;
pub mod traits;

pub use mock::{RecordedRequest, ScriptedModelClient};
pub use traits::{
    LlmError, Message, ModelClient, ModelRequest, ModelResponse, ReasoningTier, Role, TokenUsage,
    ToolCall,
};
