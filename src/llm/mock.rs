//! 脚本化 Mock 模型客户端（用于测试，无需 API）
//!
//! 按顺序返回预先排好的响应，并记录每次收到的请求，便于断言上下文与档位。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmError, ModelClient, ModelRequest, ModelResponse, ReasoningTier, TokenUsage};

/// 请求的摘要记录
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub instructions: String,
    pub context: String,
    pub transcript_len: usize,
    /// 对话轨迹最后一条的内容
    pub last_message: Option<String>,
    pub tool_names: Vec<String>,
    pub reasoning_tier: ReasoningTier,
}

/// 脚本化客户端：脚本用尽后返回一条固定文本回复
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModelClient {
    pub fn new(script: impl IntoIterator<Item = Result<ModelResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 全部为成功响应时的便捷构造
    pub fn from_responses(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                instructions: request.instructions.clone(),
                context: request.context.clone(),
                transcript_len: request.transcript.len(),
                last_message: request.transcript.last().map(|m| m.content.clone()),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
                reasoning_tier: request.reasoning_tier,
            });
        }

        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Permanent("mock script lock poisoned".to_string()))?
            .pop_front();

        next.unwrap_or_else(|| {
            Ok(ModelResponse::text(
                "(mock script exhausted)",
                TokenUsage::new(1, 1),
            ))
        })
    }
}
