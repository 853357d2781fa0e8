//! 交互捕获钩子
//!
//! 一次交互结束后：分类器判断是否值得记住（纯分类，不触碰协议标记），
//! 再经 decide_write 决定新建 / 更新 / 跳过，最后写入存储。失败由调用方记录日志，不影响作业。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{Message, ModelClient, ModelRequest, ReasoningTier};
use crate::memory::relevance::{RelevanceEngine, WriteDecision};
use crate::memory::store::MemoryStoreError;
use crate::memory::{MemoryKind, MemoryRecord};

/// 分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureDecision {
    Store {
        kind: MemoryKind,
        content: String,
        importance: f32,
        tags: Vec<String>,
    },
    Ignore {
        reason: String,
    },
}

/// 是否值得记住
#[async_trait]
pub trait MemoryClassifier: Send + Sync {
    async fn classify(&self, request: &str, response: &str) -> CaptureDecision;
}

/// 基于关键词的分类：表达偏好/约定的内容记为 SEMANTIC，其余记为低重要度的 EPISODIC
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_chars: 600,
        }
    }
}

const PREFERENCE_MARKERS: &[&str] = &[
    "prefer", "always", "never", "remember", "must", "deadline", "喜欢", "记住", "不要", "必须",
];

#[async_trait]
impl MemoryClassifier for HeuristicClassifier {
    async fn classify(&self, request: &str, response: &str) -> CaptureDecision {
        let request = request.trim();
        let response = response.trim();
        if response.is_empty() {
            return CaptureDecision::Ignore {
                reason: "empty response".into(),
            };
        }
        if request.chars().count() + response.chars().count() < self.min_chars {
            return CaptureDecision::Ignore {
                reason: "too short".into(),
            };
        }

        let lower = request.to_lowercase();
        let is_preference = PREFERENCE_MARKERS.iter().any(|m| lower.contains(m));
        let clip = |s: &str| s.chars().take(self.max_chars).collect::<String>();
        if is_preference {
            CaptureDecision::Store {
                kind: MemoryKind::Semantic,
                content: clip(request),
                importance: 0.7,
                tags: vec!["preference".into()],
            }
        } else {
            CaptureDecision::Store {
                kind: MemoryKind::Episodic,
                content: clip(&format!("Q: {request}\nA: {response}")),
                importance: 0.3,
                tags: vec!["interaction".into()],
            }
        }
    }
}

/// 由模型判断：要求输出 JSON {"store": bool, "kind": "...", "importance": 0.5, "content": "...", "tags": []}
pub struct ModelMemoryClassifier {
    model: Arc<dyn ModelClient>,
}

impl ModelMemoryClassifier {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }
}

#[derive(Deserialize)]
struct ClassifierReply {
    store: bool,
    #[serde(default)]
    kind: Option<MemoryKind>,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
}

const CLASSIFIER_INSTRUCTIONS: &str = "Decide whether this interaction contains information worth remembering \
for future jobs in the same scope. Reply with JSON only: \
{\"store\": bool, \"kind\": \"EPISODIC|SEMANTIC|PROCEDURAL\", \"importance\": 0.0-1.0, \
\"content\": \"one-sentence memory\", \"tags\": [], \"reason\": \"...\"}";

#[async_trait]
impl MemoryClassifier for ModelMemoryClassifier {
    async fn classify(&self, request: &str, response: &str) -> CaptureDecision {
        let req = ModelRequest {
            instructions: CLASSIFIER_INSTRUCTIONS.to_string(),
            context: String::new(),
            transcript: vec![Message::user(format!(
                "Request:\n{request}\n\nResponse:\n{response}"
            ))],
            tools: Vec::new(),
            reasoning_tier: ReasoningTier::Low,
        };
        let text = match self.model.call(&req).await {
            Ok(resp) => resp.text.unwrap_or_default(),
            Err(e) => {
                return CaptureDecision::Ignore {
                    reason: format!("classifier call failed: {e}"),
                }
            }
        };
        parse_reply(&text)
    }
}

fn parse_reply(text: &str) -> CaptureDecision {
    let trimmed = text.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => {
            return CaptureDecision::Ignore {
                reason: "classifier reply was not JSON".into(),
            }
        }
    };
    match serde_json::from_str::<ClassifierReply>(json) {
        Ok(reply) if reply.store => match reply.content.filter(|c| !c.trim().is_empty()) {
            Some(content) => CaptureDecision::Store {
                kind: reply.kind.unwrap_or(MemoryKind::Episodic),
                content,
                importance: reply.importance.unwrap_or(0.5),
                tags: reply.tags,
            },
            None => CaptureDecision::Ignore {
                reason: "classifier gave no content".into(),
            },
        },
        Ok(reply) => CaptureDecision::Ignore {
            reason: reply.reason.unwrap_or_else(|| "not worth storing".into()),
        },
        Err(e) => CaptureDecision::Ignore {
            reason: format!("invalid classifier reply: {e}"),
        },
    }
}

/// 捕获结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Created(String),
    Updated(String),
    Skipped(String),
    Ignored,
}

pub struct MemoryCapture {
    classifier: Arc<dyn MemoryClassifier>,
    engine: Arc<RelevanceEngine>,
}

impl MemoryCapture {
    pub fn new(classifier: Arc<dyn MemoryClassifier>, engine: Arc<RelevanceEngine>) -> Self {
        Self { classifier, engine }
    }

    pub async fn capture(
        &self,
        scope_id: &str,
        request: &str,
        response: &str,
    ) -> Result<CaptureOutcome, MemoryStoreError> {
        let (kind, content, importance, tags) =
            match self.classifier.classify(request, response).await {
                CaptureDecision::Store {
                    kind,
                    content,
                    importance,
                    tags,
                } => (kind, content, importance, tags),
                CaptureDecision::Ignore { reason } => {
                    tracing::debug!(scope = scope_id, %reason, "memory capture skipped");
                    return Ok(CaptureOutcome::Ignored);
                }
            };

        let candidate = MemoryRecord::new(scope_id, kind, content, importance).with_tags(tags);
        let store = self.engine.store();
        match self.engine.decide_write(&candidate).await? {
            WriteDecision::Create => {
                let id = candidate.id.clone();
                store.put(candidate).await?;
                Ok(CaptureOutcome::Created(id))
            }
            WriteDecision::Update(id) => {
                let mut existing = store
                    .get(&id)
                    .await?
                    .ok_or_else(|| MemoryStoreError::NotFound(id.clone()))?;
                let importance = existing.importance().max(candidate.importance());
                existing.apply_update(candidate.content, Some(importance));
                existing.tags.extend(candidate.tags);
                store.put(existing).await?;
                Ok(CaptureOutcome::Updated(id))
            }
            WriteDecision::Skip(id) => Ok(CaptureOutcome::Skipped(id)),
        }
    }
}
