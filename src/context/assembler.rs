//! 上下文装配
//!
//! 在 token 预算内按优先级拼装：身份信息（始终保留）> 近期交互 > 相关记忆 > 结构化上下文。
//! 只做整条截断：某个分段遇到第一条放不下的条目即停止，后续分段仍按剩余预算尝试。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::budget::{BudgetState, TokenEstimator};
use crate::memory::{MemoryKind, MemoryRecord, RelevanceEngine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_context_tokens: usize,
    /// 预算下限：作业剩余 token 很少时也至少给这么多
    pub min_context_tokens: usize,
    pub memory_limit: usize,
    pub memory_min_importance: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_000,
            min_context_tokens: 512,
            memory_limit: 12,
            memory_min_importance: 0.0,
        }
    }
}

/// 分段（按优先级排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    Identity,
    History,
    Memories,
    Structural,
}

impl SectionKind {
    fn heading(&self) -> &'static str {
        match self {
            SectionKind::Identity => "## Identity",
            SectionKind::History => "## Recent interactions",
            SectionKind::Memories => "## Relevant memories",
            SectionKind::Structural => "## Related context",
        }
    }
}

/// 调用方提供的非记忆分段
#[derive(Debug, Clone, Default)]
pub struct ContextSections {
    pub identity: Vec<String>,
    /// 由旧到新
    pub history: Vec<String>,
    pub structural: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionReport {
    pub kind: SectionKind,
    pub included: usize,
    pub dropped: usize,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub reports: Vec<SectionReport>,
    pub tokens_used: usize,
    pub budget_tokens: usize,
    /// 被放入上下文的记忆 id
    pub memory_ids: Vec<String>,
}

impl AssembledContext {
    pub fn report(&self, kind: SectionKind) -> Option<&SectionReport> {
        self.reports.iter().find(|r| r.kind == kind)
    }
}

pub struct ContextAssembler {
    engine: Option<Arc<RelevanceEngine>>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(engine: Option<Arc<RelevanceEngine>>, config: ContextConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// min(max_context_tokens, 作业剩余 token)，且不低于下限
    pub fn budget_for(&self, budget: &BudgetState) -> usize {
        let remaining = budget.remaining().max(0) as usize;
        self.config
            .max_context_tokens
            .min(remaining)
            .max(self.config.min_context_tokens)
    }

    pub async fn build(
        &self,
        budget: &BudgetState,
        scope_id: Option<&str>,
        query: &str,
        sections: &ContextSections,
    ) -> AssembledContext {
        self.build_within(self.budget_for(budget), scope_id, query, sections)
            .await
    }

    /// 以给定 token 上限装配（模型报告上下文超长时用更小的上限重试）
    pub async fn build_within(
        &self,
        budget_tokens: usize,
        scope_id: Option<&str>,
        query: &str,
        sections: &ContextSections,
    ) -> AssembledContext {
        let memories = self.fetch_memories(scope_id, query).await;
        let memory_items: Vec<String> = memories.iter().map(format_memory).collect();

        let ContextSections {
            identity,
            history,
            structural,
        } = sections;
        // 近期交互从最新开始装，渲染时恢复时间顺序
        let newest_first: Vec<String> = history.iter().rev().cloned().collect();

        let mut packer = Packer::new(budget_tokens);
        let identity_pick = packer.take_all(SectionKind::Identity, identity);
        let mut history_pick = packer.take(SectionKind::History, &newest_first);
        history_pick.reverse();
        let memory_pick = packer.take(SectionKind::Memories, &memory_items);
        let structural_pick = packer.take(SectionKind::Structural, structural);

        let memory_ids: Vec<String> = memories
            .iter()
            .take(memory_pick.len())
            .map(|m| m.id.clone())
            .collect();
        self.touch(&memory_ids).await;

        let mut blocks = Vec::new();
        for (kind, items) in [
            (SectionKind::Identity, identity_pick),
            (SectionKind::History, history_pick),
            (SectionKind::Memories, memory_pick),
            (SectionKind::Structural, structural_pick),
        ] {
            if !items.is_empty() {
                blocks.push(format!("{}\n{}", kind.heading(), items.join("\n")));
            }
        }

        tracing::debug!(
            budget = packer.budget,
            used = packer.used,
            memories = memory_ids.len(),
            "context assembled"
        );

        AssembledContext {
            text: blocks.join("\n\n"),
            tokens_used: packer.used,
            budget_tokens: packer.budget,
            reports: packer.reports,
            memory_ids,
        }
    }

    async fn fetch_memories(&self, scope_id: Option<&str>, query: &str) -> Vec<MemoryRecord> {
        let (Some(engine), Some(scope)) = (&self.engine, scope_id) else {
            return Vec::new();
        };
        let kinds: [MemoryKind; 0] = [];
        match engine
            .retrieve(
                scope,
                query,
                &kinds,
                self.config.memory_limit,
                self.config.memory_min_importance,
            )
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(scope, error = %e, "memory retrieval failed, assembling without memories");
                Vec::new()
            }
        }
    }

    async fn touch(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Some(engine) = &self.engine {
            if let Err(e) = engine.record_access(ids).await {
                tracing::warn!(error = %e, "failed to record memory access");
            }
        }
    }
}

fn format_memory(record: &MemoryRecord) -> String {
    format!("- [{:?}] {}", record.kind, record.content)
}

/// 按分段顺序消耗预算
struct Packer {
    budget: usize,
    used: usize,
    reports: Vec<SectionReport>,
}

impl Packer {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            reports: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }

    /// 全部放入，超出预算也不截断
    fn take_all(&mut self, kind: SectionKind, items: &[String]) -> Vec<String> {
        let tokens = TokenEstimator::estimate_all(items.iter().map(String::as_str));
        self.used += tokens;
        self.reports.push(SectionReport {
            kind,
            included: items.len(),
            dropped: 0,
            tokens,
        });
        items.to_vec()
    }

    /// 依次放入，遇到第一条放不下的即停止
    fn take(&mut self, kind: SectionKind, items: &[String]) -> Vec<String> {
        let mut picked = Vec::new();
        let mut tokens = 0;
        for item in items {
            let cost = TokenEstimator::estimate(item);
            if cost > self.remaining() {
                break;
            }
            self.used += cost;
            tokens += cost;
            picked.push(item.clone());
        }
        self.reports.push(SectionReport {
            kind,
            included: picked.len(),
            dropped: items.len() - picked.len(),
            tokens,
        });
        picked
    }
}
