//! 记忆相关性检索
//!
//! 综合分 = overlap_weight * 关键词/标签重叠 + importance_weight * importance
//!        + recency_weight * (新鲜度与访问频率) + 关系图加成。
//! 关系图加成：从基础分最高的若干种子出发按关系 BFS，第 h 跳加 graph_boost * decay^(h-1)。
//! 同分依次比较 access_count、updated_at、id，排序是全序，检索结果可复现。

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::store::{MemoryFilter, MemoryStore, MemoryStoreError};
use crate::memory::tokenizer::{jaccard_similarity, keywords};
use crate::memory::{MemoryKind, MemoryRecord};

/// 检索参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub overlap_weight: f64,
    pub importance_weight: f64,
    pub recency_weight: f64,
    pub graph_boost: f64,
    pub graph_decay: f64,
    pub graph_depth: usize,
    /// 关系图 BFS 的种子数量
    pub seed_count: usize,
    pub recency_half_life_days: f64,
    /// find_similar 默认阈值，decide_write 达到此值即更新
    pub similarity_threshold: f64,
    /// 相似度达到此值视为重复，不写入
    pub noop_threshold: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            overlap_weight: 0.55,
            importance_weight: 0.30,
            recency_weight: 0.15,
            graph_boost: 0.2,
            graph_decay: 0.5,
            graph_depth: 2,
            seed_count: 3,
            recency_half_life_days: 30.0,
            similarity_threshold: 0.7,
            noop_threshold: 0.95,
        }
    }
}

const TAG_WEIGHT: f64 = 1.0;
const KEYWORD_WEIGHT: f64 = 0.8;
const CONTENT_WEIGHT: f64 = 0.4;

/// 带分数的检索结果
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f64,
    pub base_score: f64,
    /// 查询词命中比例
    pub overlap: f64,
    /// 通过关系图被加成时的跳数
    pub graph_hops: Option<usize>,
}

/// 写入决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    Create,
    Update(String),
    /// 与已有记录几乎相同
    Skip(String),
}

pub struct RelevanceEngine {
    store: Arc<dyn MemoryStore>,
    config: RelevanceConfig,
}

impl RelevanceEngine {
    pub fn new(store: Arc<dyn MemoryStore>, config: RelevanceConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn MemoryStore> {
        Arc::clone(&self.store)
    }

    /// 按综合分检索；kinds 为空表示所有类型
    pub async fn retrieve(
        &self,
        scope_id: &str,
        query_text: &str,
        kinds: &[MemoryKind],
        limit: usize,
        min_importance: f32,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        Ok(self
            .rank_at(Utc::now(), scope_id, query_text, kinds, limit, min_importance)
            .await?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    /// 以指定时间计算新鲜度的排序结果
    pub async fn rank_at(
        &self,
        now: DateTime<Utc>,
        scope_id: &str,
        query_text: &str,
        kinds: &[MemoryKind],
        limit: usize,
        min_importance: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = MemoryFilter::new()
            .kinds(kinds.iter().copied())
            .min_importance(min_importance);
        let candidates: Vec<MemoryRecord> = self
            .store
            .query(scope_id, &filter)
            .await?
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .collect();
        let mut scored = self.score_candidates(now, query_text, candidates);
        scored.truncate(limit);
        Ok(scored)
    }

    fn score_candidates(
        &self,
        now: DateTime<Utc>,
        query_text: &str,
        candidates: Vec<MemoryRecord>,
    ) -> Vec<ScoredMemory> {
        let query_tokens = keywords(query_text);
        let max_access = candidates.iter().map(|r| r.access_count).max().unwrap_or(0);

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|record| {
                let overlap = overlap_ratio(&query_tokens, &record);
                let base = self.base_score(now, overlap, &record, max_access);
                ScoredMemory {
                    record,
                    score: base,
                    base_score: base,
                    overlap,
                    graph_hops: None,
                }
            })
            .collect();

        sort_scored(&mut scored);
        self.apply_graph_boost(&mut scored);
        sort_scored(&mut scored);
        scored
    }

    fn base_score(
        &self,
        now: DateTime<Utc>,
        overlap: f64,
        record: &MemoryRecord,
        max_access: u64,
    ) -> f64 {
        let recency = recency_factor(now, record.updated_at, self.config.recency_half_life_days);
        let access = if max_access == 0 {
            0.0
        } else {
            (1.0 + record.access_count as f64).ln() / (1.0 + max_access as f64).ln()
        };
        // 命中率取平方：部分命中的加分增长较慢，不足以抵消较大的重要度差距
        self.config.overlap_weight * overlap * overlap
            + self.config.importance_weight * record.importance() as f64
            + self.config.recency_weight * (0.5 * recency + 0.5 * access)
    }

    /// 关系图加成：种子取命中查询词的前 seed_count 条，种子本身不加成，其余记录按最短跳数只加一次
    fn apply_graph_boost(&self, scored: &mut [ScoredMemory]) {
        if self.config.graph_depth == 0 || self.config.seed_count == 0 || scored.len() < 2 {
            return;
        }

        let index: BTreeMap<String, usize> = scored
            .iter()
            .enumerate()
            .map(|(i, s)| (s.record.id.clone(), i))
            .collect();

        // 关系按无向边处理
        let mut adjacency: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (i, s) in scored.iter().enumerate() {
            for other in &s.record.relationships {
                if let Some(&j) = index.get(other) {
                    if i != j {
                        adjacency.entry(i).or_default().insert(j);
                        adjacency.entry(j).or_default().insert(i);
                    }
                }
            }
        }
        if adjacency.is_empty() {
            return;
        }

        let seeds: Vec<usize> = (0..scored.len())
            .filter(|&i| scored[i].overlap > 0.0)
            .take(self.config.seed_count)
            .collect();
        if seeds.is_empty() {
            return;
        }
        let mut hops: BTreeMap<usize, usize> = seeds.iter().map(|&s| (s, 0)).collect();
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            let depth = hops.get(&node).copied().unwrap_or(0);
            if depth >= self.config.graph_depth {
                continue;
            }
            if let Some(neighbors) = adjacency.get(&node) {
                for &n in neighbors {
                    if !hops.contains_key(&n) {
                        hops.insert(n, depth + 1);
                        queue.push_back(n);
                    }
                }
            }
        }

        for (node, hop) in hops {
            if hop == 0 {
                continue;
            }
            let boost = self.config.graph_boost * self.config.graph_decay.powi(hop as i32 - 1);
            let entry = &mut scored[node];
            entry.score += boost;
            entry.graph_hops = Some(hop);
        }
    }

    /// 把本次检索返回的记录 access_count 加一
    pub async fn record_access(&self, ids: &[String]) -> Result<(), MemoryStoreError> {
        for id in ids {
            if let Some(mut record) = self.store.get(id).await? {
                record.access_count += 1;
                self.store.put(record).await?;
            }
        }
        Ok(())
    }

    /// 同作用域、同类型中相似度不低于 threshold 的记录，按相似度降序
    pub async fn find_similar(
        &self,
        scope_id: &str,
        content: &str,
        kind: MemoryKind,
        threshold: f64,
    ) -> Result<Vec<(MemoryRecord, f64)>, MemoryStoreError> {
        let target = keywords(content);
        let filter = MemoryFilter::new().kinds([kind]);
        let mut matches: Vec<(MemoryRecord, f64)> = self
            .store
            .query(scope_id, &filter)
            .await?
            .into_iter()
            .map(|r| {
                let sim = jaccard_similarity(&target, &keywords(&r.content));
                (r, sim)
            })
            .filter(|(_, sim)| *sim >= threshold)
            .collect();
        matches.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        Ok(matches)
    }

    /// 新建、更新已有记录，或视为重复跳过
    pub async fn decide_write(
        &self,
        candidate: &MemoryRecord,
    ) -> Result<WriteDecision, MemoryStoreError> {
        let similar = self
            .find_similar(
                candidate.scope_id(),
                &candidate.content,
                candidate.kind,
                self.config.similarity_threshold,
            )
            .await?;
        Ok(match similar.into_iter().next() {
            Some((record, sim)) if sim >= self.config.noop_threshold => {
                WriteDecision::Skip(record.id)
            }
            Some((record, _)) => WriteDecision::Update(record.id),
            None => WriteDecision::Create,
        })
    }
}

/// 查询词命中比例：标签 > 关键词 > 正文，每个查询词最多计一次
fn overlap_ratio(query_tokens: &BTreeSet<String>, record: &MemoryRecord) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = keywords(&record.content);
    let total: f64 = query_tokens
        .iter()
        .map(|t| {
            if record.tags.contains(t) {
                TAG_WEIGHT
            } else if record.keywords.contains(t) {
                KEYWORD_WEIGHT
            } else if content_tokens.contains(t) {
                CONTENT_WEIGHT
            } else {
                0.0
            }
        })
        .sum();
    total / query_tokens.len() as f64
}

/// 按小时取整的指数衰减
fn recency_factor(now: DateTime<Utc>, updated_at: DateTime<Utc>, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let hours = (now - updated_at).num_hours().max(0) as f64;
    let days = hours / 24.0;
    (-(2.0_f64.ln()) * days / half_life_days).exp()
}

fn sort_scored(scored: &mut [ScoredMemory]) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.record.access_count.cmp(&a.record.access_count))
            .then_with(|| b.record.updated_at.cmp(&a.record.updated_at))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}
