//! 记忆记录
//!
//! importance 在构造与更新时都会被夹到 [0,1]；scope_id 创建后不可变（只读访问器，没有 setter）。
//! 更新不会静默覆盖：旧内容连同时间追加进 update_history。

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::tokenizer;

/// 记忆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryKind {
    Episodic,
    Semantic,
    Procedural,
    ExternalContext,
    Block,
}

/// 一次历史更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub previous_content: String,
    pub replaced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub kind: MemoryKind,
    scope_id: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    importance: f32,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 存活秒数，从 created_at 起算；None 表示不过期
    pub ttl_secs: Option<i64>,
    /// 关联记录 id（不拥有）
    pub relationships: BTreeSet<String>,
    #[serde(default)]
    pub update_history: Vec<UpdateEntry>,
}

fn clamp_importance(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl MemoryRecord {
    /// 新建记录；关键词从内容自动抽取
    pub fn new(
        scope_id: impl Into<String>,
        kind: MemoryKind,
        content: impl Into<String>,
        importance: f32,
    ) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            scope_id: scope_id.into(),
            keywords: tokenizer::keywords(&content),
            content,
            tags: BTreeSet::new(),
            importance: clamp_importance(importance),
            access_count: 0,
            created_at: now,
            updated_at: now,
            ttl_secs: None,
            relationships: BTreeSet::new(),
            update_history: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(|t| t.into().to_lowercase()).collect();
        self
    }

    /// 覆盖自动抽取的关键词
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.num_seconds());
        self
    }

    pub fn with_relationship(mut self, other_id: impl Into<String>) -> Self {
        self.relationships.insert(other_id.into());
        self
    }

    /// 指定时间戳（导入历史数据、测试）
    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn importance(&self) -> f32 {
        self.importance
    }

    pub fn set_importance(&mut self, value: f32) {
        self.importance = clamp_importance(value);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            Some(secs) => now >= self.created_at + Duration::seconds(secs),
            None => false,
        }
    }

    /// 更新内容：旧内容追加到 update_history，关键词重新抽取
    pub fn apply_update(&mut self, content: impl Into<String>, importance: Option<f32>) {
        let now = Utc::now();
        let content = content.into();
        let previous = std::mem::replace(&mut self.content, content);
        self.update_history.push(UpdateEntry {
            previous_content: previous,
            replaced_at: now,
        });
        self.keywords = tokenizer::keywords(&self.content);
        if let Some(value) = importance {
            self.set_importance(value);
        }
        self.updated_at = now;
    }
}
