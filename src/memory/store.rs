//! 记忆存储接口
//!
//! put / get / query(scope, filter) / delete。put 拒绝「同 id、不同 scope」的记录，保证 scope 不可变。

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::{MemoryKind, MemoryRecord};

#[derive(Error, Debug)]
pub enum MemoryStoreError {
    #[error("record {id} belongs to scope {existing}, refusing to move it to {requested}")]
    ScopeMismatch {
        id: String,
        existing: String,
        requested: String,
    },

    #[error("memory record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// 为空表示所有类型
    pub kinds: BTreeSet<MemoryKind>,
    pub min_importance: f32,
    /// 默认排除已过期记录
    pub include_expired: bool,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds<I: IntoIterator<Item = MemoryKind>>(mut self, kinds: I) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn min_importance(mut self, value: f32) -> Self {
        self.min_importance = value;
        self
    }

    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    pub fn matches(&self, record: &MemoryRecord, now: chrono::DateTime<Utc>) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && record.importance() >= self.min_importance
            && (self.include_expired || !record.is_expired(now))
    }
}

/// 记忆存储 trait：各实现自行保证单条记录原子性
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryStoreError>;

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryStoreError>;

    /// 返回按 id 排序的结果
    async fn query(
        &self,
        scope_id: &str,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError>;

    async fn delete(&self, id: &str) -> Result<bool, MemoryStoreError>;
}

pub(crate) fn check_scope(
    existing: &MemoryRecord,
    incoming: &MemoryRecord,
) -> Result<(), MemoryStoreError> {
    if existing.scope_id() != incoming.scope_id() {
        return Err(MemoryStoreError::ScopeMismatch {
            id: incoming.id.clone(),
            existing: existing.scope_id().to_string(),
            requested: incoming.scope_id().to_string(),
        });
    }
    Ok(())
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<BTreeMap<String, MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryStoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id) {
            check_scope(existing, &record)?;
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryStoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn query(
        &self,
        scope_id: &str,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, MemoryStoreError> {
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.scope_id() == scope_id && filter.matches(r, now))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryStoreError> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_get_query() {
        let store = InMemoryMemoryStore::new();
        store
            .put(MemoryRecord::new("u1", MemoryKind::Semantic, "likes rust", 0.6).with_id("b"))
            .await
            .unwrap();
        store
            .put(MemoryRecord::new("u1", MemoryKind::Episodic, "met on monday", 0.2).with_id("a"))
            .await
            .unwrap();
        store
            .put(MemoryRecord::new("u2", MemoryKind::Semantic, "other", 0.9).with_id("c"))
            .await
            .unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        let all = store.query("u1", &MemoryFilter::new()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let semantic = store
            .query("u1", &MemoryFilter::new().kinds([MemoryKind::Semantic]))
            .await
            .unwrap();
        assert_eq!(semantic.len(), 1);

        let important = store
            .query("u1", &MemoryFilter::new().min_importance(0.5))
            .await
            .unwrap();
        assert_eq!(important[0].id, "b");
    }

    #[tokio::test]
    async fn test_put_rejects_scope_change() {
        let store = InMemoryMemoryStore::new();
        store
            .put(MemoryRecord::new("u1", MemoryKind::Semantic, "x", 0.5).with_id("r1"))
            .await
            .unwrap();
        let err = store
            .put(MemoryRecord::new("u2", MemoryKind::Semantic, "x", 0.5).with_id("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryStoreError::ScopeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_query_excludes_expired_by_default() {
        let store = InMemoryMemoryStore::new();
        let past = Utc::now() - Duration::hours(3);
        store
            .put(
                MemoryRecord::new("u1", MemoryKind::Episodic, "old", 0.5)
                    .with_ttl(Duration::hours(1))
                    .with_timestamps(past, past),
            )
            .await
            .unwrap();
        assert!(store.query("u1", &MemoryFilter::new()).await.unwrap().is_empty());
        assert_eq!(
            store
                .query("u1", &MemoryFilter::new().include_expired())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryMemoryStore::new();
        store
            .put(MemoryRecord::new("u1", MemoryKind::Block, "x", 0.5).with_id("r1"))
            .await
            .unwrap();
        assert!(store.delete("r1").await.unwrap());
        assert!(!store.delete("r1").await.unwrap());
        assert!(store.is_empty().await);
    }
}
