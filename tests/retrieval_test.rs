//! 记忆检索集成测试：排序确定性、重要度与弱命中的权衡、SQLite 存储下的一致性

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use forager::memory::{
        InMemoryMemoryStore, MemoryKind, MemoryRecord, MemoryStore, RelevanceConfig,
        RelevanceEngine, SqliteMemoryStore,
    };

    async fn seed(store: &dyn MemoryStore) {
        let at = Utc::now() - Duration::days(2);
        let records = [
            ("m-1", "Client prefers email over phone calls", 0.9, vec!["contact"]),
            ("m-2", "The pricing deadline moved to next quarter", 0.1, vec![]),
            ("m-3", "Pricing review meeting notes", 0.5, vec!["pricing"]),
            ("m-4", "Budget approval pending from finance", 0.5, vec![]),
        ];
        for (id, content, importance, tags) in records {
            store
                .put(
                    MemoryRecord::new("opp-7", MemoryKind::Semantic, content, importance)
                        .with_id(id)
                        .with_tags(tags)
                        .with_timestamps(at, at),
                )
                .await
                .unwrap();
        }
    }

    fn ids(records: &[MemoryRecord]) -> Vec<String> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        seed(store.as_ref()).await;
        let engine = RelevanceEngine::new(store, RelevanceConfig::default());

        let first = engine.retrieve("opp-7", "pricing deadline", &[], 10, 0.0).await.unwrap();
        let second = engine.retrieve("opp-7", "pricing deadline", &[], 10, 0.0).await.unwrap();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.len(), 4);
    }

    #[tokio::test]
    async fn test_high_importance_outranks_weak_overlap() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        seed(store.as_ref()).await;
        let engine = RelevanceEngine::new(store, RelevanceConfig::default());

        // m-2 只以关键词命中一个查询词，m-1 完全不命中但重要度 0.9
        let ranked = engine
            .retrieve("opp-7", "when is the renewal deadline for acme contract", &[], 10, 0.0)
            .await
            .unwrap();
        let order = ids(&ranked);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("m-1") < pos("m-2"));
    }

    #[tokio::test]
    async fn test_high_importance_outranks_two_thirds_keyword_overlap() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        seed(store.as_ref()).await;
        let engine = RelevanceEngine::new(store, RelevanceConfig::default());

        // m-2 以关键词命中三个查询词中的两个
        let ranked = engine
            .retrieve("opp-7", "pricing deadline renewal", &[], 10, 0.0)
            .await
            .unwrap();
        let order = ids(&ranked);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("m-1") < pos("m-2"));
    }

    #[tokio::test]
    async fn test_sqlite_and_memory_stores_rank_alike() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite: Arc<dyn MemoryStore> =
            Arc::new(SqliteMemoryStore::open(dir.path().join("memory.db")).unwrap());
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        seed(sqlite.as_ref()).await;
        seed(memory.as_ref()).await;

        let a = RelevanceEngine::new(sqlite, RelevanceConfig::default())
            .retrieve("opp-7", "pricing review", &[], 3, 0.0)
            .await
            .unwrap();
        let b = RelevanceEngine::new(memory, RelevanceConfig::default())
            .retrieve("opp-7", "pricing review", &[], 3, 0.0)
            .await
            .unwrap();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a[0].id, "m-3");
    }

    #[tokio::test]
    async fn test_other_scope_is_invisible() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        seed(store.as_ref()).await;
        let engine = RelevanceEngine::new(store, RelevanceConfig::default());
        assert!(engine
            .retrieve("opp-8", "pricing", &[], 10, 0.0)
            .await
            .unwrap()
            .is_empty());
    }
}
