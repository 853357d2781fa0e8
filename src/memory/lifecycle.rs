//! 记忆生命周期：过期清理与低价值记录归档
//!
//! sweep 先删除 ttl 已到期的记录，再把「久未更新且 importance 低」的同类记录合并为一条
//! 带 archived 标签的 SEMANTIC 摘要，删除原记录。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::store::{MemoryFilter, MemoryStore, MemoryStoreError};
use crate::memory::{MemoryKind, MemoryRecord};

pub const ARCHIVED_TAG: &str = "archived";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub compact_after_days: i64,
    pub compact_below_importance: f32,
    /// 少于此数量的组不归档
    pub min_group_size: usize,
    /// 摘要中每条记录保留的最大字符数
    pub summary_line_chars: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            compact_after_days: 90,
            compact_below_importance: 0.3,
            min_group_size: 2,
            summary_line_chars: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub expired_deleted: usize,
    pub compacted: usize,
    /// 新生成的归档记录 id
    pub archived_ids: Vec<String>,
}

pub struct MemoryLifecycle {
    store: Arc<dyn MemoryStore>,
    config: LifecycleConfig,
}

impl MemoryLifecycle {
    pub fn new(store: Arc<dyn MemoryStore>, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    pub async fn sweep(&self, scope_id: &str) -> Result<SweepReport, MemoryStoreError> {
        self.sweep_at(Utc::now(), scope_id).await
    }

    pub async fn sweep_at(
        &self,
        now: DateTime<Utc>,
        scope_id: &str,
    ) -> Result<SweepReport, MemoryStoreError> {
        let mut report = SweepReport::default();
        let records = self
            .store
            .query(scope_id, &MemoryFilter::new().include_expired())
            .await?;

        let cutoff = now - Duration::days(self.config.compact_after_days);
        let mut groups: BTreeMap<MemoryKind, Vec<MemoryRecord>> = BTreeMap::new();
        for record in records {
            if record.is_expired(now) {
                if self.store.delete(&record.id).await? {
                    report.expired_deleted += 1;
                }
                continue;
            }
            if record.tags.contains(ARCHIVED_TAG) {
                continue;
            }
            if record.updated_at < cutoff
                && record.importance() < self.config.compact_below_importance
            {
                groups.entry(record.kind).or_default().push(record);
            }
        }

        for (kind, mut group) in groups {
            if group.len() < self.config.min_group_size.max(1) {
                continue;
            }
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let archive = self.summarize(scope_id, kind, &group);
            let archive_id = archive.id.clone();
            self.store.put(archive).await?;
            for record in &group {
                self.store.delete(&record.id).await?;
            }
            report.compacted += group.len();
            tracing::info!(
                scope = scope_id,
                kind = ?kind,
                count = group.len(),
                archive = %archive_id,
                "compacted memories"
            );
            report.archived_ids.push(archive_id);
        }

        Ok(report)
    }

    fn summarize(&self, scope_id: &str, kind: MemoryKind, group: &[MemoryRecord]) -> MemoryRecord {
        let lines: Vec<String> = group
            .iter()
            .map(|r| {
                let first = r.content.lines().next().unwrap_or("").trim();
                let clipped: String = first.chars().take(self.config.summary_line_chars).collect();
                format!("- {clipped}")
            })
            .collect();
        let importance = group
            .iter()
            .map(|r| r.importance())
            .fold(0.0_f32, f32::max);
        let content = format!(
            "Archived {} {:?} memories:\n{}",
            group.len(),
            kind,
            lines.join("\n")
        );

        let mut archive = MemoryRecord::new(scope_id, MemoryKind::Semantic, content, importance)
            .with_tags([ARCHIVED_TAG]);
        for r in group {
            archive.tags.extend(r.tags.iter().cloned());
        }
        archive
    }
}
