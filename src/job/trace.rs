//! 工具调用轨迹：只追加，按执行顺序排列

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolOutcome {
    Success,
    Failure,
    /// 被协议闸门拒绝，未执行
    Rejected,
}

/// 一条工具调用记录，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// 在整个作业中的序号（从 0 开始，连续）
    pub seq: u64,
    pub step_index: u32,
    pub tool_name: String,
    pub args: Value,
    /// 成功时为工具返回值，失败 / 拒绝时为结构化错误
    pub result: Value,
    pub outcome: ToolOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTrace {
    records: Vec<ToolCallRecord>,
    /// 下一条记录的序号；只保留尾部时序号仍然连续
    next_seq: u64,
}

impl ToolTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        step_index: u32,
        tool_name: impl Into<String>,
        args: Value,
        result: Value,
        outcome: ToolOutcome,
        error_class: Option<ErrorClass>,
    ) -> &ToolCallRecord {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push(ToolCallRecord {
            seq,
            step_index,
            tool_name: tool_name.into(),
            args,
            result,
            outcome,
            error_class,
            timestamp: Utc::now(),
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 作业中累计的记录数（包括已被裁掉的）
    pub fn total_recorded(&self) -> u64 {
        self.next_seq
    }

    /// 只保留最近 n 条（用于检查点）
    pub fn tail(&self, n: usize) -> ToolTrace {
        let start = self.records.len().saturating_sub(n);
        ToolTrace {
            records: self.records[start..].to_vec(),
            next_seq: self.next_seq,
        }
    }

    pub fn count(&self, outcome: ToolOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// 由轨迹拼出的兜底摘要（模型收尾没有给出文本时使用）
    pub fn summary(&self) -> String {
        let ok = self.count(ToolOutcome::Success);
        let failed = self.count(ToolOutcome::Failure);
        let rejected = self.count(ToolOutcome::Rejected);
        let mut out = format!(
            "Stopped before a final answer. Tool calls: {ok} succeeded, {failed} failed, {rejected} rejected."
        );
        let recent: Vec<&str> = self
            .records
            .iter()
            .rev()
            .filter(|r| r.outcome == ToolOutcome::Success)
            .take(5)
            .map(|r| r.tool_name.as_str())
            .collect();
        if !recent.is_empty() {
            let mut recent = recent;
            recent.reverse();
            out.push_str(&format!(" Completed: {}.", recent.join(", ")));
        }
        out
    }
}
