//! 检查点管理
//!
//! 每 N 步或距上次检查点超过 T 时保存一次。保存失败只记日志，作业继续无检查点运行；
//! 读取或解码失败视为没有检查点，作业从第 0 步重新开始。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::{
    Checkpoint, CheckpointId, CheckpointStore, ExecutionState, ResumedJobContext,
};
use crate::llm::{Message, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub every_steps: u32,
    pub every_secs: u64,
    /// 检查点中保留的轨迹条数
    pub trace_tail: usize,
    /// 检查点中保留的对话条数
    pub transcript_tail: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_steps: 10,
            every_secs: 300,
            trace_tail: 50,
            transcript_tail: 100,
        }
    }
}

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, config: CheckpointConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// step_index 为已完成的步数；elapsed 为距上次检查点的时间
    pub fn should_checkpoint(&self, step_index: u32, elapsed: Duration) -> bool {
        let by_steps =
            self.config.every_steps > 0 && step_index > 0 && step_index % self.config.every_steps == 0;
        let by_time = elapsed >= Duration::from_secs(self.config.every_secs);
        by_steps || by_time
    }

    pub async fn save(&self, job_id: &str, state: &ExecutionState) -> Option<CheckpointId> {
        let mut snapshot = state.clone();
        snapshot.trace = state.trace.tail(self.config.trace_tail);
        trim_transcript(&mut snapshot.transcript, self.config.transcript_tail);

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            created_at: Utc::now(),
            state: snapshot,
        };
        let blob = match serde_json::to_string(&checkpoint) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to encode checkpoint");
                return None;
            }
        };
        match self.store.save(job_id, &blob).await {
            Ok(_) => {
                tracing::info!(
                    job_id,
                    checkpoint = %checkpoint.id,
                    step = checkpoint.state.step_index,
                    "checkpoint saved"
                );
                Some(checkpoint.id)
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "checkpoint save failed, continuing without it");
                None
            }
        }
    }

    pub async fn load_latest(&self, job_id: &str) -> Option<Checkpoint> {
        let blob = match self.store.load_latest(job_id).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "checkpoint load failed, starting fresh");
                return None;
            }
        };
        match serde_json::from_str::<Checkpoint>(&blob) {
            Ok(cp) if cp.job_id == job_id => Some(cp),
            Ok(cp) => {
                tracing::warn!(job_id, found = %cp.job_id, "checkpoint belongs to another job, ignoring");
                None
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "checkpoint decode failed, starting fresh");
                None
            }
        }
    }

    pub fn resume_job(&self, checkpoint: Checkpoint) -> ResumedJobContext {
        tracing::info!(
            job_id = %checkpoint.job_id,
            step = checkpoint.state.step_index,
            "resuming from checkpoint"
        );
        ResumedJobContext::from_checkpoint(checkpoint)
    }
}

/// 保留第一条（原始请求）与最近的消息，总数不超过 keep；
/// 截断点落在工具结果上时向后移，不留下没有对应调用的工具结果
fn trim_transcript(transcript: &mut Vec<Message>, keep: usize) {
    if transcript.len() <= keep.max(1) {
        return;
    }
    let mut start = (transcript.len() - keep.saturating_sub(1)).max(1);
    while start < transcript.len() && transcript[start].role == Role::Tool {
        start += 1;
    }
    transcript.drain(1..start);
}
