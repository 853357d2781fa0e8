//! 检查点数据

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetState;
use crate::job::{EscalationState, JobId, ToolTrace};
use crate::llm::{Message, ReasoningTier};
use crate::protocol::ProtocolFlags;

pub type CheckpointId = String;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(e: rusqlite::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// 作业执行进度：恢复时足以从下一步继续，无需重放已提交的修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// 下一步的序号
    pub step_index: u32,
    pub flags: ProtocolFlags,
    pub budget: BudgetState,
    pub trace: ToolTrace,
    #[serde(default)]
    pub transcript: Vec<Message>,
    #[serde(default)]
    pub escalation: EscalationState,
    #[serde(default)]
    pub partial_text: Option<String>,
}

impl ExecutionState {
    pub fn new(budget: BudgetState) -> Self {
        Self {
            step_index: 0,
            flags: ProtocolFlags::new(),
            budget,
            trace: ToolTrace::new(),
            transcript: Vec::new(),
            escalation: EscalationState::default(),
            partial_text: None,
        }
    }

    pub fn reasoning_tier(&self) -> ReasoningTier {
        self.escalation.tier
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
    pub state: ExecutionState,
}

impl Checkpoint {
    pub fn step_index(&self) -> u32 {
        self.state.step_index
    }

    pub fn reasoning_tier(&self) -> ReasoningTier {
        self.state.reasoning_tier()
    }
}

/// 从检查点恢复出的运行上下文
#[derive(Debug, Clone, PartialEq)]
pub struct ResumedJobContext {
    pub job_id: JobId,
    pub checkpoint_id: CheckpointId,
    pub step_index: u32,
    pub flags: ProtocolFlags,
    pub budget: BudgetState,
    pub trace: ToolTrace,
    pub reasoning_tier: ReasoningTier,
    state: ExecutionState,
}

impl ResumedJobContext {
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let state = checkpoint.state;
        Self {
            job_id: checkpoint.job_id,
            checkpoint_id: checkpoint.id,
            step_index: state.step_index,
            flags: state.flags.clone(),
            budget: state.budget.clone(),
            trace: state.trace.clone(),
            reasoning_tier: state.reasoning_tier(),
            state,
        }
    }

    /// 交还给编排循环的完整执行状态
    pub fn into_state(self) -> ExecutionState {
        self.state
    }
}
