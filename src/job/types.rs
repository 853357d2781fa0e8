//! 作业类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::BudgetState;

pub type JobId = String;

/// 作业状态：QUEUED → RUNNING → {CHECKPOINTED → RUNNING | COMPLETED | FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Checkpointed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// 允许的状态迁移
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Running, Checkpointed)
                | (Running, Completed)
                | (Running, Failed)
                | (Checkpointed, Running)
                | (Checkpointed, Failed)
        )
    }
}

/// 作业输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "type")]
    pub job_type: String,
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget_usd: Option<f64>,
    #[serde(default)]
    pub depends_on: Vec<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    /// 作用域存在持久状态：沟通 / 给出最终答复前必须先写入
    #[serde(default)]
    pub durable_state: bool,
}

impl JobPayload {
    pub fn new(job_type: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn with_cost_budget(mut self, usd: f64) -> Self {
        self.cost_budget_usd = Some(usd);
        self
    }

    pub fn with_time_budget(mut self, minutes: f64) -> Self {
        self.time_budget_minutes = Some(minutes);
        self
    }

    pub fn depends_on(mut self, job_id: impl Into<JobId>) -> Self {
        self.depends_on.push(job_id.into());
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable_state = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub max_steps: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload, max_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            status: JobStatus::Queued,
            max_steps,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn depends_on(&self) -> &[JobId] {
        &self.payload.depends_on
    }
}

/// 本次运行结束的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum CompletionReason {
    /// 模型给出最终答复且协议满足
    Answered,
    /// 达到 max_steps
    StepLimit,
    /// 预算耗尽后收尾
    BudgetExhausted,
    /// 依赖未完成，未消耗步数
    Deferred,
    /// 外部取消
    Cancelled,
    /// 单次调用的步数额度用完，等待下次调用续跑
    Suspended,
    Failed(String),
}

/// 一次 run 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub reason: CompletionReason,
    pub text: Option<String>,
    pub partial: bool,
    pub steps_taken: u32,
    pub budget: Option<BudgetState>,
    pub checkpoint_id: Option<String>,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
