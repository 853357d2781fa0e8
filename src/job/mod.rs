//! 作业：类型、依赖图、工具调用轨迹、推理档位升级与编排循环

pub mod escalation;
pub mod graph;
pub mod orchestrator;
pub mod store;
pub mod trace;
pub mod types;

pub use escalation::{EscalationState, Escalator};
pub use graph::JobGraph;
pub use orchestrator::{JobOrchestrator, JobOrchestratorBuilder, OrchestratorConfig, StepDecision};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use trace::{ToolCallRecord, ToolOutcome, ToolTrace};
pub use types::{CompletionReason, Job, JobId, JobOutcome, JobPayload, JobStatus};
