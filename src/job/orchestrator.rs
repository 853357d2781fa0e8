//! 作业编排器
//!
//! 驱动步骤循环：装配上下文 → 调用模型 → 协议闸门 → 执行工具 → 更新预算与轨迹 → 按阈值写检查点。
//! 每次运行的协议标记与预算都放在本次运行独有的 JobRun 中，编排器本身不保存作业可变状态，
//! 多个作业可以并发运行。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::budget::{BudgetRates, BudgetTracker};
use crate::checkpoint::{
    CheckpointConfig, CheckpointId, CheckpointManager, CheckpointStore, ExecutionState,
};
use crate::context::{AssembledContext, ContextAssembler, ContextConfig, ContextSections};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, RetryPolicy};
use crate::job::{
    CompletionReason, Escalator, Job, JobGraph, JobId, JobOutcome, JobPayload, JobStatus,
    JobStore, ToolOutcome,
};
use crate::llm::{LlmError, Message, ModelClient, ModelRequest, ModelResponse, ToolCall};
use crate::memory::{
    MemoryCapture, MemoryClassifier, MemoryStore, RelevanceConfig, RelevanceEngine,
};
use crate::protocol::{GateContext, ProtocolGate, ProtocolViolation};
use crate::tools::{tool_call_schema_json, ToolCategory, ToolExecutor, ToolRegistry};

/// 编排参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 作业总步数上限
    pub max_steps: u32,
    /// 单次调用允许执行的步数；0 表示不限
    pub steps_per_invocation: u32,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// 没有给出时间 / 金额预算时的默认分钟数
    pub default_budget_minutes: f64,
    pub escalation_threshold: u32,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            steps_per_invocation: 0,
            model_timeout_secs: 120,
            tool_timeout_secs: 60,
            default_budget_minutes: 15.0,
            escalation_threshold: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// 对一次模型响应的处理决定（纯函数结果，不含副作用）
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// 通过闸门，执行工具
    Execute(ToolCall),
    /// 被闸门拒绝，违规说明作为工具结果反馈
    Reject {
        call: ToolCall,
        violation: ProtocolViolation,
    },
    /// 最终答复
    Finish(String),
    /// 最终答复缺少必要写入：每次都拒绝，直到作业完成一次写入
    RejectFinal {
        text: String,
        violation: ProtocolViolation,
    },
    /// 既没有文本也没有工具调用
    Empty,
}

/// 单次运行的可变状态，只属于一个作业
struct JobRun {
    job: Job,
    gate: GateContext,
    state: ExecutionState,
    context: Option<AssembledContext>,
    context_stale: bool,
    /// 模型报告上下文超长的次数，用于逐次缩小上下文
    shrink: u32,
    steps_this_invocation: u32,
    last_checkpoint_at: Instant,
    last_checkpoint_id: Option<CheckpointId>,
}

enum ModelFailure {
    /// 限流重试用尽：推迟到下一次调度
    Deferred(LlmError),
    Fatal(LlmError),
}

pub struct JobOrchestrator {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    assembler: ContextAssembler,
    relevance: Option<Arc<RelevanceEngine>>,
    capture: Option<MemoryCapture>,
    checkpoints: CheckpointManager,
    jobs: Arc<dyn JobStore>,
    tracker: BudgetTracker,
    recovery: RecoveryEngine,
    escalator: Escalator,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn builder() -> JobOrchestratorBuilder {
        JobOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn relevance(&self) -> Option<Arc<RelevanceEngine>> {
        self.relevance.clone()
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    /// 提交作业；引入依赖环时拒绝
    pub async fn submit(&self, payload: JobPayload) -> Result<JobId, AgentError> {
        self.submit_job(Job::new(payload, self.config.max_steps))
            .await
    }

    pub async fn submit_job(&self, job: Job) -> Result<JobId, AgentError> {
        let mut graph = self.graph().await?;
        graph.add(job.id.clone(), job.depends_on().iter().cloned());
        if let Some(cycle) = graph.find_cycle() {
            return Err(AgentError::CyclicDependency(cycle.join(" -> ")));
        }
        let id = job.id.clone();
        self.jobs.insert(job).await?;
        tracing::info!(job_id = %id, "job submitted");
        Ok(id)
    }

    pub async fn job(&self, job_id: &str) -> Result<Job, AgentError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AgentError::JobNotFound(job_id.to_string()))
    }

    /// 依赖均已完成、可以运行的作业
    pub async fn ready_jobs(&self) -> Result<Vec<JobId>, AgentError> {
        let jobs = self.jobs.list().await?;
        let statuses: BTreeMap<JobId, JobStatus> =
            jobs.iter().map(|j| (j.id.clone(), j.status)).collect();
        let graph = JobGraph::from_jobs(jobs.iter().map(|j| (&j.id, j.depends_on())));
        Ok(graph.ready_jobs(&statuses))
    }

    async fn graph(&self) -> Result<JobGraph, AgentError> {
        let jobs = self.jobs.list().await?;
        Ok(JobGraph::from_jobs(
            jobs.iter().map(|j| (&j.id, j.depends_on())),
        ))
    }

    /// 对模型响应做出决定：只读取状态，不做任何修改
    pub fn decide(
        &self,
        state: &ExecutionState,
        payload: &JobPayload,
        response: &ModelResponse,
    ) -> StepDecision {
        let ctx = GateContext::new(payload.scope_id.clone(), payload.durable_state);
        decide_step(self.executor.registry(), state, &ctx, response)
    }

    /// 运行作业直到完成、挂起、取消或失败
    pub async fn run(
        &self,
        job_id: &str,
        sections: &ContextSections,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, AgentError> {
        let mut job = self.job(job_id).await?;
        if job.status.is_terminal() {
            return Err(AgentError::JobFinished(job.id));
        }

        if let Some(outcome) = self.check_dependencies(&mut job).await? {
            return Ok(outcome);
        }

        if job.status == JobStatus::Running {
            // 上一次调用在运行中退出：接管作业，从最新检查点（没有则从第 0 步）继续
            tracing::warn!(job_id = %job.id, "job still RUNNING from a previous invocation, reclaiming");
        } else {
            self.transition(&mut job, JobStatus::Running).await?;
        }
        let mut run = self.start_run(job).await;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(&mut run).await;
            }
            if run.state.step_index >= run.job.max_steps {
                let text = best_text(&run.state);
                return self
                    .complete(&mut run, text, true, CompletionReason::StepLimit)
                    .await;
            }
            if run.state.budget.is_exhausted() {
                return self.wind_down(&mut run).await;
            }

            if run.context.is_none() || run.context_stale {
                self.assemble(&mut run, sections).await;
            }

            let response = match self.call_model(&mut run, sections).await {
                Ok(response) => response,
                Err(ModelFailure::Deferred(e)) => {
                    tracing::warn!(job_id = %run.job.id, error = %e, "model rate limited, deferring step");
                    return self.suspend(&mut run, CompletionReason::Deferred).await;
                }
                Err(ModelFailure::Fatal(e)) => {
                    return self.fail(&mut run, format!("model failed: {e}")).await;
                }
            };
            run.state.budget = run
                .state
                .budget
                .record_usage(response.usage.input_tokens, response.usage.output_tokens);

            let decision = decide_step(self.executor.registry(), &run.state, &run.gate, &response);
            tracing::debug!(
                job_id = %run.job.id,
                step = run.state.step_index,
                decision = decision_label(&decision),
                remaining = run.state.budget.remaining(),
                "step decided"
            );

            match decision {
                StepDecision::Finish(text) => {
                    run.state.transcript.push(Message::assistant(text.clone()));
                    run.state.step_index += 1;
                    return self
                        .complete(&mut run, text, false, CompletionReason::Answered)
                        .await;
                }
                StepDecision::RejectFinal { text, violation } => {
                    run.state.partial_text = Some(text.clone());
                    run.state.transcript.push(Message::assistant(text));
                    run.state
                        .transcript
                        .push(Message::user(violation.to_feedback().to_string()));
                }
                StepDecision::Reject { call, violation } => {
                    self.record_rejection(&mut run, call, violation);
                }
                StepDecision::Execute(call) => {
                    self.execute_tool(&mut run, call).await;
                }
                StepDecision::Empty => {
                    run.state.transcript.push(Message::user(
                        "Reply with a tool call or a final answer.",
                    ));
                }
            }

            run.state.step_index += 1;
            run.steps_this_invocation += 1;

            if self
                .checkpoints
                .should_checkpoint(run.state.step_index, run.last_checkpoint_at.elapsed())
            {
                self.save_checkpoint(&mut run).await;
            }

            let allowance = self.config.steps_per_invocation;
            if allowance > 0
                && run.steps_this_invocation >= allowance
                && run.state.step_index < run.job.max_steps
            {
                return self.suspend(&mut run, CompletionReason::Suspended).await;
            }
        }
    }

    async fn check_dependencies(&self, job: &mut Job) -> Result<Option<JobOutcome>, AgentError> {
        for dep in job.depends_on().to_vec() {
            let status = self.jobs.get(&dep).await?.map(|j| j.status);
            match status {
                Some(JobStatus::Completed) => {}
                Some(JobStatus::Failed) => {
                    tracing::warn!(job_id = %job.id, dependency = %dep, "dependency failed");
                    self.transition(job, JobStatus::Failed).await?;
                    let reason = AgentError::DependencyFailed {
                        job: job.id.clone(),
                        dependency: dep,
                    }
                    .to_string();
                    return Ok(Some(JobOutcome {
                        job_id: job.id.clone(),
                        status: JobStatus::Failed,
                        reason: CompletionReason::Failed(reason),
                        text: None,
                        partial: false,
                        steps_taken: 0,
                        budget: None,
                        checkpoint_id: None,
                    }));
                }
                _ => {
                    tracing::info!(job_id = %job.id, dependency = %dep, "dependency not completed, deferring");
                    return Ok(Some(JobOutcome {
                        job_id: job.id.clone(),
                        status: job.status,
                        reason: CompletionReason::Deferred,
                        text: None,
                        partial: false,
                        steps_taken: 0,
                        budget: None,
                        checkpoint_id: None,
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn start_run(&self, job: Job) -> JobRun {
        let gate = GateContext::new(job.payload.scope_id.clone(), job.payload.durable_state);
        let (state, last_checkpoint_id) = match self.checkpoints.load_latest(&job.id).await {
            Some(checkpoint) => {
                let resumed = self.checkpoints.resume_job(checkpoint);
                let id = resumed.checkpoint_id.clone();
                (resumed.into_state(), Some(id))
            }
            None => {
                let budget = self.tracker.init_for_payload(
                    job.payload.time_budget_minutes,
                    job.payload.cost_budget_usd,
                    self.config.default_budget_minutes,
                );
                let mut state = ExecutionState::new(budget);
                state.transcript.push(Message::user(job.payload.request.clone()));
                tracing::info!(
                    job_id = %job.id,
                    total_tokens = state.budget.total_tokens,
                    "starting job"
                );
                (state, None)
            }
        };
        JobRun {
            job,
            gate,
            state,
            context: None,
            context_stale: true,
            shrink: 0,
            steps_this_invocation: 0,
            last_checkpoint_at: Instant::now(),
            last_checkpoint_id,
        }
    }

    async fn assemble(&self, run: &mut JobRun, sections: &ContextSections) {
        let limit = self.assembler.budget_for(&run.state.budget) >> run.shrink.min(16);
        let ctx = self
            .assembler
            .build_within(
                limit.max(1),
                run.job.payload.scope_id.as_deref(),
                &run.job.payload.request,
                sections,
            )
            .await;
        run.context = Some(ctx);
        run.context_stale = false;
    }

    fn instructions(&self, run: &JobRun, with_tools: bool) -> String {
        let mut out = format!(
            "Job type: {}\n{}",
            run.job.payload.job_type,
            run.state.budget.status_message()
        );
        if with_tools {
            out.push_str("\n\nTo call a tool, reply with JSON matching this schema:\n");
            out.push_str(&tool_call_schema_json());
        } else {
            out.push_str("\n\nNo tools are available. Summarize what was done and give your final answer.");
        }
        out
    }

    fn request(&self, run: &JobRun, with_tools: bool) -> ModelRequest {
        ModelRequest {
            instructions: self.instructions(run, with_tools),
            context: run
                .context
                .as_ref()
                .map(|c| c.text.clone())
                .unwrap_or_default(),
            transcript: run.state.transcript.clone(),
            tools: if with_tools {
                self.executor.registry().specs()
            } else {
                Vec::new()
            },
            reasoning_tier: run.state.reasoning_tier(),
        }
    }

    async fn call_once(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let timeout = Duration::from_secs(self.config.model_timeout_secs);
        match tokio::time::timeout(timeout, self.model.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }

    async fn call_model(
        &self,
        run: &mut JobRun,
        sections: &ContextSections,
    ) -> Result<ModelResponse, ModelFailure> {
        let mut attempt = 0u32;
        loop {
            let request = self.request(run, true);
            let err = match self.call_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            match self.recovery.handle_llm(&err, attempt) {
                RecoveryAction::Retry { delay } => {
                    tracing::debug!(job_id = %run.job.id, attempt, ?delay, error = %err, "retrying model call");
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::ShrinkContext => {
                    run.shrink += 1;
                    tracing::info!(job_id = %run.job.id, shrink = run.shrink, "context too large, shrinking");
                    self.assemble(run, sections).await;
                }
                RecoveryAction::Defer => return Err(ModelFailure::Deferred(err)),
                _ => return Err(ModelFailure::Fatal(err)),
            }
            attempt += 1;
        }
    }

    fn record_rejection(&self, run: &mut JobRun, call: ToolCall, violation: ProtocolViolation) {
        tracing::info!(
            job_id = %run.job.id,
            tool = %call.tool,
            required = violation.required_action(),
            "tool call rejected by protocol"
        );
        let feedback = violation.to_feedback();
        run.state
            .transcript
            .push(Message::assistant(call_json(&call)));
        run.state.transcript.push(Message::tool(feedback.to_string()));
        run.state.trace.append(
            run.state.step_index,
            call.tool,
            call.args,
            feedback,
            ToolOutcome::Rejected,
            Some(violation.class()),
        );
    }

    async fn execute_tool(&self, run: &mut JobRun, call: ToolCall) {
        let registry = self.executor.registry();
        let gate = ProtocolGate::new(registry);
        run.state
            .transcript
            .push(Message::assistant(call_json(&call)));

        let mut attempt = 0u32;
        loop {
            match self.executor.execute(&call.tool, call.args.clone()).await {
                Ok(result) => {
                    let before = run.state.flags.clone();
                    gate.commit(&mut run.state.flags, &call, &run.gate);
                    debug_assert!(run.state.flags.extends(&before));
                    self.escalator
                        .record_success(&mut run.state.escalation, &call.tool);
                    if registry.category_of(&call.tool) == Some(ToolCategory::Mutate) {
                        run.context_stale = true;
                    }
                    let payload = serde_json::json!({ "ok": true, "result": result });
                    run.state.transcript.push(Message::tool(payload.to_string()));
                    run.state.trace.append(
                        run.state.step_index,
                        call.tool,
                        call.args,
                        result,
                        ToolOutcome::Success,
                        None,
                    );
                    return;
                }
                Err(err) => {
                    let class = err.class();
                    self.escalator
                        .record_failure(&mut run.state.escalation, &call.tool, class);
                    match self.recovery.handle(class, attempt, err.retry_after_ms()) {
                        RecoveryAction::Retry { delay } => {
                            tracing::debug!(tool = %call.tool, attempt, ?delay, error = %err, "retrying tool");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        _ => {
                            let payload = serde_json::json!({
                                "ok": false,
                                "error": class.as_str(),
                                "message": err.to_string(),
                            });
                            run.state.transcript.push(Message::tool(payload.to_string()));
                            run.state.trace.append(
                                run.state.step_index,
                                call.tool,
                                call.args,
                                payload,
                                ToolOutcome::Failure,
                                Some(class),
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    /// 预算耗尽：不带工具请求一次总结，拿不到文本时由轨迹拼出兜底答复
    async fn wind_down(&self, run: &mut JobRun) -> Result<JobOutcome, AgentError> {
        tracing::info!(
            job_id = %run.job.id,
            remaining = run.state.budget.remaining(),
            "budget exhausted, winding down"
        );
        let request = self.request(run, false);
        let text = match self.call_once(&request).await {
            Ok(response) => {
                run.state.budget = run
                    .state
                    .budget
                    .record_usage(response.usage.input_tokens, response.usage.output_tokens);
                response.text.filter(|t| !t.trim().is_empty())
            }
            Err(e) => {
                tracing::warn!(job_id = %run.job.id, error = %e, "wind-down call failed");
                None
            }
        };
        let text = text.unwrap_or_else(|| best_text(&run.state));
        self.complete(run, text, true, CompletionReason::BudgetExhausted)
            .await
    }

    async fn complete(
        &self,
        run: &mut JobRun,
        text: String,
        partial: bool,
        reason: CompletionReason,
    ) -> Result<JobOutcome, AgentError> {
        self.transition(&mut run.job, JobStatus::Completed).await?;
        tracing::info!(
            job_id = %run.job.id,
            steps = run.state.step_index,
            partial,
            reason = ?reason,
            "job completed"
        );
        self.capture_memory(run, &text).await;
        Ok(self.outcome(run, JobStatus::Completed, reason, Some(text), partial))
    }

    async fn capture_memory(&self, run: &JobRun, text: &str) {
        let (Some(capture), Some(scope)) = (&self.capture, run.job.payload.scope_id.as_deref())
        else {
            return;
        };
        match capture.capture(scope, &run.job.payload.request, text).await {
            Ok(outcome) => tracing::debug!(job_id = %run.job.id, ?outcome, "memory capture"),
            Err(e) => tracing::warn!(job_id = %run.job.id, error = %e, "memory capture failed"),
        }
    }

    async fn suspend(
        &self,
        run: &mut JobRun,
        reason: CompletionReason,
    ) -> Result<JobOutcome, AgentError> {
        self.save_checkpoint(run).await;
        self.transition(&mut run.job, JobStatus::Checkpointed).await?;
        let text = run.state.partial_text.clone();
        Ok(self.outcome(run, JobStatus::Checkpointed, reason, text, true))
    }

    async fn cancelled(&self, run: &mut JobRun) -> Result<JobOutcome, AgentError> {
        tracing::info!(job_id = %run.job.id, step = run.state.step_index, "job cancelled");
        if run.state.step_index > 0 {
            self.save_checkpoint(run).await;
        }
        self.transition(&mut run.job, JobStatus::Checkpointed).await?;
        let text = run.state.partial_text.clone();
        Ok(self.outcome(run, JobStatus::Checkpointed, CompletionReason::Cancelled, text, true))
    }

    async fn fail(&self, run: &mut JobRun, reason: String) -> Result<JobOutcome, AgentError> {
        tracing::warn!(job_id = %run.job.id, %reason, "job failed");
        self.transition(&mut run.job, JobStatus::Failed).await?;
        let text = run.state.partial_text.clone();
        Ok(self.outcome(run, JobStatus::Failed, CompletionReason::Failed(reason), text, true))
    }

    async fn save_checkpoint(&self, run: &mut JobRun) {
        if let Some(id) = self.checkpoints.save(&run.job.id, &run.state).await {
            run.last_checkpoint_id = Some(id);
        }
        run.last_checkpoint_at = Instant::now();
    }

    fn outcome(
        &self,
        run: &JobRun,
        status: JobStatus,
        reason: CompletionReason,
        text: Option<String>,
        partial: bool,
    ) -> JobOutcome {
        JobOutcome {
            job_id: run.job.id.clone(),
            status,
            reason,
            text,
            partial,
            steps_taken: run.state.step_index,
            budget: Some(run.state.budget.clone()),
            checkpoint_id: run.last_checkpoint_id.clone(),
        }
    }

    async fn transition(&self, job: &mut Job, next: JobStatus) -> Result<(), AgentError> {
        if !job.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }
        self.jobs.set_status(&job.id, next).await?;
        tracing::info!(job_id = %job.id, from = ?job.status, to = ?next, "job status");
        job.status = next;
        Ok(())
    }
}

fn decide_step(
    registry: &ToolRegistry,
    state: &ExecutionState,
    ctx: &GateContext,
    response: &ModelResponse,
) -> StepDecision {
    let gate = ProtocolGate::new(registry);
    if let Some(call) = &response.tool_call {
        return match gate.check(&state.flags, call, ctx) {
            Ok(()) => StepDecision::Execute(call.clone()),
            Err(violation) => StepDecision::Reject {
                call: call.clone(),
                violation,
            },
        };
    }
    match response.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => match gate.check_final_response(&state.flags, ctx) {
            Err(violation) => StepDecision::RejectFinal {
                text: text.to_string(),
                violation,
            },
            Ok(()) => StepDecision::Finish(text.to_string()),
        },
        _ => StepDecision::Empty,
    }
}

fn decision_label(decision: &StepDecision) -> &'static str {
    match decision {
        StepDecision::Execute(_) => "execute",
        StepDecision::Reject { .. } => "reject",
        StepDecision::Finish(_) => "finish",
        StepDecision::RejectFinal { .. } => "reject_final",
        StepDecision::Empty => "empty",
    }
}

fn call_json(call: &ToolCall) -> String {
    serde_json::to_string(call).unwrap_or_else(|_| call.tool.clone())
}

/// 最好的可用文本：最近一次模型文本，否则由轨迹生成摘要
fn best_text(state: &ExecutionState) -> String {
    state
        .partial_text
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.trace.summary())
}

/// 依赖注入构建器
#[derive(Default)]
pub struct JobOrchestratorBuilder {
    model: Option<Arc<dyn ModelClient>>,
    tools: ToolRegistry,
    memory_store: Option<Arc<dyn MemoryStore>>,
    classifier: Option<Arc<dyn MemoryClassifier>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    config: OrchestratorConfig,
    context_config: ContextConfig,
    relevance_config: RelevanceConfig,
    checkpoint_config: CheckpointConfig,
    rates: BudgetRates,
}

impl JobOrchestratorBuilder {
    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    /// 启用交互捕获（需要同时提供 memory_store）
    pub fn classifier(mut self, classifier: Arc<dyn MemoryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn relevance_config(mut self, config: RelevanceConfig) -> Self {
        self.relevance_config = config;
        self
    }

    pub fn checkpoint_config(mut self, config: CheckpointConfig) -> Self {
        self.checkpoint_config = config;
        self
    }

    pub fn budget_rates(mut self, rates: BudgetRates) -> Self {
        self.rates = rates;
        self
    }

    /// 一次性套用应用配置中的各段
    pub fn app_config(self, app: &crate::config::AppConfig) -> Self {
        self.config(app.orchestrator_config())
            .context_config(app.context.clone())
            .relevance_config(app.retrieval.clone())
            .checkpoint_config(app.checkpoint.clone())
            .budget_rates(app.budget.rates())
    }

    pub fn build(self) -> Result<JobOrchestrator, AgentError> {
        let model = self
            .model
            .ok_or_else(|| AgentError::ConfigError("model client is required".into()))?;
        let checkpoint_store = self
            .checkpoint_store
            .ok_or_else(|| AgentError::ConfigError("checkpoint store is required".into()))?;
        let jobs = self
            .job_store
            .ok_or_else(|| AgentError::ConfigError("job store is required".into()))?;
        if self.classifier.is_some() && self.memory_store.is_none() {
            return Err(AgentError::ConfigError(
                "memory classifier needs a memory store".into(),
            ));
        }

        let relevance = self
            .memory_store
            .map(|store| Arc::new(RelevanceEngine::new(store, self.relevance_config)));
        let capture = match (&relevance, self.classifier) {
            (Some(engine), Some(classifier)) => {
                Some(MemoryCapture::new(classifier, Arc::clone(engine)))
            }
            _ => None,
        };

        Ok(JobOrchestrator {
            model,
            executor: ToolExecutor::new(
                self.tools,
                Duration::from_secs(self.config.tool_timeout_secs),
            ),
            assembler: ContextAssembler::new(relevance.clone(), self.context_config),
            relevance,
            capture,
            checkpoints: CheckpointManager::new(checkpoint_store, self.checkpoint_config),
            jobs,
            tracker: BudgetTracker::new(self.rates),
            recovery: RecoveryEngine::new(self.config.retry.clone()),
            escalator: Escalator::new(self.config.escalation_threshold),
            config: self.config,
        })
    }
}
