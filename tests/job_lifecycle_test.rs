//! 作业生命周期集成测试：协议闸门、预算收尾、检查点续跑、取消、档位升级、依赖

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use forager::checkpoint::{
        Checkpoint, CheckpointConfig, CheckpointManager, InMemoryCheckpointStore,
    };
    use forager::context::ContextSections;
    use forager::core::{RetryPolicy, ToolError};
    use forager::job::{
        CompletionReason, InMemoryJobStore, JobOrchestrator, JobPayload, JobStatus, JobStore,
        OrchestratorConfig, StepDecision,
    };
    use forager::llm::{
        LlmError, ModelResponse, ReasoningTier, ScriptedModelClient, TokenUsage,
    };
    use forager::memory::{InMemoryMemoryStore, MemoryKind, MemoryRecord, MemoryStore};
    use forager::protocol::ProtocolState;
    use forager::tools::{Tool, ToolCategory, ToolRegistry};

    /// 记录调用次数的工具；前 fail_times 次返回 Transient，可选在调用时触发取消
    struct SpyTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_times: usize,
        cancel_on_call: Option<CancellationToken>,
    }

    impl SpyTool {
        fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    calls: calls.clone(),
                    fail_times: 0,
                    cancel_on_call: None,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Tool for SpyTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "records invocations"
        }

        async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            if n < self.fail_times {
                return Err(ToolError::Transient("upstream blip".into()));
            }
            Ok(json!({ "tool": self.name, "args": args }))
        }
    }

    struct Harness {
        orchestrator: JobOrchestrator,
        model: Arc<ScriptedModelClient>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        jobs: Arc<InMemoryJobStore>,
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryPolicy {
                base_delay_ms: 1,
                max_delay_ms: 2,
                ..RetryPolicy::default()
            },
            ..OrchestratorConfig::default()
        }
    }

    fn harness(
        script: Vec<Result<ModelResponse, LlmError>>,
        tools: ToolRegistry,
        config: OrchestratorConfig,
        memory: Option<Arc<dyn MemoryStore>>,
    ) -> Harness {
        harness_with_checkpoints(script, tools, config, memory, CheckpointConfig::default())
    }

    fn harness_with_checkpoints(
        script: Vec<Result<ModelResponse, LlmError>>,
        tools: ToolRegistry,
        config: OrchestratorConfig,
        memory: Option<Arc<dyn MemoryStore>>,
        checkpoint: CheckpointConfig,
    ) -> Harness {
        let model = Arc::new(ScriptedModelClient::new(script));
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let mut builder = JobOrchestrator::builder()
            .model(model.clone())
            .tools(tools)
            .checkpoint_store(checkpoints.clone())
            .checkpoint_config(checkpoint)
            .job_store(jobs.clone())
            .config(config);
        if let Some(store) = memory {
            builder = builder.memory_store(store);
        }
        Harness {
            orchestrator: builder.build().unwrap(),
            model,
            checkpoints,
            jobs,
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage::new(20, 10)
    }

    fn load_call() -> Result<ModelResponse, LlmError> {
        Ok(ModelResponse::tool("opportunity_load", json!({}), usage()))
    }

    fn patch_call() -> Result<ModelResponse, LlmError> {
        Ok(ModelResponse::tool(
            "opportunity_patch",
            json!({ "deadline": "2025-03-01" }),
            usage(),
        ))
    }

    fn answer(text: &str) -> Result<ModelResponse, LlmError> {
        Ok(ModelResponse::text(text, usage()))
    }

    fn opportunity_tools() -> (ToolRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (load, load_calls) = SpyTool::new("opportunity_load");
        let (patch, patch_calls) = SpyTool::new("opportunity_patch");
        let mut tools = ToolRegistry::new();
        tools.register_loader(load);
        tools.register(patch, ToolCategory::Mutate);
        (tools, load_calls, patch_calls)
    }

    fn sections() -> ContextSections {
        ContextSections {
            identity: vec!["You maintain sales opportunities.".into()],
            ..ContextSections::default()
        }
    }

    #[tokio::test]
    async fn test_patch_before_load_is_rejected_then_accepted() {
        let (tools, load_calls, patch_calls) = opportunity_tools();
        let h = harness(
            vec![patch_call(), load_call(), patch_call(), answer("Deadline updated.")],
            tools,
            fast_config(),
            None,
        );
        let id = h
            .orchestrator
            .submit(
                JobPayload::new("opportunity_update", "Move the deadline to March")
                    .with_scope("opp-1")
                    .durable(),
            )
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.reason, CompletionReason::Answered);
        assert_eq!(outcome.text.as_deref(), Some("Deadline updated."));
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        // 被拒绝的那次修改从未执行
        assert_eq!(patch_calls.load(Ordering::SeqCst), 1);

        let requests = h.model.requests();
        assert_eq!(requests.len(), 4);
        let feedback = requests[1].last_message.clone().unwrap();
        assert!(feedback.contains("PROTOCOL_VIOLATION"));
        assert!(feedback.contains("opportunity_load"));
        assert!(requests[0].instructions.contains("opportunity_update"));
        assert!(requests[0].context.contains("sales opportunities"));
    }

    #[tokio::test]
    async fn test_final_answer_without_write_is_rejected_until_step_limit() {
        let (tools, _, patch_calls) = opportunity_tools();
        let config = OrchestratorConfig {
            max_steps: 2,
            ..fast_config()
        };
        let h = harness(
            vec![answer("Nothing to change."), answer("Still nothing to change.")],
            tools,
            config,
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("opportunity_update", "Check it").with_scope("opp-1").durable())
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();

        // 两次最终答复都被拒绝，步数用尽后以部分完成结束
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.reason, CompletionReason::StepLimit);
        assert!(outcome.partial);
        assert_eq!(outcome.text.as_deref(), Some("Still nothing to change."));
        assert_eq!(outcome.steps_taken, 2);
        assert_eq!(patch_calls.load(Ordering::SeqCst), 0);
        assert!(h.model.requests()[1]
            .last_message
            .as_deref()
            .unwrap()
            .contains("PROTOCOL_VIOLATION"));
    }

    #[tokio::test]
    async fn test_tiny_cost_budget_ends_with_partial_answer() {
        let (tools, _, _) = opportunity_tools();
        let heavy = TokenUsage::new(300, 100);
        let h = harness(
            vec![
                Ok(ModelResponse::tool("opportunity_load", json!({}), heavy)),
                Ok(ModelResponse::tool("opportunity_load", json!({}), heavy)),
                Ok(ModelResponse::text("Loaded the opportunity; no changes made.", usage())),
            ],
            tools,
            fast_config(),
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Summarize the opportunity").with_cost_budget(0.01))
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.reason, CompletionReason::BudgetExhausted);
        assert!(outcome.partial);
        assert_eq!(
            outcome.text.as_deref(),
            Some("Loaded the opportunity; no changes made.")
        );
        assert_eq!(outcome.steps_taken, 2);
        let budget = outcome.budget.unwrap();
        assert_eq!(budget.total_tokens, 666);
        assert!(budget.remaining() < 0);

        let requests = h.model.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].tool_names.is_empty());
        assert!(!requests[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_empty_wind_down_falls_back_to_trace_summary() {
        let (tools, _, _) = opportunity_tools();
        let h = harness(
            vec![
                Ok(ModelResponse::tool("opportunity_load", json!({}), TokenUsage::new(600, 100))),
                Ok(ModelResponse::text("", usage())),
            ],
            tools,
            fast_config(),
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Summarize").with_cost_budget(0.01))
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.reason, CompletionReason::BudgetExhausted);
        let text = outcome.text.unwrap();
        assert!(!text.is_empty());
        assert!(text.contains("opportunity_load"));
    }

    #[tokio::test]
    async fn test_step_limit_completes_partially() {
        let (tools, _, _) = opportunity_tools();
        let config = OrchestratorConfig {
            max_steps: 2,
            ..fast_config()
        };
        let h = harness(vec![load_call(), load_call(), load_call()], tools, config, None);
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Look around"))
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.reason, CompletionReason::StepLimit);
        assert!(outcome.partial);
        assert_eq!(outcome.steps_taken, 2);
        assert!(!outcome.text.unwrap().is_empty());
        assert_eq!(h.model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_suspend_and_resume_across_invocations() {
        let (tools, load_calls, patch_calls) = opportunity_tools();
        let config = OrchestratorConfig {
            steps_per_invocation: 2,
            ..fast_config()
        };
        let h = harness(
            vec![load_call(), patch_call(), answer("Done.")],
            tools,
            config,
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("opportunity_update", "Fix deadline").with_scope("opp-1").durable())
            .await
            .unwrap();

        let first = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.status, JobStatus::Checkpointed);
        assert_eq!(first.reason, CompletionReason::Suspended);
        assert_eq!(first.steps_taken, 2);
        assert!(first.checkpoint_id.is_some());
        assert_eq!(h.checkpoints.count(&id).await, 1);
        assert_eq!(h.orchestrator.job(&id).await.unwrap().status, JobStatus::Checkpointed);

        // 恢复出的状态对同一响应做出与未中断时相同的决定
        let manager = CheckpointManager::new(h.checkpoints.clone(), CheckpointConfig::default());
        let resumed = manager.resume_job(manager.load_latest(&id).await.unwrap());
        assert_eq!(resumed.step_index, 2);
        assert!(resumed.flags.did_mutate);
        let payload = h.orchestrator.job(&id).await.unwrap().payload;
        let decision = h.orchestrator.decide(
            &resumed.into_state(),
            &payload,
            &ModelResponse::text("Done.", usage()),
        );
        assert_eq!(decision, StepDecision::Finish("Done.".into()));

        let second = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.reason, CompletionReason::Answered);
        assert_eq!(second.steps_taken, 3);
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(patch_calls.load(Ordering::SeqCst), 1);

        // request, 两次工具调用及其结果
        let requests = h.model.requests();
        assert_eq!(requests[2].transcript_len, 5);
    }

    #[tokio::test]
    async fn test_job_left_running_is_reclaimed_from_checkpoint() {
        let (tools, load_calls, patch_calls) = opportunity_tools();
        let config = OrchestratorConfig {
            steps_per_invocation: 1,
            ..fast_config()
        };
        let h = harness(
            vec![load_call(), patch_call(), answer("Done.")],
            tools,
            config,
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("opportunity_update", "Fix deadline").with_scope("opp-1").durable())
            .await
            .unwrap();

        let first = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.status, JobStatus::Checkpointed);
        assert_eq!(first.steps_taken, 1);

        // worker 在运行中崩溃：状态停留在 RUNNING
        h.jobs.set_status(&id, JobStatus::Running).await.unwrap();
        let second = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Checkpointed);
        assert_eq!(second.steps_taken, 2);
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(patch_calls.load(Ordering::SeqCst), 1);

        h.jobs.set_status(&id, JobStatus::Running).await.unwrap();
        let third = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.status, JobStatus::Completed);
        assert_eq!(third.reason, CompletionReason::Answered);
        assert_eq!(third.steps_taken, 3);
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(patch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.model.requests()[2].transcript_len, 5);
    }

    #[tokio::test]
    async fn test_job_left_running_without_checkpoint_starts_over() {
        let (tools, load_calls, _) = opportunity_tools();
        let h = harness(vec![load_call(), answer("Read.")], tools, fast_config(), None);
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Read it"))
            .await
            .unwrap();
        h.jobs.set_status(&id, JobStatus::Running).await.unwrap();

        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.steps_taken, 2);
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.model.requests()[0].transcript_len, 1);
    }

    #[tokio::test]
    async fn test_protocol_flags_only_grow_across_checkpoints() {
        let (mut tools, _, _) = opportunity_tools();
        let (reply, reply_calls) = SpyTool::new("reply");
        tools.register(reply, ToolCategory::Communicate);
        let h = harness_with_checkpoints(
            vec![
                load_call(),
                patch_call(),
                Ok(ModelResponse::tool("reply", json!({ "text": "Moved." }), usage())),
                answer("Moved the deadline."),
            ],
            tools,
            fast_config(),
            None,
            CheckpointConfig {
                every_steps: 1,
                ..CheckpointConfig::default()
            },
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("opportunity_update", "Move the deadline").with_scope("opp-1").durable())
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.reason, CompletionReason::Answered);
        assert_eq!(reply_calls.load(Ordering::SeqCst), 1);

        let snapshots: Vec<Checkpoint> = h
            .checkpoints
            .history(&id)
            .await
            .iter()
            .map(|blob| serde_json::from_str(blob).unwrap())
            .collect();
        assert!(snapshots.len() >= 3);
        for pair in snapshots.windows(2) {
            assert!(pair[0].state.step_index < pair[1].state.step_index);
            assert!(pair[1].state.flags.extends(&pair[0].state.flags));
            assert!(pair[1].state.flags.state() >= pair[0].state.flags.state());
        }
        let states: Vec<ProtocolState> =
            snapshots.iter().take(3).map(|c| c.state.flags.state()).collect();
        assert_eq!(
            states,
            vec![ProtocolState::Loaded, ProtocolState::Mutated, ProtocolState::Communicated]
        );
        assert!(snapshots[0].state.flags.loaded_scopes.contains("opp-1"));
    }

    #[tokio::test]
    async fn test_cancel_checkpoints_then_resumes() {
        let cancel = CancellationToken::new();
        let (mut load, load_calls) = SpyTool::new("opportunity_load");
        load.cancel_on_call = Some(cancel.clone());
        let mut tools = ToolRegistry::new();
        tools.register_loader(load);

        let h = harness(vec![load_call(), answer("Answer.")], tools, fast_config(), None);
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Read it"))
            .await
            .unwrap();

        let cancelled = h.orchestrator.run(&id, &sections(), &cancel).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Checkpointed);
        assert_eq!(cancelled.reason, CompletionReason::Cancelled);
        assert_eq!(cancelled.steps_taken, 1);
        assert!(cancelled.checkpoint_id.is_some());

        let finished = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(finished.reason, CompletionReason::Answered);
        assert_eq!(finished.steps_taken, 2);
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_transient_failures_raise_reasoning_tier() {
        let (mut flaky, calls) = SpyTool::new("market_lookup");
        flaky.fail_times = 2;
        let mut tools = ToolRegistry::new();
        tools.register(flaky, ToolCategory::Read);

        let h = harness(
            vec![
                Ok(ModelResponse::tool("market_lookup", json!({ "q": "acme" }), usage())),
                answer("Acme is growing."),
            ],
            tools,
            fast_config(),
            None,
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "How is Acme doing?"))
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, CompletionReason::Answered);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let requests = h.model.requests();
        assert_eq!(requests[0].reasoning_tier, ReasoningTier::Low);
        assert_eq!(requests[1].reasoning_tier, ReasoningTier::Medium);
    }

    #[tokio::test]
    async fn test_dependencies_defer_then_propagate_failure() {
        let (tools, _, _) = opportunity_tools();
        let h = harness(
            vec![Err(LlmError::Permanent("invalid request".into()))],
            tools,
            fast_config(),
            None,
        );
        let upstream = h
            .orchestrator
            .submit(JobPayload::new("research", "Gather facts"))
            .await
            .unwrap();
        let downstream = h
            .orchestrator
            .submit(JobPayload::new("report", "Write report").depends_on(upstream.clone()))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.ready_jobs().await.unwrap(), vec![upstream.clone()]);

        let deferred = h
            .orchestrator
            .run(&downstream, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(deferred.reason, CompletionReason::Deferred);
        assert_eq!(deferred.status, JobStatus::Queued);
        assert_eq!(deferred.steps_taken, 0);
        assert!(h.model.requests().is_empty());

        let failed = h
            .orchestrator
            .run(&upstream, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);

        let propagated = h
            .orchestrator
            .run(&downstream, &sections(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(propagated.status, JobStatus::Failed);
        match propagated.reason {
            CompletionReason::Failed(msg) => assert!(msg.contains(&upstream)),
            other => panic!("unexpected reason {other:?}"),
        }
        assert!(h.orchestrator.ready_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scope_memories_reach_the_context() {
        let store = Arc::new(InMemoryMemoryStore::new());
        store
            .put(
                MemoryRecord::new(
                    "opp-1",
                    MemoryKind::Semantic,
                    "Procurement requires two weeks notice before any deadline change",
                    0.8,
                )
                .with_tags(["deadline"]),
            )
            .await
            .unwrap();
        store
            .put(MemoryRecord::new(
                "opp-2",
                MemoryKind::Semantic,
                "Unrelated scope secret",
                1.0,
            ))
            .await
            .unwrap();

        let (tools, _, _) = opportunity_tools();
        let h = harness(
            vec![answer("Noted.")],
            tools,
            fast_config(),
            Some(store.clone()),
        );
        let id = h
            .orchestrator
            .submit(JobPayload::new("research", "Can we change the deadline?").with_scope("opp-1"))
            .await
            .unwrap();
        h.orchestrator
            .run(&id, &sections(), &CancellationToken::new())
            .await
            .unwrap();

        let context = h.model.requests()[0].context.clone();
        assert!(context.contains("two weeks notice"));
        assert!(!context.contains("Unrelated scope secret"));
    }
}
