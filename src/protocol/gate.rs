//! 工具调用协议闸门
//!
//! 在执行前检查顺序约束：Mutate 需先加载同一作用域；需要持久状态的作业，Communicate 需先写入。
//! Read 与 ScopeIndependent 不受约束。闸门本身无状态，标记由调用方持有并传入。

use serde_json::Value;
use thiserror::Error;

use crate::core::ErrorClass;
use crate::llm::ToolCall;
use crate::protocol::ProtocolFlags;
use crate::tools::{ToolCategory, ToolRegistry};

/// 作业层面的闸门参数
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    /// 作业默认作用域；工具参数中的 scope_id 优先
    pub scope_id: Option<String>,
    /// 作业作用域存在持久状态：沟通前必须先写入
    pub requires_write: bool,
}

impl GateContext {
    pub fn new(scope_id: Option<String>, requires_write: bool) -> Self {
        Self {
            scope_id,
            requires_write,
        }
    }

    /// 本次调用作用的作用域
    pub fn scope_for<'a>(&'a self, args: &'a Value) -> Option<&'a str> {
        args.get("scope_id")
            .and_then(Value::as_str)
            .or(self.scope_id.as_deref())
    }
}

/// 协议违规：工具未执行，作为可纠正的结构化结果反馈给模型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    #[error("{tool} requires the scope to be loaded first; call {load_tool} before retrying")]
    LoadRequired {
        tool: String,
        load_tool: String,
        scope: Option<String>,
    },

    #[error("{tool} requires a mutation or journal entry first; record the outcome before communicating")]
    WriteRequired { tool: String },

    #[error("final answer requires a mutation or journal entry first; record the outcome before finishing")]
    FinalWithoutWrite,
}

impl ProtocolViolation {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::ProtocolViolation
    }

    /// 需要先执行的动作（工具名或写入）
    pub fn required_action(&self) -> &str {
        match self {
            ProtocolViolation::LoadRequired { load_tool, .. } => load_tool,
            ProtocolViolation::WriteRequired { .. } | ProtocolViolation::FinalWithoutWrite => {
                "mutation"
            }
        }
    }

    /// 反馈给模型的结构化工具结果
    pub fn to_feedback(&self) -> Value {
        serde_json::json!({
            "ok": false,
            "error": self.class().as_str(),
            "required": self.required_action(),
            "message": self.to_string(),
        })
    }
}

/// 协议闸门：只读取注册表中的分类标签
pub struct ProtocolGate<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> ProtocolGate<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    /// 执行前检查；拒绝时不改变任何标记。未注册的工具放行，由执行器报告 UnknownTool
    pub fn check(
        &self,
        flags: &ProtocolFlags,
        call: &ToolCall,
        ctx: &GateContext,
    ) -> Result<(), ProtocolViolation> {
        let Some(registration) = self.registry.get(&call.tool) else {
            return Ok(());
        };
        match registration.category() {
            ToolCategory::Read | ToolCategory::ScopeIndependent => Ok(()),
            ToolCategory::Mutate => {
                let scope = ctx.scope_for(&call.args);
                // 日志追加只写新条目，不依赖已加载的状态
                if registration.is_journal() || flags.is_loaded(scope) {
                    return Ok(());
                }
                let load_tool = self
                    .registry
                    .load_tool_for(&call.tool)
                    .unwrap_or_else(|| "load".to_string());
                Err(ProtocolViolation::LoadRequired {
                    tool: call.tool.clone(),
                    load_tool,
                    scope: scope.map(str::to_string),
                })
            }
            ToolCategory::Communicate => {
                if ctx.requires_write && !flags.did_mutate {
                    Err(ProtocolViolation::WriteRequired {
                        tool: call.tool.clone(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// 工具成功执行后翻转标记（只增不减）
    pub fn commit(&self, flags: &mut ProtocolFlags, call: &ToolCall, ctx: &GateContext) {
        let Some(registration) = self.registry.get(&call.tool) else {
            return;
        };
        match registration.category() {
            ToolCategory::Read => {
                if registration.is_loader() {
                    flags.mark_loaded(ctx.scope_for(&call.args));
                }
            }
            ToolCategory::Mutate => flags.mark_mutated(),
            ToolCategory::Communicate => flags.mark_communicated(),
            ToolCategory::ScopeIndependent => {}
        }
    }

    /// 最终文本回复前的检查
    pub fn check_final_response(
        &self,
        flags: &ProtocolFlags,
        ctx: &GateContext,
    ) -> Result<(), ProtocolViolation> {
        if ctx.requires_write && !flags.did_mutate {
            Err(ProtocolViolation::FinalWithoutWrite)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::tests::StaticTool;
    use crate::tools::ToolRegistration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_loader(StaticTool { name: "opportunity_load" });
        registry.register(StaticTool { name: "opportunity_patch" }, ToolCategory::Mutate);
        registry.register_with(
            ToolRegistration::new(StaticTool { name: "journal_append" }, ToolCategory::Mutate)
                .journal(),
        );
        registry.register(StaticTool { name: "reply" }, ToolCategory::Communicate);
        registry.register(StaticTool { name: "schedule" }, ToolCategory::ScopeIndependent);
        registry
    }

    fn call(tool: &str) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args: serde_json::json!({}),
        }
    }

    #[test]
    fn test_mutate_before_load_rejected() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let flags = ProtocolFlags::new();
        let ctx = GateContext::new(Some("opp-1".into()), false);

        let err = gate.check(&flags, &call("opportunity_patch"), &ctx).unwrap_err();
        assert_eq!(err.required_action(), "opportunity_load");
        assert_eq!(err.to_feedback()["error"], "PROTOCOL_VIOLATION");
    }

    #[test]
    fn test_mutate_after_load_accepted() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let mut flags = ProtocolFlags::new();
        let ctx = GateContext::new(Some("opp-1".into()), false);

        gate.commit(&mut flags, &call("opportunity_load"), &ctx);
        assert!(gate.check(&flags, &call("opportunity_patch"), &ctx).is_ok());
    }

    #[test]
    fn test_load_of_other_scope_does_not_satisfy() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let mut flags = ProtocolFlags::new();
        let ctx = GateContext::new(Some("opp-1".into()), false);
        let load_other = ToolCall {
            tool: "opportunity_load".into(),
            args: serde_json::json!({"scope_id": "opp-2"}),
        };
        gate.commit(&mut flags, &load_other, &ctx);
        assert!(gate.check(&flags, &call("opportunity_patch"), &ctx).is_err());
    }

    #[test]
    fn test_communicate_requires_write_when_durable() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let mut flags = ProtocolFlags::new();
        let durable = GateContext::new(Some("opp-1".into()), true);
        let ephemeral = GateContext::new(None, false);

        assert!(gate.check(&flags, &call("reply"), &ephemeral).is_ok());
        assert!(matches!(
            gate.check(&flags, &call("reply"), &durable),
            Err(ProtocolViolation::WriteRequired { .. })
        ));

        assert!(gate.check(&flags, &call("journal_append"), &durable).is_ok());
        gate.commit(&mut flags, &call("journal_append"), &durable);
        assert!(gate.check(&flags, &call("reply"), &durable).is_ok());
    }

    #[test]
    fn test_bypass_and_unknown_tools() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let flags = ProtocolFlags::new();
        let ctx = GateContext::new(Some("opp-1".into()), true);
        assert!(gate.check(&flags, &call("schedule"), &ctx).is_ok());
        assert!(gate.check(&flags, &call("opportunity_load"), &ctx).is_ok());
        assert!(gate.check(&flags, &call("not_registered"), &ctx).is_ok());
    }

    #[test]
    fn test_final_response_gate() {
        let registry = registry();
        let gate = ProtocolGate::new(&registry);
        let mut flags = ProtocolFlags::new();
        let ctx = GateContext::new(Some("opp-1".into()), true);
        assert_eq!(
            gate.check_final_response(&flags, &ctx),
            Err(ProtocolViolation::FinalWithoutWrite)
        );
        flags.mark_mutated();
        assert!(gate.check_final_response(&flags, &ctx).is_ok());
    }
}
