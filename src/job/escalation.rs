//! 推理档位升级
//!
//! 同一工具连续出现瞬时类失败达到阈值时，把推理档位升一级（Low → Medium → High → Max）。
//! 档位在作业内只升不降；工具成功后清零该工具的连续失败计数。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::ErrorClass;
use crate::llm::ReasoningTier;

/// 随检查点持久化的升级状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub tier: ReasoningTier,
    /// 工具名 -> 连续失败次数
    pub consecutive_failures: BTreeMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct Escalator {
    threshold: u32,
}

impl Default for Escalator {
    fn default() -> Self {
        Self { threshold: 2 }
    }
}

impl Escalator {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// 记录一次失败；触发升级时返回新档位
    pub fn record_failure(
        &self,
        state: &mut EscalationState,
        tool: &str,
        class: ErrorClass,
    ) -> Option<ReasoningTier> {
        if !matches!(
            class,
            ErrorClass::Transient | ErrorClass::Timeout | ErrorClass::RateLimit
        ) {
            return None;
        }
        let count = state.consecutive_failures.entry(tool.to_string()).or_insert(0);
        *count += 1;
        if *count < self.threshold {
            return None;
        }
        *count = 0;
        let raised = state.tier.raised();
        if raised == state.tier {
            return None;
        }
        tracing::info!(tool, from = ?state.tier, to = ?raised, "raising reasoning tier");
        state.tier = raised;
        Some(raised)
    }

    pub fn record_success(&self, state: &mut EscalationState, tool: &str) {
        state.consecutive_failures.remove(tool);
    }
}
