//! Token 预算追踪
//!
//! 把「时间预算」或「金额预算」换算成 token 上限，并记录消耗。
//! BudgetState 是纯值：record_usage 返回新状态，调用方各自持有副本，因此天然并发安全。
//! 超支（remaining < 0）不是错误，只表示「已耗尽」，由编排器触发收尾。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 换算比率（经验值，可通过配置调整，不代表实时推理价格）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetRates {
    /// 每小时等效工作对应的美元数（默认 $20 / 4h）
    pub usd_per_hour: f64,
    /// 每百万输出 token 的美元价格（保守上限按输出价计算）
    pub output_usd_per_million_tokens: f64,
}

impl Default for BudgetRates {
    fn default() -> Self {
        Self {
            usd_per_hour: 5.0,
            output_usd_per_million_tokens: 15.0,
        }
    }
}

/// 单个作业的预算状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub total_tokens: i64,
    pub consumed_input_tokens: u64,
    pub consumed_output_tokens: u64,
    pub started_at: DateTime<Utc>,
}

impl BudgetState {
    pub fn new(total_tokens: i64) -> Self {
        Self {
            total_tokens,
            consumed_input_tokens: 0,
            consumed_output_tokens: 0,
            started_at: Utc::now(),
        }
    }

    /// 记录一次模型调用的消耗，返回新状态
    pub fn record_usage(&self, input_tokens: u64, output_tokens: u64) -> BudgetState {
        BudgetState {
            consumed_input_tokens: self.consumed_input_tokens.saturating_add(input_tokens),
            consumed_output_tokens: self.consumed_output_tokens.saturating_add(output_tokens),
            ..self.clone()
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed_input_tokens
            .saturating_add(self.consumed_output_tokens)
    }

    /// 剩余 token；超支时为负数
    pub fn remaining(&self) -> i64 {
        self.total_tokens
            .saturating_sub(i64::try_from(self.consumed()).unwrap_or(i64::MAX))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0
    }

    /// 剩余百分比（可能为负）
    pub fn percent_remaining(&self) -> f64 {
        if self.total_tokens <= 0 {
            return 0.0;
        }
        self.remaining() as f64 / self.total_tokens as f64 * 100.0
    }

    /// 供拼入模型指令的预算提示
    pub fn status_message(&self) -> String {
        let pct = self.percent_remaining();
        if self.is_exhausted() {
            format!(
                "Budget exhausted ({} of {} tokens used). Stop calling tools and give your final answer now.",
                self.consumed(),
                self.total_tokens
            )
        } else if pct < 20.0 {
            format!(
                "Budget low: {:.0}% remaining ({} of {} tokens). Wrap up and prepare a final answer.",
                pct,
                self.remaining(),
                self.total_tokens
            )
        } else {
            format!(
                "Budget: {:.0}% remaining ({} of {} tokens).",
                pct,
                self.remaining(),
                self.total_tokens
            )
        }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(data: &str) -> Result<BudgetState, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// 预算换算器：持有换算比率，生成初始 BudgetState
#[derive(Debug, Clone, Default)]
pub struct BudgetTracker {
    rates: BudgetRates,
}

impl BudgetTracker {
    pub fn new(rates: BudgetRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &BudgetRates {
        &self.rates
    }

    /// 金额 -> token：usd / 单 token 输出价
    pub fn init_from_cost_budget(&self, usd: f64) -> BudgetState {
        BudgetState::new(self.tokens_for_usd(usd))
    }

    /// 时间 -> 金额 -> token
    pub fn init_from_time_budget(&self, minutes: f64) -> BudgetState {
        let usd = minutes.max(0.0) / 60.0 * self.rates.usd_per_hour;
        BudgetState::new(self.tokens_for_usd(usd))
    }

    /// 按作业载荷选择：金额优先，其次时间，都没有时用默认分钟数
    pub fn init_for_payload(
        &self,
        time_budget_minutes: Option<f64>,
        cost_budget_usd: Option<f64>,
        default_minutes: f64,
    ) -> BudgetState {
        match (cost_budget_usd, time_budget_minutes) {
            (Some(usd), _) => self.init_from_cost_budget(usd),
            (None, Some(minutes)) => self.init_from_time_budget(minutes),
            (None, None) => self.init_from_time_budget(default_minutes),
        }
    }

    fn tokens_for_usd(&self, usd: f64) -> i64 {
        let price = self.rates.output_usd_per_million_tokens;
        if price <= 0.0 || usd <= 0.0 {
            return 0;
        }
        (usd * 1_000_000.0 / price).floor() as i64
    }
}
