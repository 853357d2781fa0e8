//! 错误恢复引擎
//!
//! 根据 ErrorClass 与已尝试次数返回 RecoveryAction，供编排器决定是退避重试、把失败反馈给模型、
//! 推迟整个步骤还是进入收尾。

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::ErrorClass;
use crate::llm::LlmError;

/// 退避重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 首次重试延迟（毫秒），之后每次翻倍
    pub base_delay_ms: u64,
    /// 延迟上限（毫秒）
    pub max_delay_ms: u64,
    /// Transient / RateLimit 的最大重试次数
    pub max_attempts: u32,
    /// 限流时的延迟倍数
    pub rate_limit_multiplier: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 3,
            rate_limit_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次（0 起）重试的基础延迟，未加抖动
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.min(16));
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后重试同一调用
    Retry { delay: Duration },
    /// 不再重试：把结构化失败反馈给模型
    Surface,
    /// 协议违规：把违规说明反馈给模型，由其调整调用顺序
    Resequence,
    /// 重试次数用尽的限流：推迟整个步骤到下一次调度
    Defer,
    /// 上下文超长：缩小上下文预算后重试
    ShrinkContext,
    /// 预算耗尽：请求最终总结
    WindDown,
}

/// 语义化错误恢复：ErrorClass + 尝试次数 -> RecoveryAction
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// attempt 为已经失败的次数减一（首次失败传 0）
    pub fn handle(&self, class: ErrorClass, attempt: u32, retry_after_ms: Option<u64>) -> RecoveryAction {
        match class {
            ErrorClass::Transient => {
                if attempt < self.policy.max_attempts {
                    RecoveryAction::Retry {
                        delay: self.jittered(self.policy.backoff_ms(attempt)),
                    }
                } else {
                    RecoveryAction::Surface
                }
            }
            ErrorClass::RateLimit => {
                if attempt < self.policy.max_attempts {
                    let base = self
                        .policy
                        .backoff_ms(attempt)
                        .saturating_mul(self.policy.rate_limit_multiplier)
                        .min(self.policy.max_delay_ms);
                    let delay_ms = retry_after_ms.map_or(base, |ra| ra.max(base));
                    RecoveryAction::Retry {
                        delay: self.jittered(delay_ms),
                    }
                } else {
                    RecoveryAction::Defer
                }
            }
            // 超时只重试一次，之后对本次尝试按 Permanent 处理
            ErrorClass::Timeout => {
                if attempt == 0 {
                    RecoveryAction::Retry {
                        delay: self.jittered(self.policy.backoff_ms(0)),
                    }
                } else {
                    RecoveryAction::Surface
                }
            }
            ErrorClass::Permanent => RecoveryAction::Surface,
            ErrorClass::ProtocolViolation => RecoveryAction::Resequence,
            ErrorClass::ResourceExhausted => RecoveryAction::WindDown,
        }
    }

    /// 模型调用失败：超长上下文先尝试缩小上下文，其余按分类处理
    pub fn handle_llm(&self, err: &LlmError, attempt: u32) -> RecoveryAction {
        match err {
            LlmError::ContextWindowExceeded if attempt < self.policy.max_attempts => {
                RecoveryAction::ShrinkContext
            }
            _ => self.handle(err.class(), attempt, err.retry_after_ms()),
        }
    }

    /// ±25% 抖动，避免多作业同时重试
    fn jittered(&self, base_ms: u64) -> Duration {
        let range = base_ms / 4;
        if range == 0 {
            return Duration::from_millis(base_ms);
        }
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let offset = nanos % (2 * range + 1);
        Duration::from_millis(base_ms - range + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new(RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            max_attempts: 3,
            rate_limit_multiplier: 4,
        })
    }

    #[test]
    fn test_transient_retries_then_surfaces() {
        let engine = engine();
        for attempt in 0..3 {
            assert!(matches!(
                engine.handle(ErrorClass::Transient, attempt, None),
                RecoveryAction::Retry { .. }
            ));
        }
        assert_eq!(engine.handle(ErrorClass::Transient, 3, None), RecoveryAction::Surface);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            max_attempts: 10,
            rate_limit_multiplier: 4,
        };
        assert_eq!(policy.backoff_ms(0), 100);
        assert_eq!(policy.backoff_ms(2), 400);
        assert_eq!(policy.backoff_ms(8), 1_000);
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let engine = engine();
        match engine.handle(ErrorClass::Transient, 1, None) {
            RecoveryAction::Retry { delay } => {
                let ms = delay.as_millis() as u64;
                assert!((150..=250).contains(&ms), "delay {ms} outside ±25% of 200");
            }
            other => panic!("Expected Retry, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_honors_retry_after_and_defers() {
        let engine = engine();
        match engine.handle(ErrorClass::RateLimit, 0, Some(5_000)) {
            RecoveryAction::Retry { delay } => assert!(delay.as_millis() >= 3_750),
            other => panic!("Expected Retry, got {other:?}"),
        }
        assert_eq!(engine.handle(ErrorClass::RateLimit, 3, None), RecoveryAction::Defer);
    }

    #[test]
    fn test_timeout_retries_once() {
        let engine = engine();
        assert!(matches!(
            engine.handle(ErrorClass::Timeout, 0, None),
            RecoveryAction::Retry { .. }
        ));
        assert_eq!(engine.handle(ErrorClass::Timeout, 1, None), RecoveryAction::Surface);
    }

    #[test]
    fn test_non_retryable_classes() {
        let engine = engine();
        assert_eq!(engine.handle(ErrorClass::Permanent, 0, None), RecoveryAction::Surface);
        assert_eq!(
            engine.handle(ErrorClass::ProtocolViolation, 0, None),
            RecoveryAction::Resequence
        );
        assert_eq!(
            engine.handle(ErrorClass::ResourceExhausted, 0, None),
            RecoveryAction::WindDown
        );
    }

    #[test]
    fn test_context_window_shrinks_first() {
        let engine = engine();
        assert_eq!(
            engine.handle_llm(&LlmError::ContextWindowExceeded, 0),
            RecoveryAction::ShrinkContext
        );
        assert_eq!(
            engine.handle_llm(&LlmError::ContextWindowExceeded, 3),
            RecoveryAction::Surface
        );
    }
}
