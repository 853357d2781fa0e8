//! 预算层：时间/金额 -> token 上限换算、消耗追踪、token 估算

pub mod estimator;
pub mod tracker;

pub use estimator::TokenEstimator;
pub use tracker::{BudgetRates, BudgetState, BudgetTracker};
