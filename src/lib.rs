//! Forager - 可断点续跑、预算感知的智能体作业执行核心
//!
//! 模块划分：
//! - **budget**: 时间 / 金额预算到 token 上限的换算与消耗记录
//! - **checkpoint**: 执行状态快照的保存与恢复（内存 / JSON 文件 / SQLite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 按优先级在 token 预算内装配上下文
//! - **core**: 错误分类与恢复引擎
//! - **job**: 作业类型、依赖图、轨迹、档位升级与编排循环
//! - **llm**: 推理客户端抽象与脚本化 Mock
//! - **memory**: 类型化记忆、相关性检索、生命周期与交互捕获
//! - **protocol**: 工具调用协议状态机（先加载后修改、先写入后沟通）
//! - **tools**: 分类工具注册表与带超时的执行器

pub mod budget;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod core;
pub mod job;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod protocol;
pub mod tools;

pub use crate::core::{AgentError, ErrorClass, ToolError};
pub use job::{JobOrchestrator, JobOutcome, JobPayload, JobStatus};
