//! 检查点：让有时限的工作进程跨多次调用挂起并续跑同一个作业

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use types::{Checkpoint, CheckpointError, CheckpointId, ExecutionState, ResumedJobContext};
