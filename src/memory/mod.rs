//! 记忆层：类型化记录、存储接口（内存 / SQLite）、相关性检索、生命周期、交互捕获

pub mod capture;
pub mod lifecycle;
pub mod record;
pub mod relevance;
pub mod sqlite_store;
pub mod store;
pub mod tokenizer;

pub use capture::{
    CaptureDecision, CaptureOutcome, HeuristicClassifier, MemoryCapture, MemoryClassifier,
    ModelMemoryClassifier,
};
pub use lifecycle::{LifecycleConfig, MemoryLifecycle, SweepReport, ARCHIVED_TAG};
pub use record::{MemoryKind, MemoryRecord, UpdateEntry};
pub use relevance::{RelevanceConfig, RelevanceEngine, ScoredMemory, WriteDecision};
pub use sqlite_store::SqliteMemoryStore;
pub use store::{InMemoryMemoryStore, MemoryFilter, MemoryStore, MemoryStoreError};
