//! 上下文装配：在 token 预算内按优先级拼装提示上下文

pub mod assembler;

pub use assembler::{
    AssembledContext, ContextAssembler, ContextConfig, ContextSections, SectionKind, SectionReport,
};
