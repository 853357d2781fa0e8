//! 工具层：带分类标签的注册表、超时执行器、调用格式 Schema

pub mod executor;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolCategory, ToolRegistration, ToolRegistry, ToolSpec};
pub use schema::tool_call_schema_json;
