//! 工具调用协议状态机：先加载后修改、先写入后沟通

pub mod gate;
pub mod state;

pub use gate::{GateContext, ProtocolGate, ProtocolViolation};
pub use state::{ProtocolFlags, ProtocolState};
