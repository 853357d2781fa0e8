//! 工具调用 JSON Schema 生成（schemars）
//!
//! 将「合法 tool call」的 JSON 结构拼入指令段，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 工具调用请求格式：与 ToolCall 的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 opportunity_load、opportunity_patch
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
