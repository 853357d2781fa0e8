//! 工具注册表
//!
//! 每个工具注册时携带一个 ToolCategory 标签（Read / Mutate / Communicate / ScopeIndependent），
//! 协议状态机只看标签，不按名字匹配。分类是数据，不是逻辑。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

/// 工具能力分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// 只读（含加载作用域状态的 load 工具）
    Read,
    /// 修改持久状态
    Mutate,
    /// 面向用户的最终沟通
    Communicate,
    /// 与作用域无关（调度、自省等）
    ScopeIndependent,
}

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步调用（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// 一次注册：工具本身 + 分类标签 + 协议相关标记
#[derive(Clone)]
pub struct ToolRegistration {
    tool: Arc<dyn Tool>,
    category: ToolCategory,
    /// Read 工具：成功后视为已加载作用域
    loader: bool,
    /// Mutate 工具：追加日志类写入，同样满足「先写后说」
    journal: bool,
    /// Mutate 工具：前置加载工具名；None 时用注册表默认值
    load_tool: Option<String>,
}

impl ToolRegistration {
    pub fn new(tool: impl Tool + 'static, category: ToolCategory) -> Self {
        Self {
            tool: Arc::new(tool),
            category,
            loader: false,
            journal: false,
            load_tool: None,
        }
    }

    pub fn loader(mut self) -> Self {
        self.loader = true;
        self
    }

    pub fn journal(mut self) -> Self {
        self.journal = true;
        self
    }

    pub fn requires_load_via(mut self, load_tool: impl Into<String>) -> Self {
        self.load_tool = Some(load_tool.into());
        self
    }

    pub fn category(&self) -> ToolCategory {
        self.category
    }

    pub fn is_loader(&self) -> bool {
        self.loader
    }

    pub fn is_journal(&self) -> bool {
        self.journal
    }

    pub fn tool(&self) -> Arc<dyn Tool> {
        Arc::clone(&self.tool)
    }
}

/// 提供给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Value,
}

/// 工具注册表：按名称有序存储，保证生成的工具列表顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRegistration>,
    default_load_tool: Option<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static, category: ToolCategory) {
        self.register_with(ToolRegistration::new(tool, category));
    }

    /// 注册 load 工具；第一个注册的 loader 成为默认前置工具
    pub fn register_loader(&mut self, tool: impl Tool + 'static) {
        self.register_with(ToolRegistration::new(tool, ToolCategory::Read).loader());
    }

    pub fn register_with(&mut self, registration: ToolRegistration) {
        let name = registration.tool.name().to_string();
        if registration.loader && self.default_load_tool.is_none() {
            self.default_load_tool = Some(name.clone());
        }
        self.tools.insert(name, registration);
    }

    pub fn get(&self, name: &str) -> Option<&ToolRegistration> {
        self.tools.get(name)
    }

    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        self.tools.get(name).map(|r| r.category)
    }

    /// Mutate 工具需要的前置 load 工具名
    pub fn load_tool_for(&self, name: &str) -> Option<String> {
        self.tools
            .get(name)
            .and_then(|r| r.load_tool.clone())
            .or_else(|| self.default_load_tool.clone())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(name, reg)| ToolSpec {
                name: name.clone(),
                description: reg.tool.description().to_string(),
                category: reg.category,
                parameters: reg.tool.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 测试用工具：回显参数
    pub(crate) struct StaticTool {
        pub name: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "returns its arguments"
        }

        async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[test]
    fn test_register_and_lookup_category() {
        let mut registry = ToolRegistry::new();
        registry.register_loader(StaticTool { name: "opportunity_load" });
        registry.register(StaticTool { name: "opportunity_patch" }, ToolCategory::Mutate);
        registry.register(StaticTool { name: "reply" }, ToolCategory::Communicate);

        assert_eq!(registry.category_of("opportunity_load"), Some(ToolCategory::Read));
        assert_eq!(registry.category_of("opportunity_patch"), Some(ToolCategory::Mutate));
        assert_eq!(registry.category_of("missing"), None);
        assert!(registry.get("opportunity_load").unwrap().is_loader());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_load_tool_defaults_and_overrides() {
        let mut registry = ToolRegistry::new();
        registry.register_loader(StaticTool { name: "opportunity_load" });
        registry.register(StaticTool { name: "opportunity_patch" }, ToolCategory::Mutate);
        registry.register_with(
            ToolRegistration::new(StaticTool { name: "rfp_patch" }, ToolCategory::Mutate)
                .requires_load_via("rfp_load"),
        );

        assert_eq!(
            registry.load_tool_for("opportunity_patch").as_deref(),
            Some("opportunity_load")
        );
        assert_eq!(registry.load_tool_for("rfp_patch").as_deref(), Some("rfp_load"));
    }

    #[test]
    fn test_specs_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(StaticTool { name: "zeta" }, ToolCategory::Read);
        registry.register(StaticTool { name: "alpha" }, ToolCategory::ScopeIndependent);
        let names: Vec<_> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
