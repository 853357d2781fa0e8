//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__CHECKPOINT__EVERY_STEPS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::budget::BudgetRates;
use crate::checkpoint::CheckpointConfig;
use crate::context::ContextConfig;
use crate::job::OrchestratorConfig;
use crate::memory::{LifecycleConfig, RelevanceConfig};

pub use config::ConfigError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub budget: BudgetSection,
    pub retrieval: RelevanceConfig,
    pub context: ContextConfig,
    pub checkpoint: CheckpointConfig,
    pub orchestrator: OrchestratorConfig,
    pub memory: LifecycleConfig,
}

/// [budget] 段：时间 / 金额到 token 的换算
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub usd_per_hour: f64,
    pub output_usd_per_million_tokens: f64,
    /// 作业既没有时间也没有金额预算时使用的分钟数
    pub default_minutes: f64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        let rates = BudgetRates::default();
        Self {
            usd_per_hour: rates.usd_per_hour,
            output_usd_per_million_tokens: rates.output_usd_per_million_tokens,
            default_minutes: OrchestratorConfig::default().default_budget_minutes,
        }
    }
}

impl BudgetSection {
    pub fn rates(&self) -> BudgetRates {
        BudgetRates {
            usd_per_hour: self.usd_per_hour,
            output_usd_per_million_tokens: self.output_usd_per_million_tokens,
        }
    }
}

impl AppConfig {
    /// 编排参数；默认预算分钟数以 [budget] 段为准
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_budget_minutes: self.budget.default_minutes,
            ..self.orchestrator.clone()
        }
    }
}

/// 加载配置：config/default.toml（可选）→ 指定文件（可选）→ FORAGER__* 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sources() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.checkpoint, CheckpointConfig::default());
        assert_eq!(cfg.budget.rates(), BudgetRates::default());
        assert_eq!(cfg.orchestrator_config(), OrchestratorConfig::default());
    }

    #[test]
    fn test_load_from_file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forager.toml");
        std::fs::write(
            &path,
            r#"
[budget]
default_minutes = 5.0

[checkpoint]
every_steps = 3

[orchestrator]
max_steps = 12

[orchestrator.retry]
base_delay_ms = 10

[retrieval]
graph_depth = 1
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.checkpoint.every_steps, 3);
        assert_eq!(cfg.checkpoint.every_secs, CheckpointConfig::default().every_secs);
        assert_eq!(cfg.orchestrator.max_steps, 12);
        assert_eq!(cfg.orchestrator.retry.base_delay_ms, 10);
        assert_eq!(cfg.orchestrator.retry.max_attempts, 3);
        assert_eq!(cfg.retrieval.graph_depth, 1);
        assert_eq!(cfg.orchestrator_config().default_budget_minutes, 5.0);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/forager.toml"))).is_err());
    }
}
