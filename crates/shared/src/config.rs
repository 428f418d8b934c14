//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 编译规则缓存的刷新周期（秒）
    ///
    /// 规则定义的修改最多延迟一个周期生效
    pub refresh_interval_seconds: u64,
    /// 是否在 debug 日志中输出逐节点的评估追踪
    pub trace_evaluation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 60,
            trace_evaluation: false,
        }
    }
}

impl EngineConfig {
    /// 刷新周期，至少 1 秒
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（OBSERVER_ 前缀，层级用双下划线分隔，
    ///    如 OBSERVER_ENGINE__REFRESH_INTERVAL_SECONDS -> engine.refresh_interval_seconds）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("OBSERVER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::builder(service_name, &env, Path::new(&config_dir))?
            .build()?
            .try_deserialize()
    }

    fn builder(
        service_name: &str,
        env: &str,
        config_dir: &Path,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .set_default("observability.service_name", service_name)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", service_name))).required(false))
            .add_source(
                Environment::with_prefix("OBSERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.refresh_interval_seconds, 60);
        assert!(!config.engine.trace_evaluation);
        assert!(!config.is_production());
    }

    #[test]
    fn test_refresh_interval_never_zero() {
        let config = EngineConfig {
            refresh_interval_seconds: 0,
            trace_evaluation: false,
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = Path::new("does-not-exist");
        let config: AppConfig = AppConfig::builder("rule-engine", "test", dir)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.service_name, "rule-engine");
        assert_eq!(config.environment, "test");
        assert_eq!(config.engine.refresh_interval_seconds, 60);
        assert_eq!(config.observability.service_name, "rule-engine");
    }

    #[test]
    fn test_overrides_applied_over_defaults() {
        let dir = Path::new("does-not-exist");
        let config: AppConfig = AppConfig::builder("rule-engine", "test", dir)
            .unwrap()
            .set_override("engine.refresh_interval_seconds", 5)
            .unwrap()
            .set_override("engine.trace_evaluation", true)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.refresh_interval(), Duration::from_secs(5));
        assert!(config.engine.trace_evaluation);
    }
}
