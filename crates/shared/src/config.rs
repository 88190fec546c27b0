//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use crate::observability::ObservabilityConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 投递资格评估配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    /// 客户端未覆盖时区时使用的全局时区（固定偏移，如 "UTC"、"-05:00"）
    pub default_timezone: String,
    /// 单次历史存储调用的超时时间（毫秒）
    pub store_timeout_ms: u64,
    /// 电话号码规范化时的默认地区
    pub default_phone_region: String,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            store_timeout_ms: 2000,
            default_phone_region: "US".to_string(),
        }
    }
}

impl EligibilityConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub eligibility: EligibilityConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（GATE_ 前缀，层级用双下划线分隔，如
    ///    GATE_ELIGIBILITY__DEFAULT_TIMEZONE -> eligibility.default_timezone）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("GATE_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, &env, Path::new(&config_dir))
    }

    /// 从指定目录加载配置（测试时可传入临时目录）
    pub fn load_from(service_name: &str, env: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("GATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
