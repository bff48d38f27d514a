//! SOC Hub 配置管理系统
//!
//! 支持YAML配置文件驱动的模块加载；`modules` 段按模块名提供不透明的键值配置

use crate::modules::discovery::{DEFAULT_ENTRY_POINT, DEFAULT_RESERVED_PREFIX};
use crate::modules::ModuleConfig;
use crate::types::ModuleName;
use crate::{Result, SocError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用基础设置
    #[serde(default)]
    pub app: AppSettings,
    /// 注册表设置
    #[serde(default)]
    pub registry: RegistrySettings,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 各模块配置
    #[serde(default)]
    pub modules: HashMap<ModuleName, ModuleConfig>,
}

/// 应用基础设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 应用名称
    pub name: String,
    /// 版本
    pub version: String,
    /// 调试模式
    pub debug: bool,
    /// API 路由前缀
    pub api_prefix: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "SOC Hub".to_string(),
            version: crate::VERSION.to_string(),
            debug: false,
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// 注册表设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// 模块根目录
    pub modules_path: String,
    /// 模块入口文件名
    pub entry_point: String,
    /// 保留前缀
    pub reserved_prefix: String,
    /// 初始化超时（秒），0 表示不限制
    pub init_timeout_secs: u64,
    /// 单模块健康检查超时（秒）
    pub health_timeout_secs: u64,
    /// 卸载清理超时（秒）
    pub shutdown_timeout_secs: u64,
    /// 后台健康检查间隔（秒），0 表示不启用
    pub health_check_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            modules_path: "modules".to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            reserved_prefix: DEFAULT_RESERVED_PREFIX.to_string(),
            init_timeout_secs: 30,
            health_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            health_check_interval_secs: 60,
        }
    }
}

impl RegistrySettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        match self.health_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否输出 ANSI 颜色
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            ansi: true,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// 对应的过滤指令
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
}

impl ConfigManager {
    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SocError::config(&format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| SocError::config(&format!("Failed to parse config file: {}", e)))?;

        Ok(Self { config })
    }

    /// 创建默认配置
    pub fn new_default() -> Self {
        let mut config = AppConfig::default();
        for (name, module_config) in default_module_configs() {
            config.modules.insert(name.to_string(), module_config);
        }
        Self { config }
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self.config)
            .map_err(|e| SocError::config(&format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SocError::config(&format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// 获取配置
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取可变配置
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 各模块配置的副本
    pub fn module_configs(&self) -> HashMap<ModuleName, ModuleConfig> {
        self.config.modules.clone()
    }

    /// 验证配置有效性
    ///
    /// 只检查应用与注册表设置，模块配置内容原样透传
    pub fn validate(&self) -> Result<()> {
        let app = &self.config.app;
        if app.name.is_empty() {
            return Err(SocError::config("Application name cannot be empty"));
        }
        if !app.api_prefix.starts_with('/') {
            return Err(SocError::config("API prefix must start with '/'"));
        }

        let registry = &self.config.registry;
        if registry.modules_path.is_empty() {
            return Err(SocError::config("Modules path cannot be empty"));
        }
        if registry.entry_point.is_empty() {
            return Err(SocError::config("Module entry point cannot be empty"));
        }
        if registry.health_timeout_secs == 0 {
            return Err(SocError::config("Health timeout must be positive"));
        }
        if registry.shutdown_timeout_secs == 0 {
            return Err(SocError::config("Shutdown timeout must be positive"));
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }
}

/// 生成默认配置文件
pub async fn generate_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let config_manager = ConfigManager::new_default();
    config_manager.save_to_file(path).await?;
    Ok(())
}

/// 只读取配置文件中的 `modules` 段
///
/// 文件不存在时返回空映射
pub async fn load_module_configs<P: AsRef<Path>>(path: P) -> Result<HashMap<ModuleName, ModuleConfig>> {
    #[derive(Deserialize)]
    struct ModulesSection {
        #[serde(default)]
        modules: Option<HashMap<ModuleName, ModuleConfig>>,
    }

    let path = path.as_ref();
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!("Module config file {:?} not found, using empty configuration", path);
        return Ok(HashMap::new());
    }

    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let section: ModulesSection = serde_yaml::from_str(&content)?;
    Ok(section.modules.unwrap_or_default())
}

/// 内置集成的默认配置模板
fn default_module_configs() -> Vec<(&'static str, ModuleConfig)> {
    vec![
        (
            "virustotal",
            ModuleConfig::new().with("api_key", "").with("timeout", 30),
        ),
        (
            "abuseipdb",
            ModuleConfig::new().with("api_key", "").with("timeout", 30),
        ),
        (
            "shodan",
            ModuleConfig::new().with("api_key", "").with("timeout", 30),
        ),
        (
            "urlscan",
            ModuleConfig::new().with("api_key", "").with("timeout", 30),
        ),
        (
            "limacharlie",
            ModuleConfig::new()
                .with("api_key", "")
                .with("organization_id", "")
                .with("timeout", 30),
        ),
        (
            "thehive",
            ModuleConfig::new()
                .with("api_key", "")
                .with("api_url", "http://localhost:9000")
                .with("timeout", 30),
        ),
    ]
}
