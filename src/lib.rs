//! SOC Hub - 安全集成模块注册与生命周期管理
//!
//! 动态发现、加载、初始化安全集成模块（威胁情报、EDR、事件管理），
//! 以统一的 Module trait 对外提供状态、能力与健康信息。
//!
//! # 架构分层
//!
//! - **模块契约**: 统一的 `Module` trait 与描述类型
//! - **模块发现**: 按目录约定枚举可用模块
//! - **注册表**: 加载、初始化、重载、卸载，逐模块隔离失败
//! - **聚合器**: 跨模块的健康与能力视图
//! - **内置集成**: 由静态描述驱动的通用 HTTP 集成

pub mod config;
pub mod error;
pub mod integrations;
pub mod modules;
pub mod types;

// 重新导出核心类型
pub use config::{AppConfig, ConfigManager, LoggingConfig};
pub use error::*;
pub use integrations::builtin_factories;
pub use modules::*;
pub use types::*;

use tracing_subscriber::EnvFilter;

/// 框架信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FRAMEWORK_NAME: &str = "SOC Hub";

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别；重复初始化会被忽略
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let initialized = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("Initializing {} v{}", FRAMEWORK_NAME, VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_info() {
        assert_eq!(FRAMEWORK_NAME, "SOC Hub");
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
