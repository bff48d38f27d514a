//! SOC Hub 错误处理系统
//!
//! 统一的错误类型，按模块生命周期阶段划分：发现、加载、初始化、运行时探测

use thiserror::Error;

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum SocError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discovery error: {message}")]
    Discovery { message: String },

    #[error("Failed to load module '{module}': {message}")]
    Load { module: String, message: String },

    #[error("Failed to initialize module '{module}': {message}")]
    Init { module: String, message: String },

    #[error("Probe of module '{module}' failed: {message}")]
    Probe { module: String, message: String },

    #[error("Module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("Module '{module}' does not support operation '{operation}'")]
    UnsupportedOperation { module: String, operation: String },

    #[error("Module '{module}' advertises capabilities without a callable operation: {missing:?}")]
    CapabilityMismatch { module: String, missing: Vec<String> },

    #[error("Configuration key '{key}' not found")]
    ConfigNotFound { key: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },
}

impl SocError {
    /// 创建发现相关错误
    pub fn discovery(message: &str) -> Self {
        Self::Discovery {
            message: message.to_string(),
        }
    }

    /// 创建加载相关错误
    pub fn load(module: &str, message: &str) -> Self {
        Self::Load {
            module: module.to_string(),
            message: message.to_string(),
        }
    }

    /// 创建初始化相关错误
    pub fn init(module: &str, message: &str) -> Self {
        Self::Init {
            module: module.to_string(),
            message: message.to_string(),
        }
    }

    /// 创建运行时探测错误
    pub fn probe(module: &str, message: &str) -> Self {
        Self::Probe {
            module: module.to_string(),
            message: message.to_string(),
        }
    }

    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    pub fn timeout(operation: &str, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            duration,
        }
    }

    /// 是否为模块级（可隔离）错误
    pub fn is_module_scoped(&self) -> bool {
        matches!(
            self,
            Self::Load { .. }
                | Self::Init { .. }
                | Self::Probe { .. }
                | Self::UnsupportedOperation { .. }
                | Self::CapabilityMismatch { .. }
        )
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = SocError::load("virustotal", "no factory registered");
        assert!(matches!(error, SocError::Load { .. }));
        assert_eq!(
            error.to_string(),
            "Failed to load module 'virustotal': no factory registered"
        );
        assert!(error.is_module_scoped());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let soc_error = SocError::from(io_error);
        assert!(matches!(soc_error, SocError::Io(_)));
        assert!(!soc_error.is_module_scoped());
    }

    #[test]
    fn test_timeout_message() {
        let error = SocError::timeout("health_check", std::time::Duration::from_secs(30));
        assert_eq!(error.to_string(), "Operation timed out after 30s: health_check");
    }
}
