//! 模块系统核心特征定义
//!
//! 定义所有安全集成模块必须实现的统一 Module trait，以及注册表与之交互所需的描述类型

use crate::{Result, SocError};
use async_trait::async_trait;
use semver::Version;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// 初始化中（构造后的初始状态）
    Initializing,
    /// 运行中
    Active,
    /// 未加载（实例不会持有此状态，仅用于对外展示）
    Inactive,
    /// 错误状态
    Error,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Initializing => "initializing",
            ModuleStatus::Active => "active",
            ModuleStatus::Inactive => "inactive",
            ModuleStatus::Error => "error",
        }
    }

    /// 实例状态机允许的迁移
    ///
    /// Initializing → Active | Error；Active → Error（重新初始化失败）。
    /// 进入 Error 后不可恢复，需由 `reload` 构造新实例
    pub fn can_transition_to(self, next: ModuleStatus) -> bool {
        matches!(
            (self, next),
            (ModuleStatus::Initializing, ModuleStatus::Active)
                | (ModuleStatus::Initializing, ModuleStatus::Error)
                | (ModuleStatus::Active, ModuleStatus::Error)
        )
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模块能力标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCapability {
    ThreatIntelligence,
    IncidentManagement,
    Edr,
    NetworkAnalysis,
    Reputation,
    Forensics,
    Automation,
}

/// 模块描述信息，由实例按需生成，注册表不缓存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 展示名称
    pub name: String,
    /// 模块版本
    pub version: Version,
    /// 模块描述
    pub description: String,
    /// 模块作者
    pub author: String,
    /// 声明的能力标签（有序，不重复）
    pub capabilities: Vec<ModuleCapability>,
    /// 是否需要凭据
    pub requires_api_key: bool,
    /// 当前状态快照
    pub status: ModuleStatus,
}

/// HTTP 动词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// 能力描述：模块对外宣告的一个可调用操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// 操作名称，必须出现在 `Module::operations()` 中
    pub name: String,
    /// 操作描述
    pub description: String,
    /// 路由模板，如 `/api/v1/virustotal/files/{hash}`
    pub endpoint: String,
    /// HTTP 动词
    pub method: HttpMethod,
}

impl CapabilityDescriptor {
    pub fn new(name: &str, description: &str, endpoint: &str, method: HttpMethod) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            endpoint: endpoint.to_string(),
            method,
        }
    }
}

/// 健康检查结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Error,
}

/// 健康检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// 健康状态
    pub status: HealthState,
    /// 状态消息
    pub message: String,
    /// 模块自定义的附加字段
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn new(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            extra: HashMap::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Healthy, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(HealthState::Error, message)
    }

    /// 附加一个详细字段
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// 模块配置：外部传入的不透明键值映射，构造后归实例独占
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleConfig {
    values: HashMap<String, serde_json::Value>,
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置项
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// 获取并反序列化配置值
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.values.get(key).ok_or_else(|| SocError::ConfigNotFound {
            key: key.to_string(),
        })?;

        serde_json::from_value(value.clone()).map_err(|e| SocError::Config {
            message: format!("Failed to deserialize config key '{}': {}", key, e),
        })
    }

    /// 获取配置值，缺失或类型不符时返回默认值
    pub fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        self.get(key).unwrap_or(default)
    }

    /// 获取非空字符串配置值
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn get_raw(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, serde_json::Value> {
        &self.values
    }
}

impl From<HashMap<String, serde_json::Value>> for ModuleConfig {
    fn from(values: HashMap<String, serde_json::Value>) -> Self {
        Self { values }
    }
}

/// 核心模块特征 - 所有集成模块必须实现
///
/// 网络或传输错误必须在模块内部消化：`initialize` 以 `Err` 报告失败，
/// `health_check` 以结构化的 unhealthy/error 结果报告，绝不 panic 跨越边界。
#[async_trait]
pub trait Module: Send + Sync {
    /// 实现标识（与发现目录名一致，如 `virustotal`）
    fn module_id(&self) -> &str;

    /// 模块描述信息，可能反映非 Active 状态
    async fn get_info(&self) -> Result<ModuleInfo>;

    /// 校验配置并执行连通性自检
    ///
    /// 成功时状态必须为 Active，失败时为 Error，返回后不得停留在 Initializing
    async fn initialize(&mut self) -> Result<()>;

    /// 幂等的存活探测，独立于 `initialize`
    async fn health_check(&self) -> Result<HealthReport>;

    /// 静态能力列表，不访问网络
    fn get_capabilities(&self) -> Vec<CapabilityDescriptor>;

    /// 当前状态（纯读取）
    fn get_status(&self) -> ModuleStatus;

    /// 实例持有的配置
    fn config(&self) -> &ModuleConfig;

    /// 实际可调用的操作名称
    fn operations(&self) -> Vec<&'static str>;

    /// 调用一个已宣告的操作
    async fn execute(
        &self,
        operation: &str,
        _params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Err(SocError::UnsupportedOperation {
            module: self.module_id().to_string(),
            operation: operation.to_string(),
        })
    }

    /// 卸载时的清理钩子
    async fn shutdown(&self) {}

    fn is_initialized(&self) -> bool {
        self.get_status() == ModuleStatus::Active
    }

    fn get_config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config().get_raw(key)
    }
}

/// 校验宣告的能力均有对应的可调用操作
pub fn validate_capabilities(module: &dyn Module) -> Result<()> {
    let operations: HashSet<&str> = module.operations().into_iter().collect();

    let missing: Vec<String> = module
        .get_capabilities()
        .into_iter()
        .filter(|capability| !operations.contains(capability.name.as_str()))
        .map(|capability| capability.name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SocError::CapabilityMismatch {
            module: module.module_id().to_string(),
            missing,
        })
    }
}

/// 模块实例的通用状态：配置 + 受约束的状态迁移
#[derive(Debug, Clone)]
pub struct ModuleState {
    config: ModuleConfig,
    status: ModuleStatus,
}

impl ModuleState {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            status: ModuleStatus::Initializing,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    /// 迁移状态，非法迁移会被拒绝并记录警告
    pub fn transition(&mut self, next: ModuleStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            warn!("Rejected module status transition {} -> {}", self.status, next);
            return false;
        }
        self.status = next;
        true
    }

    pub fn mark_active(&mut self) -> bool {
        self.transition(ModuleStatus::Active)
    }

    pub fn mark_error(&mut self) -> bool {
        self.transition(ModuleStatus::Error)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 测试用模块：初始化结果与健康检查行为可控
    pub(crate) struct MockModule {
        pub id: String,
        pub state: ModuleState,
        pub init: MockInit,
        pub probe: MockProbe,
        pub capabilities: MockCapabilities,
        pub advertised: Vec<&'static str>,
        pub shutdowns: Arc<AtomicUsize>,
    }

    #[derive(Clone, Copy)]
    pub(crate) enum MockInit {
        Succeeds,
        Fails,
        Panics,
        /// 返回成功但不迁移状态
        Silent,
        /// 永不返回
        Hangs,
    }

    #[derive(Clone, Copy)]
    pub(crate) enum MockProbe {
        Healthy,
        Fails,
        Panics,
    }

    #[derive(Clone, Copy)]
    pub(crate) enum MockCapabilities {
        Declared,
        Panics,
        /// 初始化成功后再 panic，用于查询期的隔离
        PanicsWhenActive,
    }

    impl MockModule {
        pub(crate) fn new(id: &str, config: ModuleConfig) -> Self {
            Self {
                id: id.to_string(),
                state: ModuleState::new(config),
                init: MockInit::Succeeds,
                probe: MockProbe::Healthy,
                capabilities: MockCapabilities::Declared,
                advertised: vec!["lookup"],
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn failing_init(self) -> Self {
            self.with_init(MockInit::Fails)
        }

        pub(crate) fn with_init(mut self, init: MockInit) -> Self {
            self.init = init;
            self
        }

        pub(crate) fn counting_shutdowns(mut self, counter: Arc<AtomicUsize>) -> Self {
            self.shutdowns = counter;
            self
        }

        pub(crate) fn with_probe(mut self, probe: MockProbe) -> Self {
            self.probe = probe;
            self
        }

        pub(crate) fn with_capabilities(mut self, capabilities: MockCapabilities) -> Self {
            self.capabilities = capabilities;
            self
        }
    }

    #[async_trait]
    impl Module for MockModule {
        fn module_id(&self) -> &str {
            &self.id
        }

        async fn get_info(&self) -> Result<ModuleInfo> {
            if matches!(self.probe, MockProbe::Fails) {
                return Err(SocError::probe(&self.id, "info unavailable"));
            }
            Ok(ModuleInfo {
                name: self.id.to_uppercase(),
                version: Version::new(1, 0, 0),
                description: "Mock module".to_string(),
                author: "Test".to_string(),
                capabilities: vec![ModuleCapability::Reputation],
                requires_api_key: false,
                status: self.state.status(),
            })
        }

        async fn initialize(&mut self) -> Result<()> {
            match self.init {
                MockInit::Succeeds => {
                    self.state.mark_active();
                    Ok(())
                }
                MockInit::Fails => {
                    self.state.mark_error();
                    Err(SocError::init(&self.id, "mock init failure"))
                }
                MockInit::Panics => panic!("init exploded"),
                MockInit::Silent => Ok(()),
                MockInit::Hangs => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }

        async fn health_check(&self) -> Result<HealthReport> {
            match self.probe {
                MockProbe::Healthy => Ok(HealthReport::healthy("ok")
                    .with_detail("label", self.state.config().get_or("label", String::new()))),
                MockProbe::Fails => Err(SocError::probe(&self.id, "connection refused")),
                MockProbe::Panics => panic!("probe exploded"),
            }
        }

        fn get_capabilities(&self) -> Vec<CapabilityDescriptor> {
            match self.capabilities {
                MockCapabilities::Declared => {}
                MockCapabilities::Panics => panic!("capabilities exploded"),
                MockCapabilities::PanicsWhenActive if self.state.status() == ModuleStatus::Active => {
                    panic!("capabilities exploded")
                }
                MockCapabilities::PanicsWhenActive => {}
            }
            self.advertised
                .iter()
                .map(|name| {
                    CapabilityDescriptor::new(name, "Mock op", "/api/v1/mock/lookup", HttpMethod::Get)
                })
                .collect()
        }

        fn get_status(&self) -> ModuleStatus {
            self.state.status()
        }

        fn config(&self) -> &ModuleConfig {
            self.state.config()
        }

        fn operations(&self) -> Vec<&'static str> {
            vec!["lookup"]
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(ModuleStatus::Initializing.can_transition_to(ModuleStatus::Active));
        assert!(ModuleStatus::Initializing.can_transition_to(ModuleStatus::Error));
        assert!(ModuleStatus::Active.can_transition_to(ModuleStatus::Error));
        assert!(!ModuleStatus::Initializing.can_transition_to(ModuleStatus::Inactive));
        assert!(!ModuleStatus::Active.can_transition_to(ModuleStatus::Initializing));

        let mut state = ModuleState::new(ModuleConfig::new());
        assert_eq!(state.status(), ModuleStatus::Initializing);
        assert!(!state.transition(ModuleStatus::Inactive));
        assert_eq!(state.status(), ModuleStatus::Initializing);
        assert!(state.mark_active());
        assert!(state.mark_error());
        assert_eq!(state.status(), ModuleStatus::Error);

        assert!(!ModuleStatus::Error.can_transition_to(ModuleStatus::Active));
        assert!(!state.mark_active());
        assert_eq!(state.status(), ModuleStatus::Error);
    }

    #[test]
    fn test_module_config_accessors() {
        let config = ModuleConfig::new()
            .with("api_key", "secret")
            .with("timeout", 15)
            .with("empty", "");

        let key: String = config.get("api_key").unwrap();
        assert_eq!(key, "secret");
        assert_eq!(config.get_or("timeout", 30u64), 15);
        assert_eq!(config.get_or("missing", 30u64), 30);
        assert_eq!(config.get_str("empty"), None);
        assert!(matches!(
            config.get::<String>("missing"),
            Err(SocError::ConfigNotFound { .. })
        ));
        assert!(matches!(config.get::<u64>("api_key"), Err(SocError::Config { .. })));
    }

    #[test]
    fn test_wire_names() {
        let report = HealthReport::healthy("Connected").with_detail("endpoint", "https://hive");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["endpoint"], "https://hive");

        assert_eq!(
            serde_json::to_value(ModuleCapability::ThreatIntelligence).unwrap(),
            "threat_intelligence"
        );
        assert_eq!(serde_json::to_value(ModuleStatus::Active).unwrap(), "active");
        assert_eq!(serde_json::to_value(HttpMethod::Post).unwrap(), "POST");
    }

    #[test]
    fn test_validate_capabilities() {
        let module = MockModule::new("mock", ModuleConfig::new());
        assert!(validate_capabilities(&module).is_ok());

        let mut module = MockModule::new("mock", ModuleConfig::new());
        module.advertised = vec!["lookup", "delete_everything"];
        match validate_capabilities(&module) {
            Err(SocError::CapabilityMismatch { missing, .. }) => {
                assert_eq!(missing, vec!["delete_everything".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_default_execute_is_unsupported() {
        let module = MockModule::new("mock", ModuleConfig::new());
        let result = module.execute("lookup", serde_json::Value::Null).await;
        assert!(matches!(result, Err(SocError::UnsupportedOperation { .. })));
    }
}
