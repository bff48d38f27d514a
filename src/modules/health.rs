//! 健康与能力聚合
//!
//! 对所有已注册模块统一执行查询，单个模块的错误、panic 或超时都被转换为
//! 结构化的 `{status: error, error}` 条目，整体调用从不失败。

use super::core::{CapabilityDescriptor, HealthReport, HealthState, ModuleInfo, ModuleStatus};
use super::loader::{ModuleHandle, ModuleLoader};
use super::panic_message;
use crate::config::RegistrySettings;
use crate::types::{now_ns, ModuleName, TimestampNs};
use crate::{Result, SocError};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 默认单模块探测超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// 单个模块的健康条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthEntry {
    /// 模块自身给出的健康报告
    Report(HealthReport),
    /// 探测过程本身出错
    Fault { status: HealthState, error: String },
}

impl HealthEntry {
    pub fn fault(error: impl Into<String>) -> Self {
        HealthEntry::Fault {
            status: HealthState::Error,
            error: error.into(),
        }
    }

    pub fn status(&self) -> HealthState {
        match self {
            HealthEntry::Report(report) => report.status,
            HealthEntry::Fault { status, .. } => *status,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthState::Healthy
    }
}

/// 系统整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    /// 所有模块健康（或没有模块）
    Healthy,
    /// 至少一个模块不健康
    Degraded,
}

/// 聚合健康视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: SystemStatus,
    pub modules_loaded: usize,
    pub modules: BTreeMap<ModuleName, HealthEntry>,
    pub checked_at: TimestampNs,
}

impl SystemHealth {
    /// 不健康模块名称
    pub fn unhealthy_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, entry)| !entry.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// 模块列表中的单项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleSummary {
    Described {
        name: ModuleName,
        info: ModuleInfo,
        status: ModuleStatus,
    },
    Faulted {
        name: ModuleName,
        error: String,
        status: ModuleStatus,
    },
}

impl ModuleSummary {
    pub fn name(&self) -> &str {
        match self {
            ModuleSummary::Described { name, .. } | ModuleSummary::Faulted { name, .. } => name,
        }
    }

    pub fn status(&self) -> ModuleStatus {
        match self {
            ModuleSummary::Described { status, .. } | ModuleSummary::Faulted { status, .. } => *status,
        }
    }
}

/// 模块列表视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleListing {
    pub total: usize,
    pub modules: Vec<ModuleSummary>,
}

/// 单模块详情视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDetail {
    pub name: ModuleName,
    /// 描述信息，获取失败时为空并在 `error` 中给出原因
    pub info: Option<ModuleInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub health: HealthEntry,
    pub status: ModuleStatus,
}

/// 健康与能力聚合器
pub struct HealthAggregator {
    loader: Arc<ModuleLoader>,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(loader: Arc<ModuleLoader>) -> Self {
        Self {
            loader,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// 并发探测所有已注册模块
    pub async fn aggregate_health(&self) -> SystemHealth {
        let modules = self.loader.get_all();
        let modules_loaded = modules.len();

        let entries = join_all(
            modules
                .into_iter()
                .map(|(name, module)| async move {
                    let entry = self.probe(&name, module).await;
                    (name, entry)
                }),
        )
        .await;

        let modules: BTreeMap<ModuleName, HealthEntry> = entries.into_iter().collect();
        let status = if modules.values().all(HealthEntry::is_healthy) {
            SystemStatus::Healthy
        } else {
            SystemStatus::Degraded
        };

        SystemHealth {
            status,
            modules_loaded,
            modules,
            checked_at: now_ns(),
        }
    }

    /// 单个模块的健康条目；未加载时返回 `None`
    pub async fn module_health(&self, name: &str) -> Option<HealthEntry> {
        let module = self.loader.get(name)?;
        Some(self.probe(name, module).await)
    }

    /// 列出所有模块及其描述信息
    pub async fn list_modules(&self) -> ModuleListing {
        let modules = self.loader.get_all();

        let summaries = join_all(modules.into_iter().map(|(name, module)| async move {
            let status = module.get_status();
            let fetch = {
                let module = module.clone();
                async move { module.get_info().await }
            };
            match self.guarded(&name, "get_info", fetch).await {
                Ok(info) => ModuleSummary::Described { name, info, status },
                Err(e) => {
                    warn!("Module '{}' info unavailable: {}", name, e);
                    ModuleSummary::Faulted {
                        name,
                        error: e.to_string(),
                        status: ModuleStatus::Error,
                    }
                }
            }
        }))
        .await;

        ModuleListing {
            total: summaries.len(),
            modules: summaries,
        }
    }

    /// 单模块详情；未加载时返回 `None`
    ///
    /// 描述信息或能力列表获取失败时对应字段为空，原因写入 `error`
    pub async fn describe(&self, name: &str) -> Option<ModuleDetail> {
        let module = self.loader.get(name)?;

        let fetch = {
            let module = module.clone();
            async move { module.get_info().await }
        };
        let (info, capabilities, health) = tokio::join!(
            self.guarded(name, "get_info", fetch),
            self.fetch_capabilities(name, module.clone()),
            self.probe(name, module.clone())
        );

        let mut errors = Vec::new();
        let info = match info {
            Ok(info) => Some(info),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };
        let capabilities = match capabilities {
            Ok(capabilities) => capabilities,
            Err(e) => {
                errors.push(e.to_string());
                Vec::new()
            }
        };
        let status = if errors.is_empty() {
            module.get_status()
        } else {
            warn!("Module '{}' detail incomplete: {}", name, errors.join("; "));
            ModuleStatus::Error
        };

        Some(ModuleDetail {
            name: name.to_string(),
            info,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            capabilities,
            health,
            status,
        })
    }

    /// 单模块能力列表；未加载时返回 `None`，获取失败时返回错误
    pub async fn capabilities(&self, name: &str) -> Option<Result<Vec<CapabilityDescriptor>>> {
        let module = self.loader.get(name)?;
        Some(self.fetch_capabilities(name, module).await)
    }

    async fn fetch_capabilities(&self, name: &str, module: ModuleHandle) -> Result<Vec<CapabilityDescriptor>> {
        let fetch = async move { Ok::<_, SocError>(module.get_capabilities()) };
        self.guarded(name, "get_capabilities", fetch).await
    }

    async fn probe(&self, name: &str, module: ModuleHandle) -> HealthEntry {
        let check = async move { module.health_check().await };
        match self.guarded(name, "health check", check).await {
            Ok(report) => {
                debug!("Module '{}' health: {:?}", name, report.status);
                HealthEntry::Report(report)
            }
            Err(e) => {
                warn!("Module '{}' health check error: {}", name, e);
                HealthEntry::fault(e.to_string())
            }
        }
    }

    /// 在独立任务中执行模块调用，隔离错误、panic 与超时
    async fn guarded<T, F>(&self, name: &str, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.probe_timeout;
        match tokio::spawn(tokio::time::timeout(limit, call)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SocError::timeout(&format!("{} of '{}'", what, name), limit)),
            Err(join) if join.is_panic() => {
                let panic = join.into_panic();
                Err(SocError::probe(
                    name,
                    &format!("{} panicked: {}", what, panic_message(panic.as_ref())),
                ))
            }
            Err(_) => Err(SocError::probe(name, &format!("{} was cancelled", what))),
        }
    }
}

/// 周期性健康监控
pub struct HealthMonitor {
    aggregator: Arc<HealthAggregator>,
    interval: Duration,
    latest: Arc<RwLock<Option<SystemHealth>>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new(aggregator: Arc<HealthAggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            latest: Arc::new(RwLock::new(None)),
            handle: None,
        }
    }

    /// 按注册表设置创建；间隔为 0 表示不启用，返回 `None`
    pub fn from_settings(aggregator: Arc<HealthAggregator>, settings: &RegistrySettings) -> Option<Self> {
        settings
            .health_check_interval()
            .map(|interval| Self::new(aggregator, interval))
    }

    /// 启动后台检查任务（运行中重复调用无效果）
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Health monitor already running");
            return;
        }
        if self.interval.is_zero() {
            warn!("Health monitor interval must be non-zero, not starting");
            return;
        }

        let aggregator = self.aggregator.clone();
        let latest = self.latest.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = aggregator.aggregate_health().await;

                for name in snapshot.unhealthy_modules() {
                    warn!("Module '{}' reported unhealthy", name);
                }
                debug!(
                    "Health snapshot: {} modules, status {:?}",
                    snapshot.modules_loaded, snapshot.status
                );
                *latest.write() = Some(snapshot);
            }
        });

        self.handle = Some(handle);
        info!("Module health monitor started (interval {:?})", self.interval);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Module health monitor stopped");
        }
    }

    /// 后台任务是否仍在运行（任务已结束视为未运行）
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| !handle.is_finished())
    }

    /// 最近一次聚合结果
    pub fn latest(&self) -> Option<SystemHealth> {
        self.latest.read().clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
