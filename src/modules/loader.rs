//! 模块加载器（注册表 + 生命周期管理器）
//!
//! 负责把发现得到的模块标识依次推进：解析实现 → 构造实例 → 初始化 → 注册。
//! 单个模块的任何失败只影响它自己，整体扫描始终返回逐模块的结果。
//!
//! 并发模型：
//! - `loaded` / `available` 使用同步读写锁，锁从不跨越 `.await` 持有；
//! - 所有变更操作（批量加载、初始化注册、重载、卸载）经由 `mutation_gate` 串行化；
//! - `reload` 在新实例就绪后原子替换旧实例，读者只会看到旧实例或新实例。

use super::core::{validate_capabilities, Module, ModuleConfig, ModuleStatus};
use super::discovery::{DirectoryDiscovery, Discovery, ModuleDescriptor};
use super::factory::{FactoryTable, ModuleFactory};
use super::lifecycle::{LifecycleEvent, LifecycleTracker, ModuleLifecycleRecord, RegistrationState};
use super::panic_message;
use crate::config::RegistrySettings;
use crate::types::ModuleName;
use crate::{Result, SocError};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// 已注册模块的共享句柄
pub type ModuleHandle = Arc<dyn Module>;

/// 加载器配置
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// 初始化超时时间，`None` 表示不限制
    pub init_timeout: Option<Duration>,
    /// 卸载清理钩子超时时间
    pub shutdown_timeout: Duration,
    /// 生命周期事件通道容量
    pub event_capacity: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            init_timeout: Some(Duration::from_secs(30)),
            shutdown_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl From<&RegistrySettings> for LoaderConfig {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            init_timeout: match settings.init_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            ..Default::default()
        }
    }
}

/// 模块加载器
pub struct ModuleLoader {
    /// 模块工厂表
    factories: FactoryTable,
    /// 发现策略
    discovery: Arc<dyn Discovery>,
    /// 已初始化并注册的模块
    loaded: RwLock<BTreeMap<ModuleName, ModuleHandle>>,
    /// 已成功解析实现的模块（与初始化结果无关）
    available: RwLock<HashMap<ModuleName, ModuleFactory>>,
    /// 生命周期记录
    lifecycle: LifecycleTracker,
    /// 变更操作串行化
    mutation_gate: Mutex<()>,
    /// 配置
    config: LoaderConfig,
}

impl ModuleLoader {
    /// 创建新的模块加载器
    pub fn new(factories: FactoryTable, discovery: Arc<dyn Discovery>, config: LoaderConfig) -> Self {
        let lifecycle = LifecycleTracker::new(config.event_capacity);
        Self {
            factories,
            discovery,
            loaded: RwLock::new(BTreeMap::new()),
            available: RwLock::new(HashMap::new()),
            lifecycle,
            mutation_gate: Mutex::new(()),
            config,
        }
    }

    /// 按注册表设置创建目录发现的加载器
    pub fn from_settings(factories: FactoryTable, settings: &RegistrySettings) -> Self {
        let discovery = DirectoryDiscovery::new(&settings.modules_path)
            .with_entry_point(&settings.entry_point)
            .with_reserved_prefix(&settings.reserved_prefix);
        Self::new(factories, Arc::new(discovery), LoaderConfig::from(settings))
    }

    /// 执行一次发现
    pub fn discover(&self) -> Vec<ModuleDescriptor> {
        self.discovery.discover()
    }

    /// 解析实现并构造实例
    ///
    /// 失败以 `SocError::Load` 返回并记录日志，不会中断调用方的批量流程。
    /// 构造成功即写入「可用」映射，与后续初始化结果无关。
    /// 名称仍处于注册状态时只累计尝试次数，生命周期状态保持 `Registered`。
    pub fn load(&self, name: &str, config: ModuleConfig) -> Result<Box<dyn Module>> {
        let registered = self.is_loaded(name);
        let outcome = self.construct(name, config);
        match &outcome {
            Ok(_) if registered => {
                self.lifecycle.note_attempt(name, None);
                info!("Loaded replacement candidate for registered module: {}", name);
            }
            Err(e) if registered => {
                self.lifecycle.note_attempt(name, Some(e.to_string()));
                error!("Failed to load replacement for module {}: {}", name, e);
            }
            Ok(_) => {
                self.lifecycle.record(name, RegistrationState::Loaded, None);
                info!("Successfully loaded module: {}", name);
            }
            Err(e) => {
                self.lifecycle
                    .record(name, RegistrationState::LoadFailed, Some(e.to_string()));
                error!("Failed to load module {}: {}", name, e);
            }
        }
        outcome
    }

    /// 初始化实例，成功则以 `name` 注册
    ///
    /// 已存在同名实例时直接覆盖；需要原子替换语义请使用 `reload`。
    pub async fn initialize_and_register(&self, name: &str, instance: Box<dyn Module>) -> bool {
        let _gate = self.mutation_gate.lock().await;
        let (instance, outcome) = self.run_initialize(name, instance).await;
        let (registered, replaced) = self.finish_registration(name, instance, outcome);
        if let Some(previous) = replaced {
            self.teardown(name, previous).await;
        }
        registered
    }

    /// 发现并加载全部模块
    ///
    /// 每个模块独立地全成或全败；构造按发现顺序进行，初始化并发执行，
    /// 注册再按发现顺序落地，因此单次运行内结果确定。
    pub async fn load_all(&self, configs: &HashMap<ModuleName, ModuleConfig>) -> BTreeMap<ModuleName, bool> {
        let _gate = self.mutation_gate.lock().await;
        let discovered = self.discovery.discover();
        info!("Loading {} discovered modules", discovered.len());

        let mut results = BTreeMap::new();
        let mut pending = Vec::new();

        for descriptor in discovered {
            let name = descriptor.name;
            if !self.is_loaded(&name) {
                self.lifecycle.record(&name, RegistrationState::Discovered, None);
            }

            let config = configs.get(&name).cloned().unwrap_or_default();
            match self.load(&name, config) {
                Ok(instance) => pending.push((name, instance)),
                Err(_) => {
                    results.insert(name, false);
                }
            }
        }

        let initialized = join_all(
            pending
                .into_iter()
                .map(|(name, instance)| async move {
                    let (instance, outcome) = self.run_initialize(&name, instance).await;
                    (name, instance, outcome)
                }),
        )
        .await;

        let mut replaced = Vec::new();
        for (name, instance, outcome) in initialized {
            let (registered, previous) = self.finish_registration(&name, instance, outcome);
            if let Some(previous) = previous {
                replaced.push((name.clone(), previous));
            }
            results.insert(name, registered);
        }
        for (name, previous) in replaced {
            self.teardown(&name, previous).await;
        }

        let succeeded = results.values().filter(|ok| **ok).count();
        info!("Module loading finished: {}/{} registered", succeeded, results.len());
        results
    }

    /// 获取已注册模块，未加载时返回 `None`
    pub fn get(&self, name: &str) -> Option<ModuleHandle> {
        self.loaded.read().get(name).cloned()
    }

    /// 获取已注册模块，未加载时返回 `ModuleNotFound`
    pub fn require(&self, name: &str) -> Result<ModuleHandle> {
        self.get(name).ok_or_else(|| SocError::ModuleNotFound {
            module: name.to_string(),
        })
    }

    /// 在已注册模块上调用一个操作
    pub async fn execute(&self, name: &str, operation: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let module = self.require(name)?;
        module.execute(operation, params).await
    }

    /// 已注册模块的快照副本
    pub fn get_all(&self) -> BTreeMap<ModuleName, ModuleHandle> {
        self.loaded.read().clone()
    }

    /// 以新配置重载模块
    ///
    /// 语义等同于「卸载（若存在）+ 加载 + 初始化注册」，唯一区别是旧实例会保留到
    /// 新实例初始化完成，然后一次性替换或移除。被丢弃的旧实例会收到 `shutdown` 调用。
    pub async fn reload(&self, name: &str, config: ModuleConfig) -> bool {
        let _gate = self.mutation_gate.lock().await;
        info!("Reloading module: {}", name);

        let instance = match self.load(name, config) {
            Ok(instance) => instance,
            Err(_) => {
                if let Some(previous) = self.remove_loaded(name) {
                    self.lifecycle.record(name, RegistrationState::Unregistered, None);
                    self.teardown(name, previous).await;
                }
                return false;
            }
        };

        let (instance, outcome) = self.run_initialize(name, instance).await;
        let succeeded = outcome.is_ok();
        let (registered, replaced) = self.finish_registration(name, instance, outcome);

        let previous = if succeeded {
            replaced
        } else {
            let removed = self.remove_loaded(name);
            if removed.is_some() {
                self.lifecycle.record(name, RegistrationState::Unregistered, None);
            }
            removed
        };
        if let Some(previous) = previous {
            self.teardown(name, previous).await;
        }
        registered
    }

    /// 卸载模块，返回是否确实移除
    pub async fn unload(&self, name: &str) -> bool {
        let _gate = self.mutation_gate.lock().await;
        match self.remove_loaded(name) {
            Some(module) => {
                self.lifecycle.record(name, RegistrationState::Unregistered, None);
                self.teardown(name, module).await;
                info!("Module {} unloaded", name);
                true
            }
            None => {
                debug!("Unload of '{}' ignored: not loaded", name);
                false
            }
        }
    }

    /// 卸载所有模块，返回被卸载的名称
    pub async fn shutdown_all(&self) -> Vec<ModuleName> {
        let _gate = self.mutation_gate.lock().await;
        let drained = std::mem::take(&mut *self.loaded.write());
        let names: Vec<ModuleName> = drained.keys().cloned().collect();

        join_all(drained.into_iter().map(|(name, module)| async move {
            self.lifecycle.record(&name, RegistrationState::Unregistered, None);
            self.teardown(&name, module).await;
        }))
        .await;

        info!("All modules unloaded ({})", names.len());
        names
    }

    /// 是否已注册
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().contains_key(name)
    }

    /// 已注册模块名称（有序）
    pub fn loaded_names(&self) -> Vec<ModuleName> {
        self.loaded.read().keys().cloned().collect()
    }

    /// 已解析出实现的模块名称（有序）
    pub fn available_modules(&self) -> Vec<ModuleName> {
        let mut names: Vec<ModuleName> = self.available.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.loaded.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.read().is_empty()
    }

    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    /// 注册表视角的模块生命周期记录
    pub fn lifecycle_state(&self, name: &str) -> Option<ModuleLifecycleRecord> {
        self.lifecycle.get(name)
    }

    pub fn lifecycle_states(&self) -> HashMap<ModuleName, ModuleLifecycleRecord> {
        self.lifecycle.all()
    }

    /// 订阅生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    // 私有辅助方法

    fn remove_loaded(&self, name: &str) -> Option<ModuleHandle> {
        self.loaded.write().remove(name)
    }

    fn construct(&self, name: &str, config: ModuleConfig) -> Result<Box<dyn Module>> {
        let factory = self
            .factories
            .resolve(name)
            .ok_or_else(|| SocError::load(name, "no factory registered for this module"))?;

        let instance = std::panic::catch_unwind(AssertUnwindSafe(|| factory(config)))
            .map_err(|panic| {
                SocError::load(
                    name,
                    &format!("constructor panicked: {}", panic_message(panic.as_ref())),
                )
            })?
            .map_err(|e| match e {
                SocError::Load { .. } => e,
                other => SocError::load(name, &other.to_string()),
            })?;

        self.available.write().insert(name.to_string(), factory);
        Ok(instance)
    }

    /// 执行初始化，隔离错误、panic 与超时
    async fn run_initialize(&self, name: &str, mut instance: Box<dyn Module>) -> (Box<dyn Module>, Result<()>) {
        let validation = std::panic::catch_unwind(AssertUnwindSafe(|| validate_capabilities(instance.as_ref())))
            .unwrap_or_else(|panic| {
                Err(SocError::init(
                    name,
                    &format!("panicked while listing capabilities: {}", panic_message(panic.as_ref())),
                ))
            });
        if let Err(e) = validation {
            return (instance, Err(e));
        }

        let outcome = {
            let attempt = AssertUnwindSafe(instance.initialize()).catch_unwind();
            match self.config.init_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .map_err(|_| SocError::timeout(&format!("initialize '{}'", name), limit)),
                None => Ok(attempt.await),
            }
        };

        let result = match outcome {
            Ok(Ok(Ok(()))) if instance.get_status() == ModuleStatus::Active => Ok(()),
            Ok(Ok(Ok(()))) => Err(SocError::init(
                name,
                &format!("initialize reported success but status is '{}'", instance.get_status()),
            )),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(panic)) => Err(SocError::init(
                name,
                &format!("panicked during initialization: {}", panic_message(panic.as_ref())),
            )),
            Err(e) => Err(e),
        };
        (instance, result)
    }

    /// 根据初始化结果落地注册，返回（是否注册，被覆盖的旧实例）
    fn finish_registration(
        &self,
        name: &str,
        instance: Box<dyn Module>,
        outcome: Result<()>,
    ) -> (bool, Option<ModuleHandle>) {
        match outcome {
            Ok(()) => {
                let replaced = self
                    .loaded
                    .write()
                    .insert(name.to_string(), Arc::from(instance));
                if replaced.is_some() {
                    self.lifecycle.record(name, RegistrationState::Unregistered, None);
                }
                self.lifecycle.record(name, RegistrationState::Registered, None);
                info!("Module {} initialized successfully", name);
                (true, replaced)
            }
            Err(e) => {
                // 旧实例仍在注册表中时保持 Registered，只记录错误
                if self.is_loaded(name) {
                    self.lifecycle.note_error(name, e.to_string());
                } else {
                    self.lifecycle
                        .record(name, RegistrationState::InitFailed, Some(e.to_string()));
                }
                error!("Failed to initialize module {}: {}", name, e);
                (false, None)
            }
        }
    }

    /// 调用被丢弃实例的清理钩子
    async fn teardown(&self, name: &str, module: ModuleHandle) {
        let hook = AssertUnwindSafe(module.shutdown()).catch_unwind();
        match tokio::time::timeout(self.config.shutdown_timeout, hook).await {
            Ok(Ok(())) => debug!("Module '{}' shut down", name),
            Ok(Err(panic)) => warn!(
                "Module '{}' panicked during shutdown: {}",
                name,
                panic_message(panic.as_ref())
            ),
            Err(_) => warn!(
                "Module '{}' shutdown exceeded {:?}, dropping it anyway",
                name, self.config.shutdown_timeout
            ),
        }
    }
}
