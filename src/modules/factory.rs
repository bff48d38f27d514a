//! 模块工厂表
//!
//! 启动时显式注册「模块标识 → 构造函数」映射，取代按命名约定的运行时反射

use super::core::{Module, ModuleConfig};
use crate::types::ModuleName;
use crate::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 类型擦除的模块构造函数
pub type ModuleFactory = Arc<dyn Fn(ModuleConfig) -> Result<Box<dyn Module>> + Send + Sync>;

/// 模块工厂表
#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: BTreeMap<ModuleName, ModuleFactory>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，同名工厂会被替换
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(ModuleConfig) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// 构建器风格的注册
    pub fn with<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(ModuleConfig) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// 解析模块标识对应的工厂
    pub fn resolve(&self, name: &str) -> Option<ModuleFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<ModuleName> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryTable")
            .field("factories", &self.names())
            .finish()
    }
}
