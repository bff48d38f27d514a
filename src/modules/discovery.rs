//! 模块发现
//!
//! 枚举配置根目录下的模块实现标识，只做存在性检查，不实例化任何模块

use crate::types::ModuleName;
use crate::SocError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 默认入口文件名
pub const DEFAULT_ENTRY_POINT: &str = "module.toml";

/// 默认保留前缀，以此开头的目录不参与发现
pub const DEFAULT_RESERVED_PREFIX: &str = "_";

/// 发现阶段得到的模块标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块名称
    pub name: ModuleName,
    /// 发现来源
    pub source: ModuleSource,
}

/// 模块来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleSource {
    /// 目录发现
    Directory(PathBuf),
    /// 内嵌（静态列表）
    Embedded,
}

/// 发现接口
#[cfg_attr(test, mockall::automock)]
pub trait Discovery: Send + Sync {
    /// 返回有序的模块标识列表；根位置缺失时返回空列表
    fn discover(&self) -> Vec<ModuleDescriptor>;
}

/// 基于目录的发现：根目录下每个含入口文件且不以保留前缀开头的子目录为一个模块
#[derive(Debug, Clone)]
pub struct DirectoryDiscovery {
    root: PathBuf,
    entry_point: String,
    reserved_prefix: String,
}

impl DirectoryDiscovery {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            reserved_prefix: DEFAULT_RESERVED_PREFIX.to_string(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = entry_point.to_string();
        self
    }

    pub fn with_reserved_prefix(mut self, prefix: &str) -> Self {
        self.reserved_prefix = prefix.to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn qualifies(&self, path: &Path) -> Option<ModuleName> {
        if !path.is_dir() {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        if !self.reserved_prefix.is_empty() && name.starts_with(&self.reserved_prefix) {
            debug!("Skipping reserved module directory: {:?}", path);
            return None;
        }
        if !path.join(&self.entry_point).is_file() {
            debug!("Skipping {:?}: no {} entry point", path, self.entry_point);
            return None;
        }
        Some(name.to_string())
    }
}

impl Discovery for DirectoryDiscovery {
    fn discover(&self) -> Vec<ModuleDescriptor> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                let error = SocError::discovery(&format!("modules directory {:?} unavailable: {}", self.root, e));
                warn!("{}", error);
                return Vec::new();
            }
        };

        let mut discovered: Vec<ModuleDescriptor> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                self.qualifies(&path).map(|name| ModuleDescriptor {
                    name,
                    source: ModuleSource::Directory(path),
                })
            })
            .collect();

        // read_dir 顺序不稳定
        discovered.sort_by(|a, b| a.name.cmp(&b.name));

        for descriptor in &discovered {
            info!("Discovered module: {}", descriptor.name);
        }
        discovered
    }
}

/// 固定列表发现，用于内嵌部署
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    names: Vec<ModuleName>,
}

impl StaticDiscovery {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<ModuleName> = Vec::new();
        for name in names.into_iter().map(Into::into) {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self { names: unique }
    }
}

impl Discovery for StaticDiscovery {
    fn discover(&self) -> Vec<ModuleDescriptor> {
        self.names
            .iter()
            .map(|name| ModuleDescriptor {
                name: name.clone(),
                source: ModuleSource::Embedded,
            })
            .collect()
    }
}
