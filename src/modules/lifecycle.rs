//! 模块生命周期跟踪
//!
//! 记录注册表视角下每个模块名称的状态机位置，并广播状态变更事件。
//! 与实例内部的 `ModuleStatus` 相互独立：未出现在记录中的名称即为「未发现」。

use crate::types::{now_ns, ModuleName, TimestampNs};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// 注册表视角的模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// 已被发现
    Discovered,
    /// 实现无法解析或构造失败
    LoadFailed,
    /// 已构造，尚未初始化
    Loaded,
    /// 初始化失败，未注册
    InitFailed,
    /// 已初始化并注册
    Registered,
    /// 已卸载
    Unregistered,
}

/// 单个模块的生命周期记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLifecycleRecord {
    /// 模块名称
    pub module: ModuleName,
    /// 当前状态
    pub state: RegistrationState,
    /// 状态变更时间
    pub changed_at: TimestampNs,
    /// 加载尝试次数
    pub load_attempts: u32,
    /// 最后错误
    pub last_error: Option<String>,
}

/// 生命周期事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// 事件ID
    pub id: Uuid,
    /// 模块名称
    pub module: ModuleName,
    /// 迁移后的状态
    pub state: RegistrationState,
    /// 事件时间
    pub timestamp: TimestampNs,
    /// 错误描述（失败类事件）
    pub error: Option<String>,
}

/// 生命周期跟踪器
pub struct LifecycleTracker {
    records: RwLock<HashMap<ModuleName, ModuleLifecycleRecord>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleTracker {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// 记录状态迁移并广播事件
    pub fn record(&self, module: &str, state: RegistrationState, error: Option<String>) {
        let timestamp = now_ns();
        {
            let mut records = self.records.write();
            let record = records
                .entry(module.to_string())
                .or_insert_with(|| ModuleLifecycleRecord {
                    module: module.to_string(),
                    state,
                    changed_at: timestamp,
                    load_attempts: 0,
                    last_error: None,
                });

            if matches!(state, RegistrationState::Loaded | RegistrationState::LoadFailed) {
                record.load_attempts += 1;
            }
            record.state = state;
            record.changed_at = timestamp;
            if error.is_some() {
                record.last_error = error.clone();
            }
        }

        debug!("Module '{}' lifecycle -> {:?}", module, state);

        // 没有订阅者时发送失败，可以忽略
        let _ = self.events.send(LifecycleEvent {
            id: Uuid::new_v4(),
            module: module.to_string(),
            state,
            timestamp,
            error,
        });
    }

    /// 名称仍处于注册状态时的加载尝试：累计次数与错误，不改写状态也不广播
    pub fn note_attempt(&self, module: &str, error: Option<String>) {
        if let Some(record) = self.records.write().get_mut(module) {
            record.load_attempts += 1;
            if error.is_some() {
                record.last_error = error;
            }
        }
    }

    /// 只更新最后错误
    pub fn note_error(&self, module: &str, error: String) {
        if let Some(record) = self.records.write().get_mut(module) {
            record.last_error = Some(error);
        }
    }

    pub fn get(&self, module: &str) -> Option<ModuleLifecycleRecord> {
        self.records.read().get(module).cloned()
    }

    pub fn all(&self) -> HashMap<ModuleName, ModuleLifecycleRecord> {
        self.records.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new(256)
    }
}
