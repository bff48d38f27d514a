//! 模块系统
//!
//! 统一的 Module trait、模块发现、注册表与生命周期管理、健康与能力聚合

pub mod core;
pub mod discovery;
pub mod factory;
pub mod health;
pub mod lifecycle;
pub mod loader;

// 重新导出核心组件
pub use self::core::*;
pub use discovery::*;
pub use factory::*;
pub use health::*;
pub use lifecycle::*;
pub use loader::*;

use std::any::Any;

/// 提取 panic 负载中的消息
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
