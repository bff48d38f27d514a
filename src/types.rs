//! SOC Hub 基础类型

/// 模块名称（发现目录名，同时也是注册表键）
pub type ModuleName = String;

/// 纳秒时间戳
pub type TimestampNs = i64;

/// 当前时间（纳秒）
pub fn now_ns() -> TimestampNs {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
