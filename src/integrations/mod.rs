//! 内置安全集成
//!
//! VirusTotal、AbuseIPDB、Shodan、URLScan.io、LimaCharlie、TheHive

pub mod http;
pub mod profiles;

pub use http::*;
pub use profiles::*;

use crate::modules::{FactoryTable, Module};

/// 注册所有内置集成的工厂表
pub fn builtin_factories() -> FactoryTable {
    let mut table = FactoryTable::new();
    for profile in BUILTIN_PROFILES {
        table.register(profile.id, move |config| {
            Ok(Box::new(HttpIntegration::new(profile, config)?) as Box<dyn Module>)
        });
    }
    table
}
