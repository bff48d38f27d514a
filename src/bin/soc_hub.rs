//! SOC Hub 主程序 - 配置驱动运行
//!
//! 加载YAML配置，发现并初始化所有模块，输出注册结果、模块列表与聚合健康状态

use anyhow::Context;
use soc_hub::{
    builtin_factories,
    config::{generate_default_config_file, ConfigManager},
    init_logging, HealthAggregator, HealthMonitor, ModuleLoader,
};
use std::env;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "soc_hub_config.yaml";

/// 程序入口点
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        1 => run(ConfigManager::new_default()).await,
        2 => match args[1].as_str() {
            "init" => generate_config_file().await,
            "-h" | "--help" | "help" => {
                print_usage();
                Ok(())
            }
            path => run(load_config(path).await?).await,
        },
        3 if args[1] == "watch" => watch(load_config(&args[2]).await?).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// 读取配置文件，不存在时提示并退出
async fn load_config(path: &str) -> anyhow::Result<ConfigManager> {
    if !Path::new(path).exists() {
        eprintln!("Config file not found: {}", path);
        eprintln!("Use 'soc_hub init' to generate a default config file");
        std::process::exit(1);
    }
    ConfigManager::load_from_file(path)
        .await
        .with_context(|| format!("failed to load config from {}", path))
}

/// 加载全部模块并输出结果
async fn run(manager: ConfigManager) -> anyhow::Result<()> {
    let config = manager.get_config();
    init_logging(&config.logging);
    manager.validate().context("invalid configuration")?;

    tracing::info!(
        "Starting {} v{} (modules from '{}')",
        config.app.name,
        config.app.version,
        config.registry.modules_path
    );

    let loader = Arc::new(ModuleLoader::from_settings(builtin_factories(), &config.registry));
    let results = loader.load_all(&manager.module_configs()).await;

    let aggregator =
        HealthAggregator::new(loader.clone()).with_probe_timeout(config.registry.health_timeout());
    let listing = aggregator.list_modules().await;
    let health = aggregator.aggregate_health().await;

    let report = serde_json::json!({
        "results": results,
        "modules": listing,
        "health": health,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    loader.shutdown_all().await;
    tracing::info!("{} stopped", config.app.name);
    Ok(())
}

/// 加载全部模块并按配置间隔持续监控，直到收到 Ctrl-C
async fn watch(manager: ConfigManager) -> anyhow::Result<()> {
    let config = manager.get_config();
    init_logging(&config.logging);
    manager.validate().context("invalid configuration")?;

    let loader = Arc::new(ModuleLoader::from_settings(builtin_factories(), &config.registry));
    let results = loader.load_all(&manager.module_configs()).await;
    println!("{}", serde_json::to_string_pretty(&results)?);

    let aggregator = Arc::new(
        HealthAggregator::new(loader.clone()).with_probe_timeout(config.registry.health_timeout()),
    );
    let mut monitor = HealthMonitor::from_settings(aggregator, &config.registry)
        .context("registry.health_check_interval_secs must be positive in watch mode")?;
    monitor.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    monitor.stop();

    if let Some(snapshot) = monitor.latest() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    loader.shutdown_all().await;
    tracing::info!("{} stopped", config.app.name);
    Ok(())
}

/// 生成默认配置文件
async fn generate_config_file() -> anyhow::Result<()> {
    generate_default_config_file(DEFAULT_CONFIG_PATH)
        .await
        .with_context(|| format!("failed to write {}", DEFAULT_CONFIG_PATH))?;

    println!("Generated default config file: {}", DEFAULT_CONFIG_PATH);
    println!("Edit the file, then run: soc_hub {}", DEFAULT_CONFIG_PATH);
    Ok(())
}

/// 打印使用说明
fn print_usage() {
    println!("SOC Hub security integration registry");
    println!();
    println!("Usage:");
    println!("  soc_hub                    # run with the default configuration");
    println!("  soc_hub init               # write {}", DEFAULT_CONFIG_PATH);
    println!("  soc_hub <config_file>      # run with the given YAML configuration");
    println!("  soc_hub watch <config>     # keep modules loaded and check health periodically");
}
