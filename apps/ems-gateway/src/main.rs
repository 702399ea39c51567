//! 采集网关进程：加载配置、装配存储/设备管理/采集器，并处理优雅退出。

mod wiring;

use ems_collector::{BroadcastEventSink, CollectorConfig, DataCollector};
use ems_config::AppConfig;
use ems_device::{DefaultClientFactory, DeviceManager};
use ems_storage::SqliteConfigStore;
use ems_telemetry::init_tracing;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 数据库文件所在目录需预先存在
    if let Some(parent) = config.database_file().as_deref().and_then(|path| path.parent())
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteConfigStore::connect(&config.database_url).await?);

    let factory = Arc::new(DefaultClientFactory::new(config.default_device_timeout()));
    let devices = Arc::new(DeviceManager::new(factory));
    let sink = Arc::new(BroadcastEventSink::new(config.event_channel_capacity));
    let event_log = wiring::spawn_event_logger(sink.subscribe());

    if config.connect_on_startup {
        wiring::connect_enabled_devices(store.as_ref(), &devices).await;
    }

    let collector = DataCollector::new(
        store.clone(),
        devices.clone(),
        sink.clone(),
        CollectorConfig {
            interval: config.collect_interval(),
            retention_days: config.history_retention_days,
            max_concurrent_devices: config.max_concurrent_devices,
        },
    );
    collector.start().await?;
    info!(target: "ems.gateway", database_url = %config.database_url, "gateway_started");

    wiring::wait_for_shutdown().await;
    info!(target: "ems.gateway", "shutdown_requested");

    match tokio::time::timeout(
        config.shutdown_timeout(),
        wiring::shutdown(&collector, &devices),
    )
    .await
    {
        Ok(Ok(())) => info!(target: "ems.gateway", "gateway_stopped"),
        Ok(Err(err)) => warn!(target: "ems.gateway", error = %err, "gateway_shutdown_failed"),
        Err(_) => warn!(
            target: "ems.gateway",
            timeout_ms = config.shutdown_timeout_ms,
            "gateway_shutdown_timed_out"
        ),
    }
    event_log.abort();
    Ok(())
}
