//! 进程级装配：启动时连接设备、事件日志订阅、信号与退出流程。

use api_contract::GatewayEvent;
use ems_collector::DataCollector;
use ems_device::DeviceManager;
use ems_storage::ConfigStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 启动时连接所有启用的设备，失败只记录日志。返回连接成功的数量。
pub async fn connect_enabled_devices(store: &dyn ConfigStore, devices: &DeviceManager) -> usize {
    let enabled = match store.list_enabled_devices().await {
        Ok(enabled) => enabled,
        Err(err) => {
            warn!(target: "ems.gateway", error = %err, "startup_device_list_failed");
            return 0;
        }
    };

    let mut connected = 0;
    for device in &enabled {
        match devices.connect_device(device).await {
            Ok(_) => connected += 1,
            Err(err) => warn!(
                target: "ems.gateway",
                device_id = device.id,
                device_name = %device.name,
                error = %err,
                "startup_connect_failed"
            ),
        }
    }
    info!(
        target: "ems.gateway",
        total = enabled.len(),
        connected,
        "startup_connect_finished"
    );
    connected
}

/// 订阅事件并以 JSON 写入日志（推送通道接入前的默认订阅方）。
pub fn spawn_event_logger(mut events: broadcast::Receiver<GatewayEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => {
                        debug!(target: "ems.events", kind = event.kind(), payload = %payload, "gateway_event")
                    }
                    Err(err) => warn!(target: "ems.events", error = %err, "event_encode_failed"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(target: "ems.events", missed, "event_subscriber_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// 停止采集并并发断开所有设备。
pub async fn shutdown(
    collector: &DataCollector,
    devices: &DeviceManager,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    collector.stop().await?;
    devices.disconnect_all().await?;
    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM。
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(err) => {
                warn!(target: "ems.gateway", error = %err, "sigterm_handler_unavailable");
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match terminate {
                    Some(mut sig) => {
                        sig.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_contract::DataEvent;
    use async_trait::async_trait;
    use domain::{Device, ProtocolKind};
    use ems_collector::{BroadcastEventSink, CollectorConfig, EventSink, NoopEventSink};
    use ems_device::ClientFactory;
    use ems_protocol::{ProtocolClient, ProtocolError, RawValue, Selector};
    use ems_storage::InMemoryConfigStore;
    use std::sync::Arc;

    struct LoopbackClient {
        reachable: bool,
        connected: bool,
    }

    #[async_trait]
    impl ProtocolClient for LoopbackClient {
        fn kind(&self) -> ProtocolKind {
            ProtocolKind::ModbusTcp
        }

        async fn connect(&mut self) -> Result<(), ProtocolError> {
            if !self.reachable {
                return Err(ProtocolError::Connection("refused".to_string()));
            }
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ProtocolError> {
            self.connected = false;
            Ok(())
        }

        async fn read(&mut self, _selector: &Selector) -> Result<RawValue, ProtocolError> {
            Ok(RawValue::Words(vec![1]))
        }

        async fn write(&mut self, _selector: &Selector, _value: &RawValue) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    /// 偶数 ID 的设备可达
    struct EvenFactory;

    impl ClientFactory for EvenFactory {
        fn create(&self, device: &Device) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
            Ok(Box::new(LoopbackClient {
                reachable: device.id % 2 == 0,
                connected: false,
            }))
        }
    }

    fn store_with_devices(ids: &[i64]) -> InMemoryConfigStore {
        let store = InMemoryConfigStore::new();
        for id in ids {
            store
                .upsert_device(Device::new(*id, format!("plc-{id}"), "modbus_tcp"))
                .expect("device");
        }
        store
    }

    #[tokio::test]
    async fn startup_connect_tolerates_failures() {
        let store = store_with_devices(&[1, 2, 4]);
        let devices = DeviceManager::new(Arc::new(EvenFactory));

        let connected = connect_enabled_devices(&store, &devices).await;
        assert_eq!(connected, 2);
        assert_eq!(devices.connected_device_ids(), vec![2, 4]);
    }

    #[tokio::test]
    async fn shutdown_stops_collector_and_disconnects() {
        let store = Arc::new(store_with_devices(&[2]));
        let devices = Arc::new(DeviceManager::new(Arc::new(EvenFactory)));
        let collector = DataCollector::new(
            store,
            devices.clone(),
            Arc::new(NoopEventSink),
            CollectorConfig::default(),
        );
        collector.start().await.expect("start");
        assert!(devices.is_device_connected(2).await);

        shutdown(&collector, &devices).await.expect("shutdown");
        assert!(!collector.is_running());
        assert!(devices.connected_device_ids().is_empty());
    }

    #[tokio::test]
    async fn event_logger_exits_when_sink_is_dropped() {
        let sink = BroadcastEventSink::new(4);
        let logger = spawn_event_logger(sink.subscribe());
        sink.publish(GatewayEvent::Data(DataEvent {
            device_id: 1,
            device_name: "plc".to_string(),
            data_point_id: 1,
            data_point_name: "temp".to_string(),
            value: None,
            quality: 0,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
        }));
        drop(sink);
        logger.await.expect("logger task");
    }
}
