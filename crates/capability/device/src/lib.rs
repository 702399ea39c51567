//! # 设备管理能力模块
//!
//! [`DeviceManager`] 是设备连接的唯一持有者：
//!
//! - 每个设备 ID 至多一条连接，协议种类在连接时解析并缓存
//! - 注册表本身由短临界区的 `std::sync::Mutex` 保护
//! - 每个设备条目带一把异步锁，串行化该设备上的所有 I/O
//!
//! 读失败不会向上抛错，而是返回 quality = 0 的采样；链路级故障会把连接移出
//! 注册表，下一轮采集重新 `connect`。

mod factory;

pub use factory::{ClientFactory, DEFAULT_DEVICE_TIMEOUT, DefaultClientFactory, create_client};

use domain::{DataPoint, Device, DeviceId, ProtocolKind, Sample};
use ems_protocol::{PointAddress, ProtocolClient, ProtocolError};
use ems_telemetry::{
    record_connect_failure, record_connect_success, record_read_failure, record_read_success,
    record_write_failure, record_write_success,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 设备管理错误。
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {device_id}: {source}")]
    Protocol {
        device_id: DeviceId,
        #[source]
        source: ProtocolError,
    },
    #[error("device {0} is not connected")]
    NotConnected(DeviceId),
    #[error("device registry lock failed")]
    Registry,
}

impl DeviceError {
    pub fn protocol(device_id: DeviceId, source: ProtocolError) -> Self {
        Self::Protocol { device_id, source }
    }

    /// 底层协议错误（若有）。
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// `connect_device` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// 新建并注册了连接
    Connected,
    /// 已有可用连接，未做任何 I/O
    AlreadyConnected,
}

/// 设备与其协议客户端的持有关系。
struct ManagedClient {
    device: Device,
    kind: ProtocolKind,
    client: Box<dyn ProtocolClient>,
}

type DeviceSlot = Arc<tokio::sync::Mutex<Option<ManagedClient>>>;

/// 设备连接注册表。
pub struct DeviceManager {
    factory: Arc<dyn ClientFactory>,
    slots: Mutex<HashMap<DeviceId, DeviceSlot>>,
}

impl DeviceManager {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, device_id: DeviceId) -> Result<Option<DeviceSlot>, DeviceError> {
        let slots = self.slots.lock().map_err(|_| DeviceError::Registry)?;
        Ok(slots.get(&device_id).cloned())
    }

    fn slot_or_insert(&self, device_id: DeviceId) -> Result<DeviceSlot, DeviceError> {
        let mut slots = self.slots.lock().map_err(|_| DeviceError::Registry)?;
        Ok(Arc::clone(slots.entry(device_id).or_default()))
    }

    /// 移除注册表中仍指向 `slot` 的条目（调用方持有该条目的锁）。
    fn unregister(&self, device_id: DeviceId, slot: &DeviceSlot) {
        if let Ok(mut slots) = self.slots.lock()
            && slots
                .get(&device_id)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&device_id);
        }
    }

    /// 当前注册表条目是否仍是 `slot`。
    fn is_current(&self, device_id: DeviceId, slot: &DeviceSlot) -> Result<bool, DeviceError> {
        let slots = self.slots.lock().map_err(|_| DeviceError::Registry)?;
        Ok(slots
            .get(&device_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot)))
    }

    /// 建立设备连接。已有可用连接时直接返回（幂等）；失败时不注册任何状态。
    ///
    /// 取得条目锁后重新核对注册表：条目若已被并发的断开操作移除，换新条目重试，
    /// 连接不会落入已注销的条目。
    pub async fn connect_device(&self, device: &Device) -> Result<ConnectOutcome, DeviceError> {
        let (slot, mut guard) = loop {
            let slot = self.slot_or_insert(device.id)?;
            let guard = slot.clone().lock_owned().await;
            if self.is_current(device.id, &slot)? {
                break (slot, guard);
            }
            debug!(target: "ems.device", device_id = device.id, "device_slot_retired");
        };

        if guard
            .as_ref()
            .is_some_and(|managed| managed.client.is_connected())
        {
            warn!(
                target: "ems.device",
                device_id = device.id,
                device_name = %device.name,
                "device_already_connected"
            );
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        if let Some(mut stale) = guard.take()
            && let Err(err) = stale.client.disconnect().await
        {
            debug!(target: "ems.device", device_id = device.id, error = %err, "stale_disconnect_failed");
        }

        match self.open_client(device).await {
            Ok((kind, client)) => {
                *guard = Some(ManagedClient {
                    device: device.clone(),
                    kind,
                    client,
                });
                record_connect_success();
                info!(
                    target: "ems.device",
                    device_id = device.id,
                    device_name = %device.name,
                    protocol = kind.as_str(),
                    "device_connected"
                );
                Ok(ConnectOutcome::Connected)
            }
            Err(err) => {
                record_connect_failure();
                self.unregister(device.id, &slot);
                Err(err)
            }
        }
    }

    async fn open_client(
        &self,
        device: &Device,
    ) -> Result<(ProtocolKind, Box<dyn ProtocolClient>), DeviceError> {
        let mut client = self
            .factory
            .create(device)
            .map_err(|err| DeviceError::protocol(device.id, err))?;
        client
            .connect()
            .await
            .map_err(|err| DeviceError::protocol(device.id, err))?;
        Ok((client.kind(), client))
    }

    /// 断开并注销设备连接。返回该设备此前是否已注册。
    pub async fn disconnect_device(&self, device_id: DeviceId) -> Result<bool, DeviceError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| DeviceError::Registry)?;
            slots.remove(&device_id)
        };
        let Some(slot) = slot else {
            return Ok(false);
        };
        let managed = slot.lock().await.take();
        let Some(mut managed) = managed else {
            return Ok(false);
        };

        managed
            .client
            .disconnect()
            .await
            .map_err(|err| DeviceError::protocol(device_id, err))?;
        info!(
            target: "ems.device",
            device_id,
            device_name = %managed.device.name,
            "device_disconnected"
        );
        Ok(true)
    }

    /// 并发断开全部设备，等待全部完成后返回第一个错误（若有）。
    pub async fn disconnect_all(&self) -> Result<(), DeviceError> {
        let slots: Vec<(DeviceId, DeviceSlot)> = {
            let mut slots = self.slots.lock().map_err(|_| DeviceError::Registry)?;
            slots.drain().collect()
        };
        let total = slots.len();

        let results = futures::future::join_all(slots.into_iter().map(
            |(device_id, slot)| async move {
                let managed = slot.lock().await.take();
                match managed {
                    Some(mut managed) => managed
                        .client
                        .disconnect()
                        .await
                        .map_err(|err| DeviceError::protocol(device_id, err)),
                    None => Ok(()),
                }
            },
        ))
        .await;

        let mut first_error = None;
        let mut failed = 0usize;
        for result in results {
            if let Err(err) = result {
                warn!(target: "ems.device", error = %err, "device_disconnect_failed");
                failed += 1;
                first_error.get_or_insert(err);
            }
        }
        info!(target: "ems.device", total, failed, "devices_disconnected");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 读取数据点并换算为工程值。
    ///
    /// 设备未连接时立即返回 [`DeviceError::NotConnected`]；读或解码失败返回
    /// quality = 0 的采样。链路级失败会注销该连接。
    pub async fn read_data_point(
        &self,
        device_id: DeviceId,
        point: &DataPoint,
    ) -> Result<Sample, DeviceError> {
        let slot = self
            .slot(device_id)?
            .ok_or(DeviceError::NotConnected(device_id))?;
        let mut guard = slot.lock().await;
        let managed = guard
            .as_mut()
            .filter(|managed| managed.client.is_connected())
            .ok_or(DeviceError::NotConnected(device_id))?;

        match read_point(managed, point).await {
            Ok(raw) => {
                let value = point.apply_scale(raw);
                record_read_success();
                debug!(
                    target: "ems.device",
                    device_id,
                    data_point_id = point.id,
                    raw,
                    value,
                    "data_point_read"
                );
                Ok(Sample::good(value))
            }
            Err(err) => {
                record_read_failure();
                warn!(
                    target: "ems.device",
                    device_id,
                    data_point_id = point.id,
                    address = %point.address,
                    configuration = err.is_configuration(),
                    error = %err,
                    "data_point_read_failed"
                );
                if err.is_transport_failure()
                    && let Some(mut evicted) = guard.take()
                {
                    self.unregister(device_id, &slot);
                    if let Err(close_err) = evicted.client.disconnect().await {
                        debug!(target: "ems.device", device_id, error = %close_err, "evicted_disconnect_failed");
                    }
                    warn!(
                        target: "ems.device",
                        device_id,
                        device_name = %evicted.device.name,
                        "device_connection_evicted"
                    );
                }
                Ok(Sample::bad())
            }
        }
    }

    /// 写入数据点。写失败向上传播。
    pub async fn write_data_point(
        &self,
        device_id: DeviceId,
        point: &DataPoint,
        value: f64,
    ) -> Result<(), DeviceError> {
        let slot = self
            .slot(device_id)?
            .ok_or(DeviceError::NotConnected(device_id))?;
        let mut guard = slot.lock().await;
        let managed = guard
            .as_mut()
            .filter(|managed| managed.client.is_connected())
            .ok_or(DeviceError::NotConnected(device_id))?;

        let result: Result<(), ProtocolError> = async {
            let address = PointAddress::resolve(managed.kind, &point.address, &point.data_type)?;
            let (selector, raw) = address.encode_write(value)?;
            managed.client.write(&selector, &raw).await
        }
        .await;

        match result {
            Ok(()) => {
                record_write_success();
                info!(
                    target: "ems.device",
                    device_id,
                    data_point_id = point.id,
                    value,
                    "data_point_written"
                );
                Ok(())
            }
            Err(err) => {
                record_write_failure();
                Err(DeviceError::protocol(device_id, err))
            }
        }
    }

    /// 设备是否已注册且客户端报告已连接。
    pub async fn is_device_connected(&self, device_id: DeviceId) -> bool {
        let Ok(Some(slot)) = self.slot(device_id) else {
            return false;
        };
        let guard = slot.lock().await;
        guard
            .as_ref()
            .is_some_and(|managed| managed.client.is_connected())
    }

    /// 已注册设备 ID（升序）。
    pub fn connected_device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = match self.slots.lock() {
            Ok(slots) => slots.keys().copied().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    /// 连接测试：建立连接后立即断开，不注册任何状态。
    pub async fn test_connection(&self, device: &Device) -> Result<(), DeviceError> {
        let (_, mut client) = self.open_client(device).await?;
        client
            .disconnect()
            .await
            .map_err(|err| DeviceError::protocol(device.id, err))?;
        info!(target: "ems.device", device_id = device.id, "device_connection_test_passed");
        Ok(())
    }

    /// 设备配置变更后调用：丢弃现有连接，下一轮采集按新参数重连。
    pub async fn reload_device(&self, device: &Device) -> Result<(), DeviceError> {
        let was_registered = self.disconnect_device(device.id).await?;
        info!(
            target: "ems.device",
            device_id = device.id,
            enabled = device.enabled,
            was_registered,
            "device_reloaded"
        );
        Ok(())
    }
}

async fn read_point(managed: &mut ManagedClient, point: &DataPoint) -> Result<f64, ProtocolError> {
    let address = PointAddress::resolve(managed.kind, &point.address, &point.data_type)?;
    let raw = managed.client.read(&address.read_selector()).await?;
    address.decode(&raw)
}
