//! 内存存储实现
//!
//! 用于测试和本地演示：进程退出即丢失。
//!
//! 使用 `RwLock<HashMap>` / `RwLock<Vec>` 提供线程安全的内存存储，
//! 行为与 SQLite 实现保持一致（排序、过滤、默认确认用户）。

use crate::error::StorageError;
use crate::models::HistoryRecord;
use crate::traits::{ConfigStore, DEFAULT_ACK_USER};
use chrono::{DateTime, Utc};
use domain::{
    AlarmRecord, AlarmStatus, AlarmType, DataPoint, DataPointId, Device, DeviceId, NewAlarm,
    Quality,
};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// 配置存储内存实现
#[derive(Default)]
pub struct InMemoryConfigStore {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    data_points: RwLock<BTreeMap<DataPointId, DataPoint>>,
    history: RwLock<Vec<HistoryRecord>>,
    alarms: RwLock<Vec<AlarmRecord>>,
    next_history_id: AtomicI64,
    next_alarm_id: AtomicI64,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖设备配置
    pub fn upsert_device(&self, device: Device) -> Result<(), StorageError> {
        self.devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(device.id, device);
        Ok(())
    }

    /// 写入或覆盖数据点配置
    pub fn upsert_data_point(&self, point: DataPoint) -> Result<(), StorageError> {
        self.data_points
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(point.id, point);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_enabled_devices(&self) -> Result<Vec<Device>, StorageError> {
        let items = self
            .devices
            .read()
            .map(|map| map.values().filter(|item| item.enabled).cloned().collect())
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items)
    }

    async fn get_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError> {
        let item = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?
            .get(&device_id)
            .cloned();
        Ok(item)
    }

    async fn list_enabled_data_points(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let items = self
            .data_points
            .read()
            .map(|map| {
                map.values()
                    .filter(|item| item.device_id == device_id && item.enabled)
                    .cloned()
                    .collect()
            })
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items)
    }

    async fn get_data_point(
        &self,
        data_point_id: DataPointId,
    ) -> Result<Option<DataPoint>, StorageError> {
        let item = self
            .data_points
            .read()
            .map_err(|_| StorageError::new("lock failed"))?
            .get(&data_point_id)
            .cloned();
        Ok(item)
    }

    async fn insert_history_sample(
        &self,
        data_point_id: DataPointId,
        value: Option<f64>,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let id = self.next_history_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.history
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .push(HistoryRecord {
                id,
                data_point_id,
                value,
                quality,
                timestamp,
            });
        Ok(())
    }

    async fn delete_history_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut history = self
            .history
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = history.len();
        history.retain(|item| item.timestamp >= cutoff);
        Ok((before - history.len()) as u64)
    }

    async fn list_history(
        &self,
        data_point_id: DataPointId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let items = self
            .history
            .read()
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .filter(|item| item.data_point_id == data_point_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items)
    }

    async fn find_active_alarm(
        &self,
        data_point_id: DataPointId,
        alarm_type: AlarmType,
    ) -> Result<Option<AlarmRecord>, StorageError> {
        let item = self
            .alarms
            .read()
            .map_err(|_| StorageError::new("lock failed"))?
            .iter()
            .rev()
            .find(|item| {
                item.data_point_id == data_point_id
                    && item.alarm_type == alarm_type
                    && item.status == AlarmStatus::Active
            })
            .cloned();
        Ok(item)
    }

    async fn insert_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError> {
        let record = AlarmRecord {
            id: self.next_alarm_id.fetch_add(1, Ordering::SeqCst) + 1,
            data_point_id: alarm.data_point_id,
            alarm_type: alarm.alarm_type,
            level: alarm.level,
            value: alarm.value,
            threshold: Some(alarm.threshold),
            message: alarm.message,
            status: AlarmStatus::Active,
            ack_time: None,
            ack_user: None,
            created_at: Utc::now(),
        };
        self.alarms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .push(record.clone());
        Ok(record)
    }

    async fn clear_active_alarms(&self, data_point_id: DataPointId) -> Result<u64, StorageError> {
        let mut alarms = self
            .alarms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut cleared = 0;
        for alarm in alarms
            .iter_mut()
            .filter(|item| item.data_point_id == data_point_id && item.status == AlarmStatus::Active)
        {
            alarm.status = AlarmStatus::Cleared;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn acknowledge_alarm(
        &self,
        alarm_id: i64,
        user: Option<&str>,
    ) -> Result<Option<AlarmRecord>, StorageError> {
        let mut alarms = self
            .alarms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let alarm = match alarms.iter_mut().find(|item| item.id == alarm_id) {
            Some(alarm) => alarm,
            None => return Ok(None),
        };
        alarm.status = AlarmStatus::Acknowledged;
        alarm.ack_time = Some(Utc::now());
        alarm.ack_user = Some(user.unwrap_or(DEFAULT_ACK_USER).to_string());
        Ok(Some(alarm.clone()))
    }

    async fn list_alarms(
        &self,
        status: Option<AlarmStatus>,
    ) -> Result<Vec<AlarmRecord>, StorageError> {
        let items = self
            .alarms
            .read()
            .map(|alarms| {
                alarms
                    .iter()
                    .rev()
                    .filter(|item| status.is_none_or(|status| item.status == status))
                    .cloned()
                    .collect()
            })
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(items)
    }
}
