//! 存储接口 Trait 定义
//!
//! 采集引擎只通过 [`ConfigStore`] 访问配置与历史：
//! - 读取启用的设备 / 数据点
//! - 写入历史采样、清理过期历史
//! - 报警的查重、写入、清除、确认
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发
//! - "每个 (data_point_id, alarm_type) 至多一条 active" 由报警评估器保证，存储不做约束

use crate::error::StorageError;
use crate::models::HistoryRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    AlarmRecord, AlarmStatus, AlarmType, DataPoint, DataPointId, Device, DeviceId, NewAlarm,
    Quality,
};

/// 确认报警时未指定用户的默认值
pub const DEFAULT_ACK_USER: &str = "system";

/// 配置存储接口
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// 列出所有启用的设备（按 id 升序）
    async fn list_enabled_devices(&self) -> Result<Vec<Device>, StorageError>;

    async fn get_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError>;

    /// 列出设备下所有启用的数据点（按 id 升序）
    async fn list_enabled_data_points(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<DataPoint>, StorageError>;

    async fn get_data_point(
        &self,
        data_point_id: DataPointId,
    ) -> Result<Option<DataPoint>, StorageError>;

    /// 写入一条历史采样（quality = 0 时 value 为空）
    async fn insert_history_sample(
        &self,
        data_point_id: DataPointId,
        value: Option<f64>,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// 删除早于 `cutoff` 的历史采样，返回删除行数
    async fn delete_history_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    /// 最近的历史采样（新到旧）
    async fn list_history(
        &self,
        data_point_id: DataPointId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StorageError>;

    async fn find_active_alarm(
        &self,
        data_point_id: DataPointId,
        alarm_type: AlarmType,
    ) -> Result<Option<AlarmRecord>, StorageError>;

    /// 写入新报警（status = active）
    async fn insert_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError>;

    /// 清除数据点所有 active 报警，返回清除条数
    async fn clear_active_alarms(&self, data_point_id: DataPointId) -> Result<u64, StorageError>;

    /// 人工确认报警；报警不存在时返回 None
    async fn acknowledge_alarm(
        &self,
        alarm_id: i64,
        user: Option<&str>,
    ) -> Result<Option<AlarmRecord>, StorageError>;

    /// 列出报警（新到旧），可按状态过滤
    async fn list_alarms(
        &self,
        status: Option<AlarmStatus>,
    ) -> Result<Vec<AlarmRecord>, StorageError>;
}
