//! SQLite 存储实现
//!
//! 设计要点：
//! - 使用参数化 SQL
//! - 整数列按 i64 读出后收窄，越界视为数据错误
//! - 时间列存 epoch 毫秒

use crate::error::StorageError;
use crate::models::{HistoryRecord, from_epoch_ms, to_epoch_ms};
use crate::traits::{ConfigStore, DEFAULT_ACK_USER};
use chrono::{DateTime, Utc};
use domain::{
    AlarmRecord, AlarmStatus, AlarmType, DataPoint, DataPointId, Device, DeviceId, NewAlarm,
    Quality,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const DEVICE_COLUMNS: &str = "id, name, protocol, connection_type, host, port, serial_port, \
     baud_rate, data_bits, stop_bits, parity, slave_id, rack, slot, timeout, enabled";

const DATA_POINT_COLUMNS: &str = "id, device_id, name, address, data_type, unit, scale, \"offset\", \
     enabled, alarm_enabled, alarm_high, alarm_low";

const ALARM_COLUMNS: &str = "id, data_point_id, alarm_type, alarm_level, value, threshold, \
     message, status, ack_time_ms, ack_user, created_at_ms";

pub struct SqliteConfigStore {
    pub pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库并确保表结构存在
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        crate::connection::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// 写入或覆盖设备配置（按 id）
    pub async fn upsert_device(&self, device: &Device) -> Result<(), StorageError> {
        let timeout = device
            .timeout_ms
            .map(i64::try_from)
            .transpose()
            .map_err(|_| StorageError::new("device timeout out of range"))?;
        sqlx::query(
            "insert or replace into devices \
             (id, name, protocol, connection_type, host, port, serial_port, baud_rate, \
              data_bits, stop_bits, parity, slave_id, rack, slot, timeout, enabled) \
             values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.protocol)
        .bind(&device.connection_type)
        .bind(&device.host)
        .bind(device.port.map(i64::from))
        .bind(&device.serial_port)
        .bind(device.baud_rate.map(i64::from))
        .bind(device.data_bits.map(i64::from))
        .bind(device.stop_bits.map(i64::from))
        .bind(&device.parity)
        .bind(device.slave_id.map(i64::from))
        .bind(device.rack.map(i64::from))
        .bind(device.slot.map(i64::from))
        .bind(timeout)
        .bind(device.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 写入或覆盖数据点配置（按 id）
    pub async fn upsert_data_point(&self, point: &DataPoint) -> Result<(), StorageError> {
        sqlx::query(
            "insert or replace into data_points \
             (id, device_id, name, address, data_type, unit, scale, \"offset\", enabled, \
              alarm_enabled, alarm_high, alarm_low) \
             values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(point.id)
        .bind(point.device_id)
        .bind(&point.name)
        .bind(&point.address)
        .bind(&point.data_type)
        .bind(&point.unit)
        .bind(point.scale)
        .bind(point.offset)
        .bind(point.enabled)
        .bind(point.alarm_enabled)
        .bind(point.alarm_high)
        .bind(point.alarm_low)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_alarm(&self, alarm_id: i64) -> Result<Option<AlarmRecord>, StorageError> {
        let row = sqlx::query(&format!("select {ALARM_COLUMNS} from alarms where id = ?"))
            .bind(alarm_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alarm_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn list_enabled_devices(&self) -> Result<Vec<Device>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {DEVICE_COLUMNS} from devices where enabled = 1 order by id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn get_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError> {
        let row = sqlx::query(&format!("select {DEVICE_COLUMNS} from devices where id = ?"))
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn list_enabled_data_points(
        &self,
        device_id: DeviceId,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {DATA_POINT_COLUMNS} from data_points \
             where device_id = ? and enabled = 1 order by id"
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(data_point_from_row).collect()
    }

    async fn get_data_point(
        &self,
        data_point_id: DataPointId,
    ) -> Result<Option<DataPoint>, StorageError> {
        let row = sqlx::query(&format!(
            "select {DATA_POINT_COLUMNS} from data_points where id = ?"
        ))
        .bind(data_point_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(data_point_from_row).transpose()
    }

    async fn insert_history_sample(
        &self,
        data_point_id: DataPointId,
        value: Option<f64>,
        quality: Quality,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "insert into history_data (data_point_id, value, quality, ts_ms) values (?, ?, ?, ?)",
        )
        .bind(data_point_id)
        .bind(value)
        .bind(i64::from(quality.as_u8()))
        .bind(to_epoch_ms(timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_history_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("delete from history_data where ts_ms < ?")
            .bind(to_epoch_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_history(
        &self,
        data_point_id: DataPointId,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let rows = sqlx::query(
            "select id, data_point_id, value, quality, ts_ms from history_data \
             where data_point_id = ? order by ts_ms desc, id desc limit ?",
        )
        .bind(data_point_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let quality: i64 = row.try_get("quality")?;
            records.push(HistoryRecord {
                id: row.try_get("id")?,
                data_point_id: row.try_get("data_point_id")?,
                value: row.try_get("value")?,
                quality: Quality::from_u8(u8::from(quality != 0)),
                timestamp: from_epoch_ms(row.try_get("ts_ms")?),
            });
        }
        Ok(records)
    }

    async fn find_active_alarm(
        &self,
        data_point_id: DataPointId,
        alarm_type: AlarmType,
    ) -> Result<Option<AlarmRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "select {ALARM_COLUMNS} from alarms \
             where data_point_id = ? and alarm_type = ? and status = 'active' \
             order by id desc limit 1"
        ))
        .bind(data_point_id)
        .bind(alarm_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(alarm_from_row).transpose()
    }

    async fn insert_alarm(&self, alarm: NewAlarm) -> Result<AlarmRecord, StorageError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "insert into alarms \
             (data_point_id, alarm_type, alarm_level, value, threshold, message, status, created_at_ms) \
             values (?, ?, ?, ?, ?, ?, 'active', ?)",
        )
        .bind(alarm.data_point_id)
        .bind(alarm.alarm_type.as_str())
        .bind(&alarm.level)
        .bind(alarm.value)
        .bind(alarm.threshold)
        .bind(&alarm.message)
        .bind(to_epoch_ms(created_at))
        .execute(&self.pool)
        .await?;
        Ok(AlarmRecord {
            id: result.last_insert_rowid(),
            data_point_id: alarm.data_point_id,
            alarm_type: alarm.alarm_type,
            level: alarm.level,
            value: alarm.value,
            threshold: Some(alarm.threshold),
            message: alarm.message,
            status: AlarmStatus::Active,
            ack_time: None,
            ack_user: None,
            created_at: from_epoch_ms(to_epoch_ms(created_at)),
        })
    }

    async fn clear_active_alarms(&self, data_point_id: DataPointId) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "update alarms set status = 'cleared' where data_point_id = ? and status = 'active'",
        )
        .bind(data_point_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn acknowledge_alarm(
        &self,
        alarm_id: i64,
        user: Option<&str>,
    ) -> Result<Option<AlarmRecord>, StorageError> {
        let result = sqlx::query(
            "update alarms set status = 'acknowledged', ack_time_ms = ?, ack_user = ? where id = ?",
        )
        .bind(to_epoch_ms(Utc::now()))
        .bind(user.unwrap_or(DEFAULT_ACK_USER))
        .bind(alarm_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_alarm(alarm_id).await
    }

    async fn list_alarms(
        &self,
        status: Option<AlarmStatus>,
    ) -> Result<Vec<AlarmRecord>, StorageError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "select {ALARM_COLUMNS} from alarms where status = ? order by id desc"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("select {ALARM_COLUMNS} from alarms order by id desc"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(alarm_from_row).collect()
    }
}

fn narrow<T: TryFrom<i64>>(
    row: &SqliteRow,
    column: &'static str,
) -> Result<Option<T>, StorageError> {
    let value: Option<i64> = row.try_get(column)?;
    value
        .map(|raw| {
            T::try_from(raw).map_err(|_| StorageError::new(format!("{column} out of range: {raw}")))
        })
        .transpose()
}

fn device_from_row(row: &SqliteRow) -> Result<Device, StorageError> {
    let connection_type: Option<String> = row.try_get("connection_type")?;
    Ok(Device {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        protocol: row.try_get("protocol")?,
        connection_type: connection_type.unwrap_or_else(|| "tcp".to_string()),
        host: row.try_get("host")?,
        port: narrow(row, "port")?,
        serial_port: row.try_get("serial_port")?,
        baud_rate: narrow(row, "baud_rate")?,
        data_bits: narrow(row, "data_bits")?,
        stop_bits: narrow(row, "stop_bits")?,
        parity: row.try_get("parity")?,
        slave_id: narrow(row, "slave_id")?,
        rack: narrow(row, "rack")?,
        slot: narrow(row, "slot")?,
        timeout_ms: narrow(row, "timeout")?,
        enabled: row.try_get("enabled")?,
    })
}

fn data_point_from_row(row: &SqliteRow) -> Result<DataPoint, StorageError> {
    Ok(DataPoint {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        data_type: row.try_get("data_type")?,
        unit: row.try_get("unit")?,
        scale: row.try_get("scale")?,
        offset: row.try_get("offset")?,
        enabled: row.try_get("enabled")?,
        alarm_enabled: row.try_get("alarm_enabled")?,
        alarm_high: row.try_get("alarm_high")?,
        alarm_low: row.try_get("alarm_low")?,
    })
}

fn alarm_from_row(row: &SqliteRow) -> Result<AlarmRecord, StorageError> {
    let alarm_type: String = row.try_get("alarm_type")?;
    let status: String = row.try_get("status")?;
    let ack_time: Option<i64> = row.try_get("ack_time_ms")?;
    Ok(AlarmRecord {
        id: row.try_get("id")?,
        data_point_id: row.try_get("data_point_id")?,
        alarm_type: AlarmType::parse(&alarm_type)
            .ok_or_else(|| StorageError::new(format!("invalid alarm_type: {alarm_type}")))?,
        level: row.try_get("alarm_level")?,
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        message: row.try_get("message")?,
        status: AlarmStatus::parse(&status)
            .ok_or_else(|| StorageError::new(format!("invalid alarm status: {status}")))?,
        ack_time: ack_time.map(from_epoch_ms),
        ack_user: row.try_get("ack_user")?,
        created_at: from_epoch_ms(row.try_get("created_at_ms")?),
    })
}
