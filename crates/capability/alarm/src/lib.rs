//! 阈值报警评估
//!
//! 每个采样值按数据点配置判定：
//!
//! - `value > alarm_high` → HIGH；否则 `value < alarm_low` → LOW；否则正常
//! - 越限且该 `(data_point_id, alarm_type)` 无 active 报警：写入一条并返回报警事件
//! - 正常：清除该数据点所有 active 报警
//!
//! 同一数据点的评估由独立的异步锁串行化，"查重 + 写入" 不会交错。
//! 锁表只保留正在评估或等待评估的数据点。

use api_contract::AlarmEvent;
use domain::{AlarmType, DEFAULT_ALARM_LEVEL, DataPoint, DataPointId, NewAlarm};
use ems_storage::{ConfigStore, StorageError};
use ems_telemetry::{record_alarm_cleared, record_alarm_raised};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 报警评估错误。
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("alarm lock table poisoned")]
    Lock,
}

/// 单个采样值的判定结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// 越限，携带阈值
    Crossed(AlarmType, f64),
    Normal,
}

/// 纯函数判定：高限优先于低限。
pub fn classify(point: &DataPoint, value: f64) -> Verdict {
    if let Some(high) = point.alarm_high
        && value > high
    {
        return Verdict::Crossed(AlarmType::High, high);
    }
    if let Some(low) = point.alarm_low
        && value < low
    {
        return Verdict::Crossed(AlarmType::Low, low);
    }
    Verdict::Normal
}

/// 报警描述文本
pub fn alarm_message(point_name: &str, alarm_type: AlarmType, value: f64, threshold: f64) -> String {
    let direction = match alarm_type {
        AlarmType::High => "超过上限",
        AlarmType::Low => "低于下限",
    };
    format!("{point_name} {direction}: {value} (阈值: {threshold})")
}

type PointLock = Arc<tokio::sync::Mutex<()>>;

/// 报警状态机，持有存储句柄与按数据点划分的锁表。
pub struct AlarmEvaluator {
    store: Arc<dyn ConfigStore>,
    locks: Mutex<HashMap<DataPointId, PointLock>>,
}

impl AlarmEvaluator {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, data_point_id: DataPointId) -> Result<PointLock, AlarmError> {
        let mut locks = self.locks.lock().map_err(|_| AlarmError::Lock)?;
        Ok(Arc::clone(locks.entry(data_point_id).or_default()))
    }

    /// 归还锁；表外只剩调用方一个持有者时移除条目。
    fn release(&self, data_point_id: DataPointId, lock: PointLock) {
        if let Ok(mut locks) = self.locks.lock()
            && Arc::strong_count(&lock) == 2
        {
            locks.remove(&data_point_id);
        }
    }

    /// 评估一个采样值。新产生报警时返回待推送的事件。
    ///
    /// 未启用报警或值为空（quality = 0）时不做任何事。
    pub async fn evaluate(
        &self,
        point: &DataPoint,
        value: Option<f64>,
    ) -> Result<Option<AlarmEvent>, AlarmError> {
        let Some(value) = value else {
            return Ok(None);
        };
        if !point.alarm_enabled {
            return Ok(None);
        }

        let lock = self.lock_for(point.id)?;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply(point, value).await
        };
        self.release(point.id, lock);
        outcome
    }

    async fn apply(&self, point: &DataPoint, value: f64) -> Result<Option<AlarmEvent>, AlarmError> {
        match classify(point, value) {
            Verdict::Crossed(alarm_type, threshold) => {
                if let Some(existing) = self.store.find_active_alarm(point.id, alarm_type).await? {
                    debug!(
                        target: "ems.alarm",
                        data_point_id = point.id,
                        alarm_id = existing.id,
                        alarm_type = alarm_type.as_str(),
                        "alarm_already_active"
                    );
                    return Ok(None);
                }
                let message = alarm_message(&point.name, alarm_type, value, threshold);
                let record = self
                    .store
                    .insert_alarm(NewAlarm {
                        data_point_id: point.id,
                        alarm_type,
                        level: DEFAULT_ALARM_LEVEL.to_string(),
                        value,
                        threshold,
                        message: message.clone(),
                    })
                    .await?;
                record_alarm_raised();
                warn!(
                    target: "ems.alarm",
                    data_point_id = point.id,
                    alarm_id = record.id,
                    alarm_type = alarm_type.as_str(),
                    value,
                    threshold,
                    message = %message,
                    "alarm_raised"
                );
                Ok(Some(AlarmEvent {
                    data_point_id: point.id,
                    data_point_name: point.name.clone(),
                    alarm_type: alarm_type.as_str().to_string(),
                    value,
                    threshold,
                    message,
                }))
            }
            Verdict::Normal => {
                let cleared = self.store.clear_active_alarms(point.id).await?;
                if cleared > 0 {
                    record_alarm_cleared(cleared);
                    debug!(
                        target: "ems.alarm",
                        data_point_id = point.id,
                        cleared,
                        "alarm_cleared"
                    );
                }
                Ok(None)
            }
        }
    }
}
