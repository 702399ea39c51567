//! 存储层数据模型

use chrono::{DateTime, TimeZone, Utc};
use domain::{DataPointId, Quality};

/// 历史采样记录。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub data_point_id: DataPointId,
    pub value: Option<f64>,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

/// UTC 时间转毫秒时间戳（库内统一以 epoch 毫秒存储）。
pub fn to_epoch_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// 毫秒时间戳转 UTC 时间；越界时回落到 epoch 起点。
pub fn from_epoch_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}
