//! 稳定的对外事件契约。
//!
//! 采集引擎只通过这两类事件对外发布数据；WebSocket、消息队列等推送通道
//! 只依赖本 crate 的结构，不直接接触引擎内部类型。

use serde::{Deserialize, Serialize};

/// 实时采样事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEvent {
    pub device_id: i64,
    pub device_name: String,
    pub data_point_id: i64,
    pub data_point_name: String,
    /// 读取失败时为 null
    pub value: Option<f64>,
    /// 0 = 读取失败，1 = 正常
    pub quality: u8,
    /// ISO-8601 时间戳（UTC）
    pub timestamp: String,
}

/// 阈值报警事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub data_point_id: i64,
    pub data_point_name: String,
    /// `HIGH` 或 `LOW`
    pub alarm_type: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// 推送给订阅方的事件封装：`{"type": "data" | "alarm", "data": {...}}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    Data(DataEvent),
    Alarm(AlarmEvent),
}

impl GatewayEvent {
    /// 事件种类名（`data` / `alarm`）。
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Alarm(_) => "alarm",
        }
    }
}
