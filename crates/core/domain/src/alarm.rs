use crate::device::DataPointId;
use chrono::{DateTime, Utc};

/// 阈值报警默认级别。
pub const DEFAULT_ALARM_LEVEL: &str = "WARNING";

/// 报警类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmType {
    High,
    Low,
}

impl AlarmType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

/// 报警状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmStatus {
    Active,
    Cleared,
    Acknowledged,
}

impl AlarmStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cleared => "cleared",
            Self::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "cleared" => Some(Self::Cleared),
            "acknowledged" => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

/// 待写入的新报警。
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarm {
    pub data_point_id: DataPointId,
    pub alarm_type: AlarmType,
    pub level: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// 报警记录。
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRecord {
    pub id: i64,
    pub data_point_id: DataPointId,
    pub alarm_type: AlarmType,
    pub level: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub message: String,
    pub status: AlarmStatus,
    pub ack_time: Option<DateTime<Utc>>,
    pub ack_user: Option<String>,
    pub created_at: DateTime<Utc>,
}
