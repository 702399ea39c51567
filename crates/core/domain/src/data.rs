use chrono::{DateTime, Utc};

/// 采样质量：0 表示读取失败，1 表示读取成功。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Bad = 0,
    Good = 1,
}

impl Quality {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        if value == 0 { Self::Bad } else { Self::Good }
    }

    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }
}

/// 单次读取结果。
///
/// 读取失败时 `value` 为 `None`、`quality` 为 `Bad`，采集轮次继续。
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: Option<f64>,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// 成功采样（时间戳取当前时间）。
    pub fn good(value: f64) -> Self {
        Self {
            value: Some(value),
            quality: Quality::Good,
            timestamp: Utc::now(),
        }
    }

    /// 失败采样（时间戳取当前时间）。
    pub fn bad() -> Self {
        Self {
            value: None,
            quality: Quality::Bad,
            timestamp: Utc::now(),
        }
    }
}
