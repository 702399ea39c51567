//! 网关领域模型：设备、数据点、采样与报警。
//!
//! 这些类型由配置存储产出、被采集引擎只读使用；
//! 协议解析（地址、数据类型）在 `ems-protocol` 中完成。

pub mod alarm;
pub mod data;
pub mod device;

pub use alarm::{AlarmRecord, AlarmStatus, AlarmType, NewAlarm, DEFAULT_ALARM_LEVEL};
pub use data::{Quality, Sample};
pub use device::{ConnectionType, DataPoint, DataPointId, Device, DeviceId, ProtocolKind};
