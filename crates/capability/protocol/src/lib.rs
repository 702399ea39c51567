//! # 协议通信能力模块
//!
//! 提供多协议的设备读写能力，支持：
//! - **Modbus**：TCP / RTU（tokio-modbus）与 ASCII（自行组帧）
//! - **西门子 S7**：ISO-on-TCP，按 DB 块字节偏移读写
//! - **欧姆龙 FINS**：TCP / 串口，按存储区字地址读写
//!
//! ## 架构设计
//!
//! ```text
//! DataPoint (address + data_type)
//!       │
//!       ▼
//! PointAddress::resolve ──► Selector ──► ProtocolClient::read
//!       │                                       │
//!       │                                       ▼
//!       └──────────── decode ◄──────────── RawValue
//!                        │
//!                        ▼
//!                  f64 (未缩放)
//! ```
//!
//! 每个客户端只持有一条连接；是否重连由上层的设备管理器决定。
//!
//! ## 地址格式
//!
//! - Modbus：`"40001"`，数据类型 `holding_int32`、`input`、`coil`、`float32` 等
//! - S7：`"DB1.4"`，数据类型 `BOOL`/`BYTE`/`INT`/`WORD`/`DINT`/`DWORD`/`REAL`
//! - FINS：`"DM100"`，存储区 `CIO`/`WR`/`HR`/`AR`/`DM`/`EM`

mod address;
mod client;
pub mod codec;
mod error;
mod fins;
mod modbus;
pub mod modbus_ascii;
mod s7;
mod serial;
mod types;

pub use address::PointAddress;
pub use client::ProtocolClient;
pub use codec::ValueType;
pub use error::ProtocolError;
pub use fins::{
    build_fins_command, parse_fins_response, FinsClient, FinsTransport, DEFAULT_FINS_PORT,
    FINS_COMMAND_LEN, FINS_RESPONSE_HEADER_LEN, FINS_RESPONSE_TIMEOUT,
};
pub use modbus::{ModbusClient, ModbusConfig, ModbusTransport, DEFAULT_MODBUS_TCP_PORT};
pub use s7::{S7Client, S7Config, DEFAULT_S7_PORT, DEFAULT_S7_TIMEOUT, MAX_DB_BYTE_OFFSET};
pub use serial::SerialSettings;
pub use types::*;
