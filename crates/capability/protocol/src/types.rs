//! 协议相关类型定义

use crate::error::ProtocolError;
use std::time::Duration;

/// Modbus 访问的数据区（决定功能码）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// 线圈 (0x01 读 / 0x05 写)
    Coil,
    /// 离散输入 (0x02，只读)
    DiscreteInput,
    /// 保持寄存器 (0x03 读 / 0x06、0x10 写)
    HoldingRegister,
    /// 输入寄存器 (0x04，只读)
    InputRegister,
}

impl ModbusFunction {
    /// 读功能码
    pub fn read_code(self) -> u8 {
        match self {
            Self::Coil => 0x01,
            Self::DiscreteInput => 0x02,
            Self::HoldingRegister => 0x03,
            Self::InputRegister => 0x04,
        }
    }

    pub fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// 离散输入与输入寄存器只读
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }
}

/// 欧姆龙 FINS 存储区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    Cio,
    Wr,
    Hr,
    Ar,
    Dm,
    Em,
}

impl MemoryArea {
    /// 解析存储区名称（大小写不敏感）。
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CIO" => Ok(Self::Cio),
            "WR" => Ok(Self::Wr),
            "HR" => Ok(Self::Hr),
            "AR" => Ok(Self::Ar),
            "DM" => Ok(Self::Dm),
            "EM" => Ok(Self::Em),
            other => Err(ProtocolError::InvalidAddress(format!(
                "unknown memory area: {other}"
            ))),
        }
    }

    /// 字访问的区域代码
    pub fn code(self) -> u8 {
        match self {
            Self::Cio => 0xB0,
            Self::Wr => 0xB1,
            Self::Hr => 0xB2,
            Self::Ar => 0xB3,
            Self::Dm => 0x82,
            Self::Em => 0xA0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cio => "CIO",
            Self::Wr => "WR",
            Self::Hr => "HR",
            Self::Ar => "AR",
            Self::Dm => "DM",
            Self::Em => "EM",
        }
    }
}

/// 协议原生的读写目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Modbus：数据区 + 起始地址 + 数量（线圈为位数，寄存器为字数）
    Modbus {
        function: ModbusFunction,
        address: u16,
        count: u16,
    },
    /// S7：DB 块号 + 字节偏移 + 字节长度
    S7 { db: u16, offset: u32, length: u16 },
    /// FINS：存储区 + 字地址 + 字数
    Fins {
        area: MemoryArea,
        address: u16,
        count: u16,
    },
}

/// 协议原始载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bits(_) => "bits",
            Self::Words(_) => "words",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// 把单次 I/O 包在超时里，超时转换为 [`ProtocolError::Timeout`]。
pub async fn with_timeout<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = Result<T, ProtocolError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout(format!(
            "{op} exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}
