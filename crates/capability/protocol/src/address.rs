//! 数据点地址解析
//!
//! 把 `(协议, 地址字符串, 数据类型字符串)` 解析为协议原生的读写目标与数值类型：
//!
//! | 协议 | 地址示例 | 类型示例 |
//! |------|----------|----------|
//! | Modbus | `40001` | `holding_int32`、`input`、`coil`、`float32` |
//! | S7 | `DB1.4`、`DB1.DBW4` | `INT`、`REAL`、`BOOL` |
//! | FINS | `DM100`、`CIO20` | `uint16`、`int32` |

use crate::codec::{self, ValueType};
use crate::error::ProtocolError;
use crate::s7::MAX_DB_BYTE_OFFSET;
use crate::types::{MemoryArea, ModbusFunction, RawValue, Selector};
use domain::ProtocolKind;

/// 解析后的数据点地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointAddress {
    Modbus {
        function: ModbusFunction,
        address: u16,
        value_type: ValueType,
    },
    S7 {
        db: u16,
        offset: u32,
        value_type: ValueType,
    },
    Fins {
        area: MemoryArea,
        address: u16,
        value_type: ValueType,
    },
}

impl PointAddress {
    pub fn resolve(
        protocol: ProtocolKind,
        address: &str,
        data_type: &str,
    ) -> Result<Self, ProtocolError> {
        match protocol {
            ProtocolKind::ModbusTcp | ProtocolKind::ModbusRtu | ProtocolKind::ModbusAscii => {
                let (function, value_type) = parse_modbus_type(data_type);
                Ok(Self::Modbus {
                    function,
                    address: parse_number(address)?,
                    value_type,
                })
            }
            ProtocolKind::Siemens => {
                let (db, offset) = parse_s7_address(address)?;
                Ok(Self::S7 {
                    db,
                    offset,
                    value_type: ValueType::parse(data_type).unwrap_or(ValueType::Uint16),
                })
            }
            ProtocolKind::Omron => {
                let (area, address) = parse_fins_address(address)?;
                Ok(Self::Fins {
                    area,
                    address,
                    value_type: ValueType::parse(data_type).unwrap_or(ValueType::Uint16),
                })
            }
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Modbus { value_type, .. }
            | Self::S7 { value_type, .. }
            | Self::Fins { value_type, .. } => *value_type,
        }
    }

    /// 读取该点所需的选择器（32 位类型读 2 个字 / 4 个字节）。
    pub fn read_selector(&self) -> Selector {
        match *self {
            Self::Modbus {
                function,
                address,
                value_type,
            } => Selector::Modbus {
                function,
                address,
                count: if function.is_bit() {
                    1
                } else {
                    value_type.word_count()
                },
            },
            Self::S7 {
                db,
                offset,
                value_type,
            } => Selector::S7 {
                db,
                offset,
                length: value_type.byte_size() as u16,
            },
            Self::Fins {
                area,
                address,
                value_type,
            } => Selector::Fins {
                area,
                address,
                count: value_type.word_count(),
            },
        }
    }

    /// 原始载荷解码为未缩放的工程值。
    pub fn decode(&self, raw: &RawValue) -> Result<f64, ProtocolError> {
        match (self, raw) {
            (Self::Modbus { .. }, RawValue::Bits(bits)) => bits
                .first()
                .map(|bit| f64::from(u8::from(*bit)))
                .ok_or_else(|| ProtocolError::DataParse("empty bit response".to_string())),
            (Self::Modbus { value_type, .. } | Self::Fins { value_type, .. }, RawValue::Words(words)) => {
                codec::decode_words(words, *value_type)
            }
            (Self::S7 { value_type, .. }, RawValue::Bytes(bytes)) => {
                codec::decode_bytes(bytes, 0, *value_type)
            }
            (_, other) => Err(ProtocolError::DataParse(format!(
                "unexpected {} payload for {self:?}",
                other.kind()
            ))),
        }
    }

    /// 写入目标与编码后的载荷。
    ///
    /// Modbus 线圈写单线圈，保持寄存器单字 0x06、多字 0x10，只读数据区拒绝写入；
    /// S7 写入类型宽度的字节；FINS 写入类型宽度的字。
    pub fn encode_write(&self, value: f64) -> Result<(Selector, RawValue), ProtocolError> {
        match *self {
            Self::Modbus {
                function,
                address,
                value_type,
            } => {
                if !function.is_writable() {
                    return Err(ProtocolError::InvalidSelector(format!(
                        "{function:?} at {address} is read-only"
                    )));
                }
                if function.is_bit() {
                    return Ok((
                        Selector::Modbus {
                            function,
                            address,
                            count: 1,
                        },
                        RawValue::Bits(vec![value != 0.0]),
                    ));
                }
                let words = codec::encode_words(value, value_type)?;
                Ok((
                    Selector::Modbus {
                        function,
                        address,
                        count: words.len() as u16,
                    },
                    RawValue::Words(words),
                ))
            }
            Self::S7 {
                db,
                offset,
                value_type,
            } => {
                let bytes = codec::encode_bytes(value, value_type)?;
                Ok((
                    Selector::S7 {
                        db,
                        offset,
                        length: bytes.len() as u16,
                    },
                    RawValue::Bytes(bytes),
                ))
            }
            Self::Fins {
                area,
                address,
                value_type,
            } => {
                let words = codec::encode_words(value, value_type)?;
                Ok((
                    Selector::Fins {
                        area,
                        address,
                        count: words.len() as u16,
                    },
                    RawValue::Words(words),
                ))
            }
        }
    }
}

/// Modbus 数据类型字段同时表达数据区与数值类型。
///
/// 含 `coil` 或 `bool` 为线圈，含 `discrete` 为离散输入，含 `input` 为输入寄存器，
/// 其余为保持寄存器；数值类型取剩余部分，无法识别时为 uint16。
fn parse_modbus_type(data_type: &str) -> (ModbusFunction, ValueType) {
    let lowered = data_type.trim().to_ascii_lowercase();
    if lowered.contains("discrete") {
        return (ModbusFunction::DiscreteInput, ValueType::Bool);
    }
    if lowered.contains("coil") || lowered.contains("bool") {
        return (ModbusFunction::Coil, ValueType::Bool);
    }

    let function = if lowered.contains("input") {
        ModbusFunction::InputRegister
    } else {
        ModbusFunction::HoldingRegister
    };
    let remainder = lowered
        .replace("input", "")
        .replace("holding", "")
        .replace("register", "");
    let value_type = remainder
        .split(|c: char| c == '_' || c == '-' || c == ' ' || c == ':')
        .filter(|part| !part.is_empty())
        .find_map(ValueType::parse)
        .unwrap_or(ValueType::Uint16);
    (function, value_type)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, ProtocolError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidAddress(value.to_string()))
}

/// `DB1.4` / `DB1.DBW4` / `DB1.DBX4.0`（位号忽略，按字节读取）
fn parse_s7_address(address: &str) -> Result<(u16, u32), ProtocolError> {
    let upper = address.trim().to_ascii_uppercase();
    let rest = upper
        .strip_prefix("DB")
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let mut parts = rest.split('.');
    let db = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let offset = parts
        .next()
        .map(|part| part.trim_start_matches(|c: char| c.is_ascii_alphabetic()))
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let offset: u32 = parse_number(offset)?;
    if offset > MAX_DB_BYTE_OFFSET {
        return Err(ProtocolError::InvalidAddress(format!(
            "{address}: byte offset above {MAX_DB_BYTE_OFFSET}"
        )));
    }
    Ok((parse_number(db)?, offset))
}

/// 前导字母为存储区，尾部数字为字地址。
fn parse_fins_address(address: &str) -> Result<(MemoryArea, u16), ProtocolError> {
    let trimmed = address.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| ProtocolError::InvalidAddress(address.to_string()))?;
    let (letters, digits) = trimmed.split_at(split);
    if letters.is_empty() {
        return Err(ProtocolError::InvalidAddress(address.to_string()));
    }
    Ok((MemoryArea::parse(letters)?, parse_number(digits)?))
}
