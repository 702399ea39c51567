//! 数值编解码
//!
//! 原始载荷（寄存器字序列 / 字节缓冲）与工程值之间的纯函数映射。
//! 多字类型一律按大端拼接：高位字在前，字内高字节在前。

use crate::error::ProtocolError;

/// 数据点的数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
}

impl ValueType {
    /// 解析类型名（大小写不敏感），同时接受 S7 风格名称（INT/DINT/WORD/DWORD/REAL）。
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" | "bit" => Some(Self::Bool),
            "byte" | "uint8" => Some(Self::Byte),
            "int" | "int16" | "short" => Some(Self::Int16),
            "uint16" | "word" | "ushort" => Some(Self::Uint16),
            "dint" | "int32" | "long" => Some(Self::Int32),
            "uint32" | "dword" | "udint" => Some(Self::Uint32),
            "real" | "float" | "float32" => Some(Self::Float32),
            _ => None,
        }
    }

    /// 占用的 16 位寄存器数
    pub fn word_count(self) -> u16 {
        match self {
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            _ => 1,
        }
    }

    /// 占用的字节数（S7 类型宽度）
    pub fn byte_size(self) -> usize {
        match self {
            Self::Bool | Self::Byte => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
        }
    }
}

/// 寄存器字序列解码为工程值（未缩放）。
pub fn decode_words(words: &[u16], value_type: ValueType) -> Result<f64, ProtocolError> {
    let needed = value_type.word_count() as usize;
    if words.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {needed} registers for {}, got {}",
            value_type.as_str(),
            words.len()
        )));
    }

    let value = match value_type {
        ValueType::Bool => f64::from(u8::from(words[0] != 0)),
        ValueType::Byte => f64::from(words[0] & 0x00FF),
        ValueType::Int16 => f64::from(words[0] as i16),
        ValueType::Uint16 => f64::from(words[0]),
        ValueType::Int32 => f64::from(join_words(words[0], words[1]) as i32),
        ValueType::Uint32 => f64::from(join_words(words[0], words[1])),
        ValueType::Float32 => f64::from(f32::from_bits(join_words(words[0], words[1]))),
    };

    Ok(value)
}

/// 工程值编码为寄存器字序列。整数类型向零截断，越界报错。
pub fn encode_words(value: f64, value_type: ValueType) -> Result<Vec<u16>, ProtocolError> {
    let words = match value_type {
        ValueType::Bool => vec![u16::from(value != 0.0)],
        ValueType::Byte => vec![u16::from(to_integer::<u8>(value, value_type)?)],
        ValueType::Int16 => vec![to_integer::<i16>(value, value_type)? as u16],
        ValueType::Uint16 => vec![to_integer::<u16>(value, value_type)?],
        ValueType::Int32 => split_words(to_integer::<i32>(value, value_type)? as u32).to_vec(),
        ValueType::Uint32 => split_words(to_integer::<u32>(value, value_type)?).to_vec(),
        ValueType::Float32 => split_words((value as f32).to_bits()).to_vec(),
    };
    Ok(words)
}

/// 从字节缓冲的 `offset` 处解码（S7 DB 数据）。BOOL 取该字节的 bit 0。
pub fn decode_bytes(
    buffer: &[u8],
    offset: usize,
    value_type: ValueType,
) -> Result<f64, ProtocolError> {
    let size = value_type.byte_size();
    let bytes = buffer.get(offset..offset + size).ok_or_else(|| {
        ProtocolError::DataParse(format!(
            "buffer too short for {} at offset {offset}: {} bytes",
            value_type.as_str(),
            buffer.len()
        ))
    })?;

    let value = match value_type {
        ValueType::Bool => f64::from(bytes[0] & 0x01),
        ValueType::Byte => f64::from(bytes[0]),
        ValueType::Int16 => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        ValueType::Uint16 => f64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        ValueType::Int32 => f64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ValueType::Uint32 => {
            f64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        ValueType::Float32 => {
            f64::from(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    };

    Ok(value)
}

/// 工程值编码为类型宽度的大端字节缓冲。
pub fn encode_bytes(value: f64, value_type: ValueType) -> Result<Vec<u8>, ProtocolError> {
    let bytes = match value_type {
        ValueType::Bool => vec![u8::from(value != 0.0)],
        ValueType::Byte => vec![to_integer::<u8>(value, value_type)?],
        ValueType::Int16 => to_integer::<i16>(value, value_type)?.to_be_bytes().to_vec(),
        ValueType::Uint16 => to_integer::<u16>(value, value_type)?.to_be_bytes().to_vec(),
        ValueType::Int32 => to_integer::<i32>(value, value_type)?.to_be_bytes().to_vec(),
        ValueType::Uint32 => to_integer::<u32>(value, value_type)?.to_be_bytes().to_vec(),
        ValueType::Float32 => (value as f32).to_be_bytes().to_vec(),
    };
    Ok(bytes)
}

/// 大端字节流转寄存器字（尾部奇数字节丢弃）。
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

/// 应用缩放与偏移：`raw * scale + offset`。
pub fn apply_scale(raw: f64, scale: f64, offset: f64) -> f64 {
    raw * scale + offset
}

fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn split_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

fn to_integer<T>(value: f64, value_type: ValueType) -> Result<T, ProtocolError>
where
    T: TryFrom<i64>,
{
    if !value.is_finite() {
        return Err(ProtocolError::DataParse(format!(
            "cannot encode {value} as {}",
            value_type.as_str()
        )));
    }
    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return Err(out_of_range(value, value_type));
    }
    T::try_from(truncated as i64).map_err(|_| out_of_range(value, value_type))
}

fn out_of_range(value: f64, value_type: ValueType) -> ProtocolError {
    ProtocolError::DataParse(format!(
        "value {value} out of range for {}",
        value_type.as_str()
    ))
}
