//! 串口链路参数

use crate::error::ProtocolError;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// 串口参数（RTU、ASCII、FINS 串口共用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// `none` / `even` / `odd`
    pub parity: String,
}

impl SerialSettings {
    /// 打开串口。
    pub fn open(&self) -> Result<SerialStream, ProtocolError> {
        tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(self.parse_data_bits()?)
            .stop_bits(self.parse_stop_bits()?)
            .parity(self.parse_parity()?)
            .open_native_async()
            .map_err(|e| ProtocolError::Connection(format!("{}: {e}", self.path)))
    }

    fn parse_data_bits(&self) -> Result<DataBits, ProtocolError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ProtocolError::ConfigParse(format!(
                "unsupported data bits: {other}"
            ))),
        }
    }

    fn parse_stop_bits(&self) -> Result<StopBits, ProtocolError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ProtocolError::ConfigParse(format!(
                "unsupported stop bits: {other}"
            ))),
        }
    }

    fn parse_parity(&self) -> Result<Parity, ProtocolError> {
        match self.parity.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            other => Err(ProtocolError::ConfigParse(format!(
                "unsupported parity: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(data_bits: u8, stop_bits: u8, parity: &str) -> SerialSettings {
        SerialSettings {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits,
            stop_bits,
            parity: parity.to_string(),
        }
    }

    #[test]
    fn parses_line_settings() {
        let s = settings(7, 2, "Even");
        assert_eq!(s.parse_data_bits().expect("bits"), DataBits::Seven);
        assert_eq!(s.parse_stop_bits().expect("stop"), StopBits::Two);
        assert_eq!(s.parse_parity().expect("parity"), Parity::Even);
    }

    #[test]
    fn rejects_invalid_line_settings() {
        assert!(settings(9, 1, "none").parse_data_bits().is_err());
        assert!(settings(8, 3, "none").parse_stop_bits().is_err());
        assert!(settings(8, 1, "mark").parse_parity().is_err());
    }
}
