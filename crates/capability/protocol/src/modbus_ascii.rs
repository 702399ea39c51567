//! Modbus ASCII 帧
//!
//! 帧格式：`:` + 十六进制(从站地址 + PDU + LRC) + `\r\n`，
//! LRC 为从站地址与 PDU 字节和的二进制补码。PDU 与 RTU/TCP 完全一致。

use crate::error::ProtocolError;
use crate::types::ModbusFunction;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

const MAX_FRAME_LEN: usize = 513;

/// 纵向冗余校验
pub fn lrc(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
        .wrapping_neg()
}

/// 组帧：返回含起始符与 CRLF 的完整 ASCII 帧。
pub fn encode_frame(slave: u8, pdu: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(pdu.len() + 2);
    body.push(slave);
    body.extend_from_slice(pdu);
    body.push(lrc(&body));

    let mut frame = Vec::with_capacity(body.len() * 2 + 3);
    frame.push(b':');
    for byte in body {
        frame.extend_from_slice(format!("{byte:02X}").as_bytes());
    }
    frame.extend_from_slice(b"\r\n");
    frame
}

/// 拆帧并校验 LRC，返回 `(从站地址, PDU)`。
pub fn decode_frame(frame: &[u8]) -> Result<(u8, Vec<u8>), ProtocolError> {
    let mut end = frame.len();
    while end > 0 && matches!(frame[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    let hex = frame[..end]
        .strip_prefix(b":")
        .ok_or_else(|| ProtocolError::Framing("missing ':' start".to_string()))?;
    if hex.len() % 2 != 0 || hex.len() < 6 {
        return Err(ProtocolError::Framing(format!(
            "bad ascii frame length: {}",
            hex.len()
        )));
    }

    let bytes = hex
        .chunks_exact(2)
        .map(|pair| Some(hex_value(pair[0])? << 4 | hex_value(pair[1])?))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| ProtocolError::Framing("invalid hex digit".to_string()))?;

    let (body, checksum) = bytes.split_at(bytes.len() - 1);
    if lrc(body) != checksum[0] {
        return Err(ProtocolError::Framing(format!(
            "lrc mismatch: expected {:02X}, got {:02X}",
            lrc(body),
            checksum[0]
        )));
    }
    Ok((body[0], body[1..].to_vec()))
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

/// 基于 ASCII 帧的 Modbus 主站链路
pub struct AsciiLink<T> {
    stream: BufReader<T>,
    slave: u8,
}

impl<T> AsciiLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T, slave: u8) -> Self {
        Self {
            stream: BufReader::new(stream),
            slave,
        }
    }

    pub async fn read(
        &mut self,
        function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<AsciiResponse, ProtocolError> {
        let mut pdu = vec![function.read_code()];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        let response = self.request(&pdu).await?;

        let byte_count = *response
            .get(1)
            .ok_or_else(|| ProtocolError::Framing("truncated read response".to_string()))?
            as usize;
        let data = response
            .get(2..2 + byte_count)
            .ok_or_else(|| ProtocolError::Framing("short read response".to_string()))?;

        if function.is_bit() {
            let bits = (0..count as usize)
                .map(|i| data.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
                .collect();
            Ok(AsciiResponse::Bits(bits))
        } else {
            Ok(AsciiResponse::Words(crate::codec::bytes_to_words(data)))
        }
    }

    pub async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), ProtocolError> {
        let mut pdu = vec![0x05];
        pdu.extend_from_slice(&address.to_be_bytes());
        let state: u16 = if value { 0xFF00 } else { 0x0000 };
        pdu.extend_from_slice(&state.to_be_bytes());
        self.request(&pdu).await.map(|_| ())
    }

    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ProtocolError> {
        let mut pdu = vec![0x06];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        self.request(&pdu).await.map(|_| ())
    }

    pub async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError> {
        let mut pdu = vec![0x10];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
        pdu.push((values.len() * 2) as u8);
        pdu.extend_from_slice(&crate::codec::words_to_bytes(values));
        self.request(&pdu).await.map(|_| ())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }

    async fn request(&mut self, pdu: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let frame = encode_frame(self.slave, pdu);
        self.stream.get_mut().write_all(&frame).await?;
        self.stream.get_mut().flush().await?;

        let mut line = Vec::new();
        let read = self.stream.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Err(ProtocolError::Connection("serial link closed".to_string()));
        }
        if line.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::Framing("ascii frame too long".to_string()));
        }

        let (slave, response) = decode_frame(&line)?;
        if slave != self.slave {
            return Err(ProtocolError::Framing(format!(
                "response from slave {slave}, expected {}",
                self.slave
            )));
        }
        let function = *response
            .first()
            .ok_or_else(|| ProtocolError::Framing("empty pdu".to_string()))?;
        if function & 0x80 != 0 {
            let code = response.get(1).copied().unwrap_or_default();
            return Err(ProtocolError::Exception(format!(
                "function 0x{:02X} exception code 0x{code:02X}",
                function & 0x7F
            )));
        }
        if function != pdu[0] {
            return Err(ProtocolError::Framing(format!(
                "function mismatch: sent 0x{:02X}, got 0x{function:02X}",
                pdu[0]
            )));
        }
        Ok(response)
    }
}

/// ASCII 读响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsciiResponse {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}
