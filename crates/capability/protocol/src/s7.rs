//! 西门子 S7 客户端（ISO-on-TCP）
//!
//! 报文层次：TPKT(4) → COTP(3，数据帧) → S7 头(10/12) → 参数 → 数据。
//!
//! 连接流程：
//! 1. TCP 连接 102 端口
//! 2. COTP 连接请求（远端 TSAP 由 rack/slot 决定），等待 CC
//! 3. Setup Communication 协商 PDU 大小
//!
//! 之后只使用 Read Var / Write Var 访问 DB 块字节区。

use crate::client::ProtocolClient;
use crate::error::ProtocolError;
use crate::types::{with_timeout, RawValue, Selector};
use async_trait::async_trait;
use domain::ProtocolKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const DEFAULT_S7_PORT: u16 = 102;
pub const DEFAULT_S7_TIMEOUT: Duration = Duration::from_millis(3000);
/// any-pointer 位地址为 24 位，可寻址的最大字节偏移
pub const MAX_DB_BYTE_OFFSET: u32 = 0x1F_FFFF;
const MAX_RACK: u16 = 7;
const MAX_SLOT: u16 = 31;

const REQUESTED_PDU_SIZE: u16 = 480;
const TPKT_HEADER_LEN: usize = 4;
const COTP_DATA_HEADER: [u8; 3] = [0x02, 0xF0, 0x80];
/// 读响应中数据区之前的固定长度（TPKT+COTP+S7 应答头+参数+数据项头）
const READ_RESPONSE_OVERHEAD: u16 = 18;
const WRITE_REQUEST_OVERHEAD: u16 = 28;

/// S7 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Config {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub timeout: Duration,
}

/// S7 协议客户端
pub struct S7Client {
    config: S7Config,
    stream: Option<TcpStream>,
    pdu_size: u16,
    pdu_ref: u16,
}

impl S7Client {
    pub fn new(config: S7Config) -> Self {
        Self {
            config,
            stream: None,
            pdu_size: REQUESTED_PDU_SIZE,
            pdu_ref: 0,
        }
    }

    /// 协商后的 PDU 大小
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    async fn handshake(&mut self, mut stream: TcpStream) -> Result<TcpStream, ProtocolError> {
        stream
            .write_all(&connection_request(self.config.rack, self.config.slot)?)
            .await?;
        let confirm = read_tpkt(&mut stream).await?;
        if confirm.get(5) != Some(&0xD0) {
            return Err(ProtocolError::Connection(format!(
                "cotp connection refused (rack {}, slot {})",
                self.config.rack, self.config.slot
            )));
        }

        let pdu_ref = self.next_ref();
        stream
            .write_all(&setup_communication_request(pdu_ref, REQUESTED_PDU_SIZE))
            .await?;
        let setup = read_tpkt(&mut stream).await?;
        check_ack_header(&setup)?;
        let negotiated = setup
            .get(25..27)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .ok_or_else(|| ProtocolError::Framing("short setup communication reply".to_string()))?;
        if negotiated <= WRITE_REQUEST_OVERHEAD {
            return Err(ProtocolError::Framing(format!(
                "negotiated pdu size too small: {negotiated}"
            )));
        }
        self.pdu_size = negotiated;
        Ok(stream)
    }

    async fn read_area(&mut self, db: u16, offset: u32, length: u16) -> Result<Vec<u8>, ProtocolError> {
        let max_chunk = self.pdu_size - READ_RESPONSE_OVERHEAD;
        let mut data = Vec::with_capacity(length as usize);
        let mut done: u16 = 0;
        while done < length {
            let chunk = (length - done).min(max_chunk);
            let pdu_ref = self.next_ref();
            let request = read_var_request(pdu_ref, db, offset + u32::from(done), chunk);
            let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
            stream.write_all(&request).await?;
            let response = read_tpkt(stream).await?;
            data.extend_from_slice(&parse_read_var_response(&response)?);
            done += chunk;
        }
        data.truncate(length as usize);
        Ok(data)
    }

    async fn write_area(&mut self, db: u16, offset: u32, data: &[u8]) -> Result<(), ProtocolError> {
        let max_chunk = (self.pdu_size - WRITE_REQUEST_OVERHEAD) as usize;
        for (index, chunk) in data.chunks(max_chunk).enumerate() {
            let pdu_ref = self.next_ref();
            let chunk_offset = offset + (index * max_chunk) as u32;
            let request = write_var_request(pdu_ref, db, chunk_offset, chunk);
            let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
            stream.write_all(&request).await?;
            let response = read_tpkt(stream).await?;
            parse_write_var_response(&response)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolClient for S7Client {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Siemens
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.stream.is_some() {
            return Ok(());
        }
        remote_tsap(self.config.rack, self.config.slot)?;
        let host = self.config.host.clone();
        let port = self.config.port;
        let timeout = self.config.timeout;

        let stream = with_timeout(timeout, "s7 connect", async {
            TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| ProtocolError::Connection(format!("{host}:{port}: {e}")))
        })
        .await?;
        let stream = with_timeout(timeout, "s7 handshake", self.handshake(stream)).await?;
        self.stream = Some(stream);

        info!(
            target: "ems.protocol",
            host = %self.config.host,
            rack = self.config.rack,
            slot = self.config.slot,
            pdu_size = self.pdu_size,
            "s7_connected"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Err(err) = stream.shutdown().await {
            warn!(target: "ems.protocol", error = %err, "s7_disconnect_failed");
            return Err(ProtocolError::Io(err));
        }
        Ok(())
    }

    async fn read(&mut self, selector: &Selector) -> Result<RawValue, ProtocolError> {
        let Selector::S7 { db, offset, length } = *selector else {
            return Err(ProtocolError::InvalidSelector(format!(
                "s7 client cannot read {selector:?}"
            )));
        };
        check_span(offset, length)?;
        if self.stream.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let timeout = self.config.timeout;
        let data = with_timeout(timeout, "s7 read", self.read_area(db, offset, length)).await?;
        debug!(target: "ems.protocol", db, offset, length, data = ?data, "s7_read");
        Ok(RawValue::Bytes(data))
    }

    async fn write(&mut self, selector: &Selector, value: &RawValue) -> Result<(), ProtocolError> {
        let Selector::S7 { db, offset, .. } = *selector else {
            return Err(ProtocolError::InvalidSelector(format!(
                "s7 client cannot write {selector:?}"
            )));
        };
        let RawValue::Bytes(data) = value else {
            return Err(ProtocolError::InvalidSelector(format!(
                "s7 writes take bytes, got {}",
                value.kind()
            )));
        };
        let length = u16::try_from(data.len())
            .map_err(|_| ProtocolError::InvalidSelector(format!("s7 write of {} bytes", data.len())))?;
        check_span(offset, length)?;
        if self.stream.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let timeout = self.config.timeout;
        with_timeout(timeout, "s7 write", self.write_area(db, offset, data)).await
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// 读取一个完整 TPKT 帧（含 4 字节头）
pub async fn read_tpkt<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; TPKT_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    if header[0] != 0x03 {
        return Err(ProtocolError::Framing(format!(
            "bad tpkt version: 0x{:02X}",
            header[0]
        )));
    }
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if length < TPKT_HEADER_LEN + 3 {
        return Err(ProtocolError::Framing(format!("tpkt length too small: {length}")));
    }
    let mut frame = vec![0u8; length];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[TPKT_HEADER_LEN..]).await?;
    Ok(frame)
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + TPKT_HEADER_LEN) as u16;
    let mut frame = Vec::with_capacity(length as usize);
    frame.extend_from_slice(&[0x03, 0x00]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// 远端 TSAP 低字节：rack*0x20+slot，rack 0..=7，slot 0..=31
fn remote_tsap(rack: u16, slot: u16) -> Result<u8, ProtocolError> {
    if rack > MAX_RACK || slot > MAX_SLOT {
        return Err(ProtocolError::ConfigParse(format!(
            "s7 rack {rack} / slot {slot} out of range (rack <= {MAX_RACK}, slot <= {MAX_SLOT})"
        )));
    }
    Ok((rack * 0x20 + slot) as u8)
}

/// 访问区间末字节必须落在 24 位位地址可达范围内
fn check_span(offset: u32, length: u16) -> Result<(), ProtocolError> {
    let last = u64::from(offset) + u64::from(length.max(1)) - 1;
    if last > u64::from(MAX_DB_BYTE_OFFSET) {
        return Err(ProtocolError::InvalidSelector(format!(
            "s7 byte range {offset}+{length} exceeds offset {MAX_DB_BYTE_OFFSET}"
        )));
    }
    Ok(())
}

/// COTP 连接请求，远端 TSAP = 0x01(PG) / rack*0x20+slot
pub fn connection_request(rack: u16, slot: u16) -> Result<Vec<u8>, ProtocolError> {
    let remote_tsap = remote_tsap(rack, slot)?;
    Ok(tpkt(&[
        0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, // CR, dst ref, src ref, class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // 本地 TSAP
        0xC2, 0x02, 0x01, remote_tsap, // 远端 TSAP
    ]))
}

fn s7_job_header(pdu_ref: u16, param_len: u16, data_len: u16) -> Vec<u8> {
    let mut header = Vec::with_capacity(13);
    header.extend_from_slice(&COTP_DATA_HEADER);
    header.extend_from_slice(&[0x32, 0x01, 0x00, 0x00]);
    header.extend_from_slice(&pdu_ref.to_be_bytes());
    header.extend_from_slice(&param_len.to_be_bytes());
    header.extend_from_slice(&data_len.to_be_bytes());
    header
}

pub fn setup_communication_request(pdu_ref: u16, pdu_size: u16) -> Vec<u8> {
    let mut payload = s7_job_header(pdu_ref, 8, 0);
    payload.extend_from_slice(&[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01]);
    payload.extend_from_slice(&pdu_size.to_be_bytes());
    tpkt(&payload)
}

/// DB 区 any-pointer 参数项，长度以字节计，地址为位地址
fn db_item(db: u16, offset: u32, length: u16) -> [u8; 12] {
    let bit_address = (offset & MAX_DB_BYTE_OFFSET) << 3;
    let len = length.to_be_bytes();
    let db = db.to_be_bytes();
    [
        0x12,
        0x0A,
        0x10,
        0x02, // transport size: BYTE
        len[0],
        len[1],
        db[0],
        db[1],
        0x84, // area: DB
        (bit_address >> 16) as u8,
        (bit_address >> 8) as u8,
        bit_address as u8,
    ]
}

pub fn read_var_request(pdu_ref: u16, db: u16, offset: u32, length: u16) -> Vec<u8> {
    let mut payload = s7_job_header(pdu_ref, 14, 0);
    payload.extend_from_slice(&[0x04, 0x01]);
    payload.extend_from_slice(&db_item(db, offset, length));
    tpkt(&payload)
}

pub fn write_var_request(pdu_ref: u16, db: u16, offset: u32, data: &[u8]) -> Vec<u8> {
    let length = data.len() as u16;
    let mut payload = s7_job_header(pdu_ref, 14, 4 + length);
    payload.extend_from_slice(&[0x05, 0x01]);
    payload.extend_from_slice(&db_item(db, offset, length));
    payload.extend_from_slice(&[0x00, 0x04]);
    payload.extend_from_slice(&(length * 8).to_be_bytes());
    payload.extend_from_slice(data);
    tpkt(&payload)
}

/// 校验应答头：协议 ID 0x32、ROSCTR 0x03（Ack_Data），错误类/码为 0
fn check_ack_header(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < 19 || frame[7] != 0x32 {
        return Err(ProtocolError::Framing(format!(
            "not an s7 ack frame ({} bytes)",
            frame.len()
        )));
    }
    if frame[8] != 0x03 {
        return Err(ProtocolError::Framing(format!(
            "unexpected s7 rosctr: 0x{:02X}",
            frame[8]
        )));
    }
    let (class, code) = (frame[17], frame[18]);
    if class != 0 || code != 0 {
        return Err(ProtocolError::Framing(format!(
            "s7 error class 0x{class:02X} code 0x{code:02X}"
        )));
    }
    Ok(())
}

fn item_error(code: u8) -> ProtocolError {
    let reason = match code {
        0x01 => "hardware fault",
        0x03 => "access denied",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "unknown item error",
    };
    ProtocolError::Framing(format!("s7 item error 0x{code:02X}: {reason}"))
}

pub fn parse_read_var_response(frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    check_ack_header(frame)?;
    let header = frame
        .get(21..25)
        .ok_or_else(|| ProtocolError::Framing("short read var reply".to_string()))?;
    if header[0] != 0xFF {
        return Err(item_error(header[0]));
    }
    let size = u16::from_be_bytes([header[2], header[3]]) as usize;
    // 0x03/0x04/0x05 的长度单位为位
    let byte_len = match header[1] {
        0x03 | 0x04 | 0x05 => size.div_ceil(8),
        _ => size,
    };
    frame
        .get(25..25 + byte_len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ProtocolError::Framing("read var data truncated".to_string()))
}

pub fn parse_write_var_response(frame: &[u8]) -> Result<(), ProtocolError> {
    check_ack_header(frame)?;
    match frame.get(21) {
        Some(0xFF) => Ok(()),
        Some(code) => Err(item_error(*code)),
        None => Err(ProtocolError::Framing("short write var reply".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn ack_frame(params: &[u8], data: &[u8]) -> Vec<u8> {
        let mut payload = COTP_DATA_HEADER.to_vec();
        payload.extend_from_slice(&[0x32, 0x03, 0x00, 0x00, 0x00, 0x01]);
        payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
        payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(params);
        payload.extend_from_slice(data);
        tpkt(&payload)
    }

    #[test]
    fn connection_request_encodes_rack_and_slot() {
        let frame = connection_request(0, 2).expect("frame");
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 0x16]);
        assert_eq!(frame[21], 0x02);
        assert_eq!(connection_request(1, 3).expect("frame")[21], 0x23);
        assert_eq!(connection_request(7, 31).expect("frame")[21], 0xFF);
    }

    #[test]
    fn rack_and_slot_out_of_range_are_rejected() {
        for (rack, slot) in [(8, 0), (0, 32), (40, 1)] {
            let err = connection_request(rack, slot).expect_err("should fail");
            assert!(matches!(err, ProtocolError::ConfigParse(_)));
        }
    }

    #[test]
    fn byte_range_must_fit_the_bit_address() {
        assert!(check_span(MAX_DB_BYTE_OFFSET - 3, 4).is_ok());
        assert!(check_span(MAX_DB_BYTE_OFFSET - 2, 4).is_err());
        assert!(check_span(600_000_000, 2).is_err());

        // 最大偏移的位地址占满 24 位
        let frame = read_var_request(1, 1, MAX_DB_BYTE_OFFSET, 1);
        assert_eq!(&frame[28..31], &[0xFF, 0xFF, 0xF8]);
    }

    #[test]
    fn read_request_uses_bit_address() {
        let frame = read_var_request(7, 1, 4, 2);
        assert_eq!(frame.len(), 31);
        assert_eq!(&frame[11..13], &[0x00, 0x07]);
        // 长度 2 字节，DB1，区域 0x84，位地址 32
        assert_eq!(&frame[23..31], &[0x00, 0x02, 0x00, 0x01, 0x84, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn write_request_carries_bit_length_and_data() {
        let frame = write_var_request(1, 2, 0, &[0x12, 0x34]);
        assert_eq!(frame.len(), 37);
        assert_eq!(&frame[31..37], &[0x00, 0x04, 0x00, 0x10, 0x12, 0x34]);
    }

    #[test]
    fn parses_read_reply_data() {
        let frame = ack_frame(&[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x20, 0x42, 0x48, 0x00, 0x00]);
        assert_eq!(
            parse_read_var_response(&frame).expect("parse"),
            vec![0x42, 0x48, 0x00, 0x00]
        );
    }

    #[test]
    fn read_reply_item_error_is_reported() {
        let frame = ack_frame(&[0x04, 0x01], &[0x0A, 0x00, 0x00, 0x00]);
        let err = parse_read_var_response(&frame).expect_err("should fail");
        assert!(err.to_string().contains("object does not exist"));
    }

    #[tokio::test]
    async fn connect_and_read_against_fake_plc() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let plc = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_tpkt(&mut socket).await.expect("cr");
            assert_eq!(request[5], 0xE0);
            socket
                .write_all(&tpkt(&[0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00]))
                .await
                .expect("cc");

            read_tpkt(&mut socket).await.expect("setup");
            let setup = ack_frame(&[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0], &[]);
            socket.write_all(&setup).await.expect("setup reply");

            let read = read_tpkt(&mut socket).await.expect("read var");
            assert_eq!(read[17], 0x04);
            let reply = ack_frame(&[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x10, 0xFF, 0x9C]);
            socket.write_all(&reply).await.expect("read reply");
        });

        let mut client = S7Client::new(S7Config {
            host: "127.0.0.1".to_string(),
            port,
            rack: 0,
            slot: 1,
            timeout: Duration::from_millis(1000),
        });
        client.connect().await.expect("connect");
        assert!(client.is_connected());
        assert_eq!(client.pdu_size(), 240);

        let raw = client
            .read(&Selector::S7 { db: 1, offset: 4, length: 2 })
            .await
            .expect("read");
        assert_eq!(raw, RawValue::Bytes(vec![0xFF, 0x9C]));

        plc.await.expect("plc task");
        client.disconnect().await.expect("disconnect");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn read_before_connect_is_rejected() {
        let mut client = S7Client::new(S7Config {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_S7_PORT,
            rack: 0,
            slot: 1,
            timeout: DEFAULT_S7_TIMEOUT,
        });
        let err = client
            .read(&Selector::S7 { db: 1, offset: 0, length: 2 })
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProtocolError::NotConnected));
    }
}
