//! 欧姆龙 FINS 客户端（TCP / 串口）
//!
//! 命令帧为固定 34 字节头 + 写入载荷：
//!
//! | 偏移 | 内容 |
//! |------|------|
//! | 0..4 | `FINS` 魔数 |
//! | 10..12 | 命令码 `01 01` 读 / `01 02` 写 |
//! | 12 | 存储区代码 |
//! | 13..15 | 字地址（大端） |
//! | 15..17 | 字数（大端） |
//!
//! 接收由后台任务写入累积缓冲区；读写操作在缓冲区收到任意字节后即视为响应完整，
//! 2000ms 内无数据则超时。响应跳过 14 字节头，其余按大端字解码。

use crate::client::ProtocolClient;
use crate::codec;
use crate::error::ProtocolError;
use crate::serial::SerialSettings;
use crate::types::{with_timeout, MemoryArea, RawValue, Selector};
use async_trait::async_trait;
use domain::ProtocolKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const FINS_COMMAND_LEN: usize = 34;
pub const FINS_RESPONSE_HEADER_LEN: usize = 14;
pub const FINS_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_FINS_PORT: u16 = 9600;

/// FINS 传输方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinsTransport {
    Tcp { host: String, port: u16 },
    Serial(SerialSettings),
}

impl FinsTransport {
    /// 串口默认参数：9600 / 7 / 2 / even
    pub fn default_serial(path: impl Into<String>) -> Self {
        Self::Serial(SerialSettings {
            path: path.into(),
            baud_rate: 9600,
            data_bits: 7,
            stop_bits: 2,
            parity: "even".to_string(),
        })
    }
}

/// 构造 FINS 命令头。写命令的载荷由调用方追加。
pub fn build_fins_command(
    area: MemoryArea,
    address: u16,
    count: u16,
    is_read: bool,
) -> [u8; FINS_COMMAND_LEN] {
    let mut frame = [0u8; FINS_COMMAND_LEN];
    frame[0..4].copy_from_slice(b"FINS");
    frame[10] = 0x01;
    frame[11] = if is_read { 0x01 } else { 0x02 };
    frame[12] = area.code();
    frame[13..15].copy_from_slice(&address.to_be_bytes());
    frame[15..17].copy_from_slice(&count.to_be_bytes());
    frame
}

/// 解析响应：跳过 14 字节头，余下按大端字解码。
pub fn parse_fins_response(buffer: &[u8]) -> Result<Vec<u16>, ProtocolError> {
    if buffer.len() < FINS_RESPONSE_HEADER_LEN {
        return Err(ProtocolError::Framing(format!(
            "fins response too short: {} bytes",
            buffer.len()
        )));
    }
    Ok(codec::bytes_to_words(&buffer[FINS_RESPONSE_HEADER_LEN..]))
}

/// 响应完整判定：收到任意字节即视为完整（不按长度重组分包）。
pub fn response_complete(buffer: &[u8]) -> bool {
    !buffer.is_empty()
}

/// 接收任务与操作之间共享的累积缓冲区
#[derive(Default)]
struct ResponseInbox {
    buffer: Mutex<Vec<u8>>,
    notify: Notify,
    closed: AtomicBool,
}

impl ResponseInbox {
    fn push(&self, bytes: &[u8]) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(bytes);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn clear(&self) -> Result<(), ProtocolError> {
        self.buffer
            .lock()
            .map_err(|_| ProtocolError::Framing("response buffer poisoned".to_string()))?
            .clear();
        Ok(())
    }

    /// 非阻塞地取出已完整的响应
    fn take_complete(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| ProtocolError::Framing("response buffer poisoned".to_string()))?;
        if response_complete(&buffer) {
            return Ok(Some(std::mem::take(&mut *buffer)));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connection("fins link closed".to_string()));
        }
        Ok(None)
    }

    async fn wait_response(&self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            let notified = self.notify.notified();
            if let Some(response) = self.take_complete()? {
                return Ok(response);
            }
            notified.await;
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct FinsLink {
    writer: BoxedWriter,
    inbox: Arc<ResponseInbox>,
    receiver: JoinHandle<()>,
}

impl FinsLink {
    fn attach<T>(stream: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let inbox = Arc::new(ResponseInbox::default());
        let sink = Arc::clone(&inbox);
        let receiver = tokio::spawn(async move {
            let mut chunk = [0u8; 1024];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.push(&chunk[..n]),
                    Err(err) => {
                        warn!(target: "ems.protocol", error = %err, "fins_receive_failed");
                        break;
                    }
                }
            }
            sink.close();
        });
        Self {
            writer: Box::new(writer),
            inbox,
            receiver,
        }
    }
}

impl Drop for FinsLink {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// FINS 协议客户端
pub struct FinsClient {
    transport: FinsTransport,
    response_timeout: Duration,
    link: Option<FinsLink>,
}

impl FinsClient {
    pub fn new(transport: FinsTransport) -> Self {
        Self {
            transport,
            response_timeout: FINS_RESPONSE_TIMEOUT,
            link: None,
        }
    }

    async fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let timeout = self.response_timeout;
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        link.inbox.clear()?;
        link.writer.write_all(frame).await?;
        link.writer.flush().await?;
        with_timeout(timeout, "fins response", link.inbox.wait_response()).await
    }

    /// 读取存储区字数据
    pub async fn read_memory_area(
        &mut self,
        area: MemoryArea,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        let command = build_fins_command(area, address, count, true);
        let response = self.exchange(&command).await?;
        let words = parse_fins_response(&response)?;
        debug!(
            target: "ems.protocol",
            area = area.as_str(),
            address,
            count,
            words = ?words,
            "fins_read"
        );
        Ok(words)
    }

    /// 写入存储区字数据（大端）
    pub async fn write_memory_area(
        &mut self,
        area: MemoryArea,
        address: u16,
        words: &[u16],
    ) -> Result<(), ProtocolError> {
        let mut frame = build_fins_command(area, address, words.len() as u16, false).to_vec();
        frame.extend_from_slice(&codec::words_to_bytes(words));
        self.exchange(&frame).await.map(|_| ())
    }
}

#[async_trait]
impl ProtocolClient for FinsClient {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Omron
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.link.is_some() {
            return Ok(());
        }
        let link = match &self.transport {
            FinsTransport::Tcp { host, port } => {
                let stream = with_timeout(self.response_timeout, "fins connect", async {
                    TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|e| ProtocolError::Connection(format!("{host}:{port}: {e}")))
                })
                .await?;
                FinsLink::attach(stream)
            }
            FinsTransport::Serial(serial) => FinsLink::attach(serial.open()?),
        };
        self.link = Some(link);
        info!(target: "ems.protocol", transport = ?self.transport, "fins_connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };
        link.receiver.abort();
        if let Err(err) = link.writer.shutdown().await {
            warn!(target: "ems.protocol", error = %err, "fins_disconnect_failed");
            return Err(ProtocolError::Io(err));
        }
        Ok(())
    }

    async fn read(&mut self, selector: &Selector) -> Result<RawValue, ProtocolError> {
        let Selector::Fins {
            area,
            address,
            count,
        } = *selector
        else {
            return Err(ProtocolError::InvalidSelector(format!(
                "fins client cannot read {selector:?}"
            )));
        };
        self.read_memory_area(area, address, count)
            .await
            .map(RawValue::Words)
    }

    async fn write(&mut self, selector: &Selector, value: &RawValue) -> Result<(), ProtocolError> {
        let Selector::Fins { area, address, .. } = *selector else {
            return Err(ProtocolError::InvalidSelector(format!(
                "fins client cannot write {selector:?}"
            )));
        };
        let RawValue::Words(words) = value else {
            return Err(ProtocolError::InvalidSelector(format!(
                "fins writes take words, got {}",
                value.kind()
            )));
        };
        self.write_memory_area(area, address, words).await
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}
