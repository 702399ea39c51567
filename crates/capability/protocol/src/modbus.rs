//! Modbus 客户端（TCP / RTU / ASCII）
//!
//! TCP 与 RTU 使用 tokio-modbus 的客户端上下文，ASCII 使用 [`AsciiLink`] 自行组帧。
//! 三种模式共用同一套 PDU 语义，只有传输参数不同。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let mut client = ModbusClient::new(ModbusConfig {
//!     transport: ModbusTransport::Tcp { host: "192.168.1.100".into(), port: 502 },
//!     slave_id: 1,
//!     timeout: Duration::from_millis(3000),
//! });
//! client.connect().await?;
//! let raw = client.read(&Selector::Modbus {
//!     function: ModbusFunction::HoldingRegister,
//!     address: 100,
//!     count: 2,
//! }).await?;
//! ```

use crate::client::ProtocolClient;
use crate::error::ProtocolError;
use crate::modbus_ascii::{AsciiLink, AsciiResponse};
use crate::serial::SerialSettings;
use crate::types::{with_timeout, ModbusFunction, RawValue, Selector};
use async_trait::async_trait;
use domain::ProtocolKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

pub const DEFAULT_MODBUS_TCP_PORT: u16 = 502;

/// 传输参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusTransport {
    Tcp { host: String, port: u16 },
    Rtu(SerialSettings),
    Ascii(SerialSettings),
}

/// Modbus 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusConfig {
    pub transport: ModbusTransport,
    pub slave_id: u8,
    /// 连接与单次读写超时
    pub timeout: Duration,
}

enum ModbusLink {
    Context(Context),
    Ascii(AsciiLink<SerialStream>),
}

/// Modbus 协议客户端
pub struct ModbusClient {
    config: ModbusConfig,
    link: Option<ModbusLink>,
}

impl ModbusClient {
    pub fn new(config: ModbusConfig) -> Self {
        Self { config, link: None }
    }

    async fn open_link(&mut self) -> Result<ModbusLink, ProtocolError> {
        let slave = Slave(self.config.slave_id);
        match &self.config.transport {
            ModbusTransport::Tcp { host, port } => {
                let stream = with_timeout(self.config.timeout, "modbus connect", async {
                    TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|e| ProtocolError::Connection(format!("{host}:{port}: {e}")))
                })
                .await?;
                Ok(ModbusLink::Context(tcp::attach_slave(stream, slave)))
            }
            ModbusTransport::Rtu(serial) => {
                let port = serial.open()?;
                Ok(ModbusLink::Context(rtu::attach_slave(port, slave)))
            }
            ModbusTransport::Ascii(serial) => {
                let port = serial.open()?;
                Ok(ModbusLink::Ascii(AsciiLink::new(port, self.config.slave_id)))
            }
        }
    }

    fn link_mut(&mut self) -> Result<&mut ModbusLink, ProtocolError> {
        self.link.as_mut().ok_or(ProtocolError::NotConnected)
    }
}

fn mode_name(transport: &ModbusTransport) -> &'static str {
    match transport {
        ModbusTransport::Tcp { .. } => "tcp",
        ModbusTransport::Rtu(_) => "rtu",
        ModbusTransport::Ascii(_) => "ascii",
    }
}

/// 链路错误映射为 Io，以便设备管理器识别断线
fn modbus_error(err: tokio_modbus::Error) -> ProtocolError {
    match err {
        tokio_modbus::Error::Transport(io) => ProtocolError::Io(io),
        other => ProtocolError::Modbus(other.to_string()),
    }
}

fn exception_error(code: ExceptionCode) -> ProtocolError {
    ProtocolError::Exception(format!("{code:?}"))
}

async fn read_context(
    ctx: &mut Context,
    function: ModbusFunction,
    address: u16,
    count: u16,
) -> Result<RawValue, ProtocolError> {
    let raw = match function {
        ModbusFunction::Coil => RawValue::Bits(
            ctx.read_coils(address, count)
                .await
                .map_err(modbus_error)?
                .map_err(exception_error)?,
        ),
        ModbusFunction::DiscreteInput => RawValue::Bits(
            ctx.read_discrete_inputs(address, count)
                .await
                .map_err(modbus_error)?
                .map_err(exception_error)?,
        ),
        ModbusFunction::HoldingRegister => RawValue::Words(
            ctx.read_holding_registers(address, count)
                .await
                .map_err(modbus_error)?
                .map_err(exception_error)?,
        ),
        ModbusFunction::InputRegister => RawValue::Words(
            ctx.read_input_registers(address, count)
                .await
                .map_err(modbus_error)?
                .map_err(exception_error)?,
        ),
    };
    Ok(raw)
}

async fn write_context(
    ctx: &mut Context,
    address: u16,
    value: &RawValue,
) -> Result<(), ProtocolError> {
    match value {
        RawValue::Bits(bits) => {
            let state = bits.first().copied().unwrap_or(false);
            ctx.write_single_coil(address, state)
                .await
                .map_err(modbus_error)?
                .map_err(exception_error)
        }
        RawValue::Words(words) if words.len() == 1 => ctx
            .write_single_register(address, words[0])
            .await
            .map_err(modbus_error)?
            .map_err(exception_error),
        RawValue::Words(words) => ctx
            .write_multiple_registers(address, words)
            .await
            .map_err(modbus_error)?
            .map_err(exception_error),
        RawValue::Bytes(_) => Err(ProtocolError::InvalidSelector(
            "modbus writes take bits or words".to_string(),
        )),
    }
}

async fn write_ascii(
    link: &mut AsciiLink<SerialStream>,
    address: u16,
    value: &RawValue,
) -> Result<(), ProtocolError> {
    match value {
        RawValue::Bits(bits) => {
            link.write_single_coil(address, bits.first().copied().unwrap_or(false))
                .await
        }
        RawValue::Words(words) if words.len() == 1 => {
            link.write_single_register(address, words[0]).await
        }
        RawValue::Words(words) => link.write_multiple_registers(address, words).await,
        RawValue::Bytes(_) => Err(ProtocolError::InvalidSelector(
            "modbus writes take bits or words".to_string(),
        )),
    }
}

/// 写目标校验：只读数据区拒绝写入，线圈必须配位载荷
fn check_write_target(function: ModbusFunction, value: &RawValue) -> Result<(), ProtocolError> {
    match (function, value) {
        (ModbusFunction::Coil, RawValue::Bits(_))
        | (ModbusFunction::HoldingRegister, RawValue::Words(_)) => Ok(()),
        (ModbusFunction::DiscreteInput | ModbusFunction::InputRegister, _) => Err(
            ProtocolError::InvalidSelector(format!("{function:?} is read-only")),
        ),
        (_, other) => Err(ProtocolError::InvalidSelector(format!(
            "{function:?} cannot take a {} payload",
            other.kind()
        ))),
    }
}

#[async_trait]
impl ProtocolClient for ModbusClient {
    fn kind(&self) -> ProtocolKind {
        match self.config.transport {
            ModbusTransport::Tcp { .. } => ProtocolKind::ModbusTcp,
            ModbusTransport::Rtu(_) => ProtocolKind::ModbusRtu,
            ModbusTransport::Ascii(_) => ProtocolKind::ModbusAscii,
        }
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.link.is_some() {
            return Ok(());
        }
        let link = self.open_link().await?;
        self.link = Some(link);
        info!(
            target: "ems.protocol",
            mode = mode_name(&self.config.transport),
            slave = self.config.slave_id,
            "modbus_connected"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let result = match self.link.take() {
            Some(ModbusLink::Context(mut ctx)) => ctx.disconnect().await.map_err(ProtocolError::Io),
            Some(ModbusLink::Ascii(mut link)) => link.shutdown().await,
            None => return Ok(()),
        };
        if let Err(err) = &result {
            warn!(target: "ems.protocol", error = %err, "modbus_disconnect_failed");
        }
        result
    }

    async fn read(&mut self, selector: &Selector) -> Result<RawValue, ProtocolError> {
        let Selector::Modbus {
            function,
            address,
            count,
        } = *selector
        else {
            return Err(ProtocolError::InvalidSelector(format!(
                "modbus client cannot read {selector:?}"
            )));
        };
        let timeout = self.config.timeout;

        let raw = match self.link_mut()? {
            ModbusLink::Context(ctx) => {
                with_timeout(timeout, "modbus read", read_context(ctx, function, address, count))
                    .await?
            }
            ModbusLink::Ascii(link) => {
                match with_timeout(timeout, "modbus read", link.read(function, address, count))
                    .await?
                {
                    AsciiResponse::Bits(bits) => RawValue::Bits(bits),
                    AsciiResponse::Words(words) => RawValue::Words(words),
                }
            }
        };

        debug!(
            target: "ems.protocol",
            function = ?function,
            address,
            count,
            raw = ?raw,
            "modbus_read"
        );
        Ok(raw)
    }

    async fn write(&mut self, selector: &Selector, value: &RawValue) -> Result<(), ProtocolError> {
        let Selector::Modbus {
            function, address, ..
        } = *selector
        else {
            return Err(ProtocolError::InvalidSelector(format!(
                "modbus client cannot write {selector:?}"
            )));
        };
        check_write_target(function, value)?;
        let timeout = self.config.timeout;

        match self.link_mut()? {
            ModbusLink::Context(ctx) => {
                with_timeout(timeout, "modbus write", write_context(ctx, address, value)).await
            }
            ModbusLink::Ascii(link) => {
                with_timeout(timeout, "modbus write", write_ascii(link, address, value)).await
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}
