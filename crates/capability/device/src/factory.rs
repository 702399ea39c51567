//! 协议客户端工厂

use domain::{ConnectionType, Device, ProtocolKind};
use ems_protocol::{
    DEFAULT_FINS_PORT, DEFAULT_MODBUS_TCP_PORT, DEFAULT_S7_PORT, FinsClient, FinsTransport,
    ModbusClient, ModbusConfig, ModbusTransport, ProtocolClient, ProtocolError, S7Client,
    S7Config, SerialSettings,
};
use std::time::Duration;

/// 设备未配置超时时使用的默认值。
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_millis(3000);

const DEFAULT_SLAVE_ID: u8 = 1;
const DEFAULT_S7_RACK: u16 = 0;
const DEFAULT_S7_SLOT: u16 = 1;

/// 按设备配置构造协议客户端（可替换为测试桩）。
pub trait ClientFactory: Send + Sync {
    fn create(&self, device: &Device) -> Result<Box<dyn ProtocolClient>, ProtocolError>;
}

/// 生产环境工厂：按 `protocol` 字段选择真实客户端。
#[derive(Debug, Clone)]
pub struct DefaultClientFactory {
    default_timeout: Duration,
}

impl DefaultClientFactory {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for DefaultClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_TIMEOUT)
    }
}

impl ClientFactory for DefaultClientFactory {
    fn create(&self, device: &Device) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        build_client(device, self.default_timeout)
    }
}

/// 按设备协议构造客户端（不连接）。协议名大小写不敏感，未知协议返回
/// [`ProtocolError::UnsupportedProtocol`]。
pub fn create_client(device: &Device) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
    build_client(device, DEFAULT_DEVICE_TIMEOUT)
}

fn build_client(
    device: &Device,
    default_timeout: Duration,
) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
    let kind = device
        .protocol_kind()
        .ok_or_else(|| ProtocolError::UnsupportedProtocol(device.protocol.clone()))?;
    let timeout = device
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    let client: Box<dyn ProtocolClient> = match kind {
        ProtocolKind::ModbusTcp => Box::new(ModbusClient::new(ModbusConfig {
            transport: ModbusTransport::Tcp {
                host: require_host(device)?,
                port: device.port.unwrap_or(DEFAULT_MODBUS_TCP_PORT),
            },
            slave_id: device.slave_id.unwrap_or(DEFAULT_SLAVE_ID),
            timeout,
        })),
        ProtocolKind::ModbusRtu => Box::new(ModbusClient::new(ModbusConfig {
            transport: ModbusTransport::Rtu(modbus_serial(device)?),
            slave_id: device.slave_id.unwrap_or(DEFAULT_SLAVE_ID),
            timeout,
        })),
        ProtocolKind::ModbusAscii => Box::new(ModbusClient::new(ModbusConfig {
            transport: ModbusTransport::Ascii(modbus_serial(device)?),
            slave_id: device.slave_id.unwrap_or(DEFAULT_SLAVE_ID),
            timeout,
        })),
        ProtocolKind::Siemens => Box::new(S7Client::new(S7Config {
            host: require_host(device)?,
            port: device.port.unwrap_or(DEFAULT_S7_PORT),
            rack: device.rack.unwrap_or(DEFAULT_S7_RACK),
            slot: device.slot.unwrap_or(DEFAULT_S7_SLOT),
            timeout,
        })),
        ProtocolKind::Omron => Box::new(FinsClient::new(fins_transport(device)?)),
    };
    Ok(client)
}

fn require_host(device: &Device) -> Result<String, ProtocolError> {
    device
        .host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProtocolError::ConfigParse(format!("device {} has no host configured", device.id))
        })
}

fn require_serial_port(device: &Device) -> Result<String, ProtocolError> {
    device
        .serial_port
        .clone()
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| {
            ProtocolError::ConfigParse(format!(
                "device {} has no serial port configured",
                device.id
            ))
        })
}

/// Modbus 串口默认 9600 / 8 / 1 / none
fn modbus_serial(device: &Device) -> Result<SerialSettings, ProtocolError> {
    Ok(SerialSettings {
        path: require_serial_port(device)?,
        baud_rate: device.baud_rate.unwrap_or(9600),
        data_bits: device.data_bits.unwrap_or(8),
        stop_bits: device.stop_bits.unwrap_or(1),
        parity: device.parity.clone().unwrap_or_else(|| "none".to_string()),
    })
}

/// FINS 串口默认 9600 / 7 / 2 / even，TCP 默认 9600 端口
fn fins_transport(device: &Device) -> Result<FinsTransport, ProtocolError> {
    match device.connection_kind() {
        ConnectionType::Serial => Ok(FinsTransport::Serial(SerialSettings {
            path: require_serial_port(device)?,
            baud_rate: device.baud_rate.unwrap_or(9600),
            data_bits: device.data_bits.unwrap_or(7),
            stop_bits: device.stop_bits.unwrap_or(2),
            parity: device.parity.clone().unwrap_or_else(|| "even".to_string()),
        })),
        ConnectionType::Tcp => Ok(FinsTransport::Tcp {
            host: require_host(device)?,
            port: device.port.unwrap_or(DEFAULT_FINS_PORT),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(protocol: &str) -> Device {
        let mut device = Device::new(1, "plc", protocol);
        device.host = Some("10.0.0.5".to_string());
        device
    }

    #[test]
    fn protocol_names_are_case_insensitive() {
        assert_eq!(create_client(&device("MODBUS_TCP")).expect("client").kind(), ProtocolKind::ModbusTcp);
        assert_eq!(create_client(&device("S7")).expect("client").kind(), ProtocolKind::Siemens);
        assert_eq!(create_client(&device("Fins")).expect("client").kind(), ProtocolKind::Omron);
    }

    #[test]
    fn unknown_protocol_is_unsupported() {
        let err = create_client(&device("bacnet")).err().expect("should fail");
        assert!(matches!(err, ProtocolError::UnsupportedProtocol(name) if name == "bacnet"));
    }

    #[test]
    fn tcp_protocols_require_host() {
        let mut device = device("siemens");
        device.host = Some("  ".to_string());
        let err = create_client(&device).err().expect("should fail");
        assert!(matches!(err, ProtocolError::ConfigParse(_)));
    }

    #[test]
    fn serial_modbus_requires_port() {
        let mut device = device("modbus_rtu");
        device.connection_type = "serial".to_string();
        assert!(create_client(&device).is_err());
        device.serial_port = Some("/dev/ttyUSB0".to_string());
        assert_eq!(create_client(&device).expect("client").kind(), ProtocolKind::ModbusRtu);
    }

    #[test]
    fn fins_serial_keeps_overrides() {
        let mut device = device("omron");
        device.connection_type = "serial".to_string();
        device.serial_port = Some("/dev/ttyS1".to_string());
        device.baud_rate = Some(19200);
        let FinsTransport::Serial(settings) = fins_transport(&device).expect("transport") else {
            panic!("expected serial transport");
        };
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.data_bits, 7);
        assert_eq!(settings.stop_bits, 2);
        assert_eq!(settings.parity, "even");
    }
}
