/// 设备主键。
pub type DeviceId = i64;
/// 数据点主键。
pub type DataPointId = i64;

/// 设备协议种类（封闭枚举，连接时解析一次）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    ModbusTcp,
    ModbusRtu,
    ModbusAscii,
    Siemens,
    Omron,
}

impl ProtocolKind {
    /// 从配置中的协议字符串解析（大小写不敏感）。
    ///
    /// 识别 `modbus_tcp|modbus_rtu|modbus_ascii`、`siemens|s7`、`omron|fins`。
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "modbus_tcp" => Some(Self::ModbusTcp),
            "modbus_rtu" => Some(Self::ModbusRtu),
            "modbus_ascii" => Some(Self::ModbusAscii),
            "siemens" | "s7" => Some(Self::Siemens),
            "omron" | "fins" => Some(Self::Omron),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus_tcp",
            Self::ModbusRtu => "modbus_rtu",
            Self::ModbusAscii => "modbus_ascii",
            Self::Siemens => "siemens",
            Self::Omron => "omron",
        }
    }

    pub fn is_modbus(self) -> bool {
        matches!(self, Self::ModbusTcp | Self::ModbusRtu | Self::ModbusAscii)
    }
}

/// 物理链路类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Tcp,
    Serial,
}

impl ConnectionType {
    /// 解析 `connection_type` 字段；无法识别时按 TCP 处理。
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "serial" | "rtu" | "ascii" | "rs485" | "rs232" => Self::Serial,
            _ => Self::Tcp,
        }
    }
}

/// 设备配置（引擎只读）。
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// 原始协议字符串，连接时解析为 [`ProtocolKind`]
    pub protocol: String,
    pub connection_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub serial_port: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<String>,
    /// Modbus 从站地址
    pub slave_id: Option<u8>,
    /// S7 机架号
    pub rack: Option<u16>,
    /// S7 槽号
    pub slot: Option<u16>,
    /// 单次操作超时（毫秒）
    pub timeout_ms: Option<u64>,
    pub enabled: bool,
}

impl Device {
    /// 构造仅含必填字段的设备，其余参数使用协议默认值。
    pub fn new(id: DeviceId, name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            protocol: protocol.into(),
            connection_type: "tcp".to_string(),
            host: None,
            port: None,
            serial_port: None,
            baud_rate: None,
            data_bits: None,
            stop_bits: None,
            parity: None,
            slave_id: None,
            rack: None,
            slot: None,
            timeout_ms: None,
            enabled: true,
        }
    }

    pub fn protocol_kind(&self) -> Option<ProtocolKind> {
        ProtocolKind::parse(&self.protocol)
    }

    pub fn connection_kind(&self) -> ConnectionType {
        ConnectionType::parse(&self.connection_type)
    }
}

/// 数据点配置。
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub id: DataPointId,
    pub device_id: DeviceId,
    pub name: String,
    /// 协议相关地址，如 `40001`、`DB1.4`、`DM100`
    pub address: String,
    /// 数据类型，如 `int16`、`float32`、`coil`、`REAL`
    pub data_type: String,
    pub unit: Option<String>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub enabled: bool,
    pub alarm_enabled: bool,
    pub alarm_high: Option<f64>,
    pub alarm_low: Option<f64>,
}

impl DataPoint {
    pub fn new(
        id: DataPointId,
        device_id: DeviceId,
        name: impl Into<String>,
        address: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            id,
            device_id,
            name: name.into(),
            address: address.into(),
            data_type: data_type.into(),
            unit: None,
            scale: None,
            offset: None,
            enabled: true,
            alarm_enabled: false,
            alarm_high: None,
            alarm_low: None,
        }
    }

    /// 工程值换算：`raw * scale + offset`（默认 1.0 / 0.0）。
    pub fn apply_scale(&self, raw: f64) -> f64 {
        raw * self.scale.unwrap_or(1.0) + self.offset.unwrap_or(0.0)
    }
}
