//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接建立或握手失败
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误（链路断开、写入失败等）
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 协议层错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 从站返回的异常响应
    #[error("device exception: {0}")]
    Exception(String),

    /// 响应帧格式错误或长度不足
    #[error("framing error: {0}")]
    Framing(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据点地址无法解析
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// 不支持的协议
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// 数值编解码错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 选择器与客户端协议不匹配
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 未连接时调用读写
    #[error("not connected")]
    NotConnected,
}

impl ProtocolError {
    /// 链路级故障：连接已不可用，需要重新 connect。
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Connection(_))
    }

    /// 配置类错误：不会因重试而恢复。
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::InvalidAddress(_)
                | Self::UnsupportedProtocol(_)
                | Self::InvalidSelector(_)
        )
    }
}
