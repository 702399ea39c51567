//! 协议客户端抽象

use crate::error::ProtocolError;
use crate::types::{RawValue, Selector};
use async_trait::async_trait;
use domain::ProtocolKind;

/// 单条物理/逻辑连接上的协议客户端。
///
/// 调用顺序：`connect` → 任意次 `read`/`write` → `disconnect`。
/// 未连接（或断开后）调用读写返回 [`ProtocolError::NotConnected`]。
/// 超时或链路错误不会修改连接状态，是否重连由设备管理器决定。
#[async_trait]
pub trait ProtocolClient: Send {
    fn kind(&self) -> ProtocolKind;

    async fn connect(&mut self) -> Result<(), ProtocolError>;

    async fn disconnect(&mut self) -> Result<(), ProtocolError>;

    async fn read(&mut self, selector: &Selector) -> Result<RawValue, ProtocolError>;

    async fn write(&mut self, selector: &Selector, value: &RawValue) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;
}
