//! 事件出口
//!
//! 采集器构造时注入 [`EventSink`]；推送不阻塞采集轮次。

use api_contract::GatewayEvent;
use ems_telemetry::{record_event_dropped, record_event_published};
use tokio::sync::broadcast;
use tracing::debug;

/// 事件出口抽象。
pub trait EventSink: Send + Sync {
    fn publish(&self, event: GatewayEvent);
}

/// 丢弃所有事件。
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: GatewayEvent) {}
}

/// 广播出口：每个订阅方拿到全部事件，慢订阅方自行处理 `Lagged`。
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<GatewayEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: GatewayEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => {
                record_event_published();
                debug!(target: "ems.collector", kind, receivers, "event_published");
            }
            Err(_) => {
                // 无订阅方
                record_event_dropped();
            }
        }
    }
}
