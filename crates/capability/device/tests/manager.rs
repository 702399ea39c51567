use async_trait::async_trait;
use domain::{DataPoint, Device, ProtocolKind, Quality};
use ems_device::{ClientFactory, ConnectOutcome, DeviceError, DeviceManager};
use ems_protocol::{ModbusFunction, ProtocolClient, ProtocolError, RawValue, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Copy)]
enum Failure {
    Timeout,
    Io,
}

impl Failure {
    fn into_error(self) -> ProtocolError {
        match self {
            Self::Timeout => ProtocolError::Timeout("read".to_string()),
            Self::Io => ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link down",
            )),
        }
    }
}

/// 单个设备的脚本状态，跨重连共享
#[derive(Default)]
struct FakeDevice {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    refuse_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    link_lost: AtomicBool,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    registers: Mutex<Vec<u16>>,
    next_failure: Mutex<Option<Failure>>,
    writes: Mutex<Vec<(Selector, RawValue)>>,
}

struct FakeClient {
    state: Arc<FakeDevice>,
    connected: bool,
}

#[async_trait]
impl ProtocolClient for FakeClient {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::ModbusTcp
    }

    async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.connect_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Connection("refused".to_string()));
        }
        self.state.link_lost.store(false, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(ProtocolError::Io(std::io::Error::other("close failed")));
        }
        Ok(())
    }

    async fn read(&mut self, selector: &Selector) -> Result<RawValue, ProtocolError> {
        if let Some(failure) = self.state.next_failure.lock().expect("lock").take() {
            return Err(failure.into_error());
        }
        let Selector::Modbus { function, count, .. } = selector else {
            return Err(ProtocolError::InvalidSelector("not modbus".to_string()));
        };
        if function.is_bit() {
            return Ok(RawValue::Bits(vec![true]));
        }
        let registers = self.state.registers.lock().expect("lock").clone();
        Ok(RawValue::Words(registers.into_iter().take(*count as usize).collect()))
    }

    async fn write(&mut self, selector: &Selector, value: &RawValue) -> Result<(), ProtocolError> {
        self.state
            .writes
            .lock()
            .expect("lock")
            .push((selector.clone(), value.clone()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.state.link_lost.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeFactory {
    devices: Mutex<HashMap<i64, Arc<FakeDevice>>>,
    created: AtomicUsize,
}

impl FakeFactory {
    fn device(&self, id: i64) -> Arc<FakeDevice> {
        Arc::clone(self.devices.lock().expect("lock").entry(id).or_default())
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, device: &Device) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        if device.protocol_kind().is_none() {
            return Err(ProtocolError::UnsupportedProtocol(device.protocol.clone()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            state: self.device(device.id),
            connected: false,
        }))
    }
}

fn setup() -> (Arc<FakeFactory>, DeviceManager) {
    let factory = Arc::new(FakeFactory::default());
    let manager = DeviceManager::new(factory.clone());
    (factory, manager)
}

fn device(id: i64) -> Device {
    let mut device = Device::new(id, format!("plc-{id}"), "modbus_tcp");
    device.host = Some("127.0.0.1".to_string());
    device
}

#[tokio::test]
async fn connect_twice_reuses_connection() {
    let (factory, manager) = setup();
    let dev = device(1);

    let first = manager.connect_device(&dev).await.expect("connect");
    let second = manager.connect_device(&dev).await.expect("connect again");

    assert_eq!(first, ConnectOutcome::Connected);
    assert_eq!(second, ConnectOutcome::AlreadyConnected);
    assert_eq!(factory.device(1).connects.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert!(manager.is_device_connected(1).await);
}

#[tokio::test]
async fn stale_client_is_closed_before_reconnect() {
    let (factory, manager) = setup();
    let dev = device(50);
    manager.connect_device(&dev).await.expect("connect");

    factory.device(50).link_lost.store(true, Ordering::SeqCst);
    assert!(!manager.is_device_connected(50).await);

    let outcome = manager.connect_device(&dev).await.expect("reconnect");
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(factory.device(50).connects.load(Ordering::SeqCst), 2);
    assert_eq!(factory.device(50).disconnects.load(Ordering::SeqCst), 1);
    assert!(manager.is_device_connected(50).await);
}

#[tokio::test]
async fn connect_waiting_on_a_retired_slot_registers_a_fresh_one() {
    let (factory, manager) = setup();
    let manager = Arc::new(manager);
    let state = factory.device(60);
    let gate = Arc::new(Notify::new());
    *state.connect_gate.lock().expect("lock") = Some(gate.clone());

    // 第一次连接停在握手中，持有条目锁
    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect_device(&device(60)).await }
    });
    while state.connects.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // 第二次连接拿到同一条目后排队等锁
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect_device(&device(60)).await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // 断开操作在两者都拿到条目后注销它
    let disconnect = tokio::spawn({
        let manager = manager.clone();
        async move { manager.disconnect_device(60).await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    *state.connect_gate.lock().expect("lock") = None;
    gate.notify_one();

    let first = first.await.expect("join").expect("first connect");
    let second = second.await.expect("join").expect("second connect");
    let removed = disconnect.await.expect("join").expect("disconnect");

    assert_eq!(first, ConnectOutcome::Connected);
    assert_eq!(second, ConnectOutcome::Connected);
    assert!(removed);
    assert!(manager.is_device_connected(60).await);
    assert_eq!(manager.connected_device_ids(), vec![60]);
    // 每条物理连接要么仍在注册表中，要么已关闭
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_connect_registers_nothing() {
    let (factory, manager) = setup();
    factory.device(2).refuse_connect.store(true, Ordering::SeqCst);

    let err = manager.connect_device(&device(2)).await.expect_err("should fail");
    assert!(matches!(
        err.protocol_error(),
        Some(ProtocolError::Connection(_))
    ));
    assert!(!manager.is_device_connected(2).await);
    assert!(manager.connected_device_ids().is_empty());
}

#[tokio::test]
async fn unsupported_protocol_is_reported() {
    let (_, manager) = setup();
    let mut dev = device(3);
    dev.protocol = "profinet".to_string();

    let err = manager.connect_device(&dev).await.expect_err("should fail");
    assert!(matches!(
        err.protocol_error(),
        Some(ProtocolError::UnsupportedProtocol(_))
    ));
}

#[tokio::test]
async fn read_requires_connection() {
    let (_, manager) = setup();
    let point = DataPoint::new(10, 4, "temp", "100", "int16");

    let err = manager.read_data_point(4, &point).await.expect_err("should fail");
    assert!(matches!(err, DeviceError::NotConnected(4)));
}

#[tokio::test]
async fn read_decodes_and_scales() {
    let (factory, manager) = setup();
    manager.connect_device(&device(5)).await.expect("connect");
    *factory.device(5).registers.lock().expect("lock") = vec![0x0001, 0x0002];

    let mut point = DataPoint::new(11, 5, "energy", "200", "int32");
    point.scale = Some(0.5);
    point.offset = Some(1.0);

    let sample = manager.read_data_point(5, &point).await.expect("read");
    assert_eq!(sample.quality, Quality::Good);
    assert_eq!(sample.value, Some(65538.0 * 0.5 + 1.0));
}

#[tokio::test]
async fn read_timeout_degrades_quality_and_keeps_connection() {
    let (factory, manager) = setup();
    manager.connect_device(&device(6)).await.expect("connect");
    *factory.device(6).next_failure.lock().expect("lock") = Some(Failure::Timeout);

    let point = DataPoint::new(12, 6, "flow", "1", "uint16");
    let sample = manager.read_data_point(6, &point).await.expect("read");

    assert_eq!(sample.quality, Quality::Bad);
    assert_eq!(sample.value, None);
    assert!(manager.is_device_connected(6).await);
}

#[tokio::test]
async fn transport_failure_evicts_connection() {
    let (factory, manager) = setup();
    let dev = device(7);
    manager.connect_device(&dev).await.expect("connect");
    *factory.device(7).next_failure.lock().expect("lock") = Some(Failure::Io);

    let point = DataPoint::new(13, 7, "level", "1", "uint16");
    let sample = manager.read_data_point(7, &point).await.expect("read");
    assert_eq!(sample.quality, Quality::Bad);
    assert!(!manager.is_device_connected(7).await);

    let outcome = manager.connect_device(&dev).await.expect("reconnect");
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(factory.device(7).connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn decode_failure_degrades_quality() {
    let (factory, manager) = setup();
    manager.connect_device(&device(8)).await.expect("connect");
    *factory.device(8).registers.lock().expect("lock") = vec![0x0001];

    // float32 需要两个寄存器
    let point = DataPoint::new(14, 8, "pressure", "1", "float32");
    let sample = manager.read_data_point(8, &point).await.expect("read");
    assert_eq!(sample.quality, Quality::Bad);
}

#[tokio::test]
async fn bool_write_targets_coil() {
    let (factory, manager) = setup();
    manager.connect_device(&device(9)).await.expect("connect");

    let point = DataPoint::new(15, 9, "pump", "12", "bool");
    manager.write_data_point(9, &point, 1.0).await.expect("write");

    let writes = factory.device(9).writes.lock().expect("lock").clone();
    assert_eq!(writes.len(), 1);
    assert!(matches!(
        writes[0].0,
        Selector::Modbus { function: ModbusFunction::Coil, address: 12, .. }
    ));
    assert_eq!(writes[0].1, RawValue::Bits(vec![true]));
}

#[tokio::test]
async fn write_errors_propagate() {
    let (_, manager) = setup();
    manager.connect_device(&device(10)).await.expect("connect");

    let point = DataPoint::new(16, 10, "setpoint", "not-a-number", "uint16");
    let err = manager
        .write_data_point(10, &point, 5.0)
        .await
        .expect_err("should fail");
    assert!(matches!(
        err.protocol_error(),
        Some(ProtocolError::InvalidAddress(_))
    ));
}

#[tokio::test]
async fn read_only_points_reject_writes() {
    let (factory, manager) = setup();
    manager.connect_device(&device(11)).await.expect("connect");

    for (id, data_type) in [(17, "discrete_input"), (18, "input_int16")] {
        let point = DataPoint::new(id, 11, "status", "5", data_type);
        let err = manager
            .write_data_point(11, &point, 1.0)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err.protocol_error(),
            Some(ProtocolError::InvalidSelector(_))
        ));
    }
    assert!(factory.device(11).writes.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn disconnect_all_waits_for_every_device() {
    let (factory, manager) = setup();
    for id in [20, 21, 22] {
        manager.connect_device(&device(id)).await.expect("connect");
    }
    factory.device(21).fail_disconnect.store(true, Ordering::SeqCst);

    let result = manager.disconnect_all().await;
    assert!(result.is_err());
    for id in [20, 21, 22] {
        assert_eq!(factory.device(id).disconnects.load(Ordering::SeqCst), 1);
        assert!(!manager.is_device_connected(id).await);
    }
}

#[tokio::test]
async fn connection_test_does_not_register() {
    let (factory, manager) = setup();
    manager.test_connection(&device(30)).await.expect("test connection");

    assert_eq!(factory.device(30).connects.load(Ordering::SeqCst), 1);
    assert_eq!(factory.device(30).disconnects.load(Ordering::SeqCst), 1);
    assert!(!manager.is_device_connected(30).await);
}

#[tokio::test]
async fn reload_drops_live_connection() {
    let (factory, manager) = setup();
    let mut dev = device(40);
    manager.connect_device(&dev).await.expect("connect");

    dev.port = Some(1502);
    manager.reload_device(&dev).await.expect("reload");
    assert!(!manager.is_device_connected(40).await);
    assert_eq!(factory.device(40).disconnects.load(Ordering::SeqCst), 1);

    assert!(!manager.disconnect_device(40).await.expect("disconnect"));
}
