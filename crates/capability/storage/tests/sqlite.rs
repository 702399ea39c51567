use chrono::{Duration, Utc};
use domain::{AlarmStatus, AlarmType, DataPoint, Device, NewAlarm, Quality};
use ems_storage::{ConfigStore, SqliteConfigStore};

async fn store() -> SqliteConfigStore {
    let store = SqliteConfigStore::connect("sqlite::memory:")
        .await
        .expect("connect");
    let mut plc = Device::new(1, "line-1", "modbus_rtu");
    plc.connection_type = "serial".to_string();
    plc.serial_port = Some("/dev/ttyUSB0".to_string());
    plc.baud_rate = Some(19200);
    plc.slave_id = Some(3);
    plc.timeout_ms = Some(1500);
    store.upsert_device(&plc).await.expect("device");

    let mut disabled = Device::new(2, "spare", "siemens");
    disabled.enabled = false;
    store.upsert_device(&disabled).await.expect("device");

    let mut point = DataPoint::new(10, 1, "temp", "40001", "float32");
    point.scale = Some(0.1);
    point.offset = Some(-5.0);
    point.alarm_enabled = true;
    point.alarm_high = Some(100.0);
    store.upsert_data_point(&point).await.expect("point");
    store
        .upsert_data_point(&DataPoint::new(11, 1, "flow", "40003", "int16"))
        .await
        .expect("point");
    store
}

#[tokio::test]
async fn device_and_point_round_trip() {
    let store = store().await;
    let devices = store.list_enabled_devices().await.expect("devices");
    assert_eq!(devices.len(), 1);
    let plc = &devices[0];
    assert_eq!(plc.serial_port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(plc.baud_rate, Some(19200));
    assert_eq!(plc.slave_id, Some(3));
    assert_eq!(plc.timeout_ms, Some(1500));
    assert_eq!(plc.port, None);

    let points = store.list_enabled_data_points(1).await.expect("points");
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].offset, Some(-5.0));
    assert!(points[0].alarm_enabled);
    assert_eq!(points[0].alarm_high, Some(100.0));
    assert_eq!(points[0].alarm_low, None);
    assert!(store.get_device(2).await.expect("get").is_some_and(|d| !d.enabled));
}

#[tokio::test]
async fn history_keeps_null_values_and_purges() {
    let store = store().await;
    let now = Utc::now();
    store
        .insert_history_sample(10, Some(21.5), Quality::Good, now - Duration::days(100))
        .await
        .expect("old");
    store
        .insert_history_sample(10, None, Quality::Bad, now)
        .await
        .expect("bad sample");

    let history = store.list_history(10, 5).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].value, None);
    assert_eq!(history[0].quality, Quality::Bad);
    assert_eq!(history[1].value, Some(21.5));

    let removed = store
        .delete_history_older_than(now - Duration::days(90))
        .await
        .expect("purge");
    assert_eq!(removed, 1);
    assert_eq!(store.list_history(10, 5).await.expect("history").len(), 1);
}

#[tokio::test]
async fn alarms_clear_and_acknowledge() {
    let store = store().await;
    let raised = store
        .insert_alarm(NewAlarm {
            data_point_id: 10,
            alarm_type: AlarmType::High,
            level: "WARNING".to_string(),
            value: 150.0,
            threshold: 100.0,
            message: "temp above high limit".to_string(),
        })
        .await
        .expect("insert");

    let active = store
        .find_active_alarm(10, AlarmType::High)
        .await
        .expect("find")
        .expect("active");
    assert_eq!(active.id, raised.id);
    assert_eq!(active.threshold, Some(100.0));

    assert_eq!(store.clear_active_alarms(10).await.expect("clear"), 1);
    assert!(store
        .find_active_alarm(10, AlarmType::High)
        .await
        .expect("find")
        .is_none());

    let acked = store
        .acknowledge_alarm(raised.id, Some("operator"))
        .await
        .expect("ack")
        .expect("exists");
    assert_eq!(acked.status, AlarmStatus::Acknowledged);
    assert_eq!(acked.ack_user.as_deref(), Some("operator"));

    let listed = store
        .list_alarms(Some(AlarmStatus::Acknowledged))
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert!(store.list_alarms(Some(AlarmStatus::Active)).await.expect("list").is_empty());
}
