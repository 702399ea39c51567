use chrono::{Duration, Utc};
use domain::{AlarmStatus, AlarmType, DataPoint, Device, NewAlarm, Quality};
use ems_storage::{ConfigStore, DEFAULT_ACK_USER, InMemoryConfigStore};

fn alarm(data_point_id: i64, alarm_type: AlarmType, value: f64) -> NewAlarm {
    NewAlarm {
        data_point_id,
        alarm_type,
        level: "WARNING".to_string(),
        value,
        threshold: 100.0,
        message: format!("value {value}"),
    }
}

#[tokio::test]
async fn lists_only_enabled_configuration() {
    let store = InMemoryConfigStore::new();
    let mut disabled = Device::new(2, "spare", "modbus_tcp");
    disabled.enabled = false;
    store.upsert_device(Device::new(1, "plc", "modbus_tcp")).expect("device");
    store.upsert_device(disabled).expect("device");

    let mut muted = DataPoint::new(11, 1, "spare", "2", "int16");
    muted.enabled = false;
    store
        .upsert_data_point(DataPoint::new(10, 1, "temp", "1", "int16"))
        .expect("point");
    store.upsert_data_point(muted).expect("point");
    store
        .upsert_data_point(DataPoint::new(12, 2, "other", "1", "int16"))
        .expect("point");

    let devices = store.list_enabled_devices().await.expect("devices");
    assert_eq!(devices.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1]);

    let points = store.list_enabled_data_points(1).await.expect("points");
    assert_eq!(points.iter().map(|p| p.id).collect::<Vec<_>>(), vec![10]);
    assert!(store.get_device(2).await.expect("get").is_some());
    assert!(store.get_data_point(99).await.expect("get").is_none());
}

#[tokio::test]
async fn history_retention_removes_old_samples() {
    let store = InMemoryConfigStore::new();
    let now = Utc::now();
    store
        .insert_history_sample(10, Some(1.0), Quality::Good, now - Duration::days(91))
        .await
        .expect("old");
    store
        .insert_history_sample(10, None, Quality::Bad, now)
        .await
        .expect("new");

    let removed = store
        .delete_history_older_than(now - Duration::days(90))
        .await
        .expect("purge");
    assert_eq!(removed, 1);

    let history = store.list_history(10, 10).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, None);
    assert_eq!(history[0].quality, Quality::Bad);
}

#[tokio::test]
async fn alarm_lifecycle() {
    let store = InMemoryConfigStore::new();
    let high = store
        .insert_alarm(alarm(10, AlarmType::High, 150.0))
        .await
        .expect("insert");
    assert_eq!(high.status, AlarmStatus::Active);

    let found = store
        .find_active_alarm(10, AlarmType::High)
        .await
        .expect("find")
        .expect("active");
    assert_eq!(found.id, high.id);
    assert!(store
        .find_active_alarm(10, AlarmType::Low)
        .await
        .expect("find")
        .is_none());

    assert_eq!(store.clear_active_alarms(10).await.expect("clear"), 1);
    assert_eq!(store.clear_active_alarms(10).await.expect("clear again"), 0);

    let second = store
        .insert_alarm(alarm(10, AlarmType::Low, -5.0))
        .await
        .expect("insert");
    let acked = store
        .acknowledge_alarm(second.id, None)
        .await
        .expect("ack")
        .expect("exists");
    assert_eq!(acked.status, AlarmStatus::Acknowledged);
    assert_eq!(acked.ack_user.as_deref(), Some(DEFAULT_ACK_USER));
    assert!(acked.ack_time.is_some());
    assert!(store.acknowledge_alarm(999, Some("op")).await.expect("ack").is_none());

    let all = store.list_alarms(None).await.expect("list");
    assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), vec![second.id, high.id]);
    let cleared = store
        .list_alarms(Some(AlarmStatus::Cleared))
        .await
        .expect("list");
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].id, high.id);
}
