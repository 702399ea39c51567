use domain::{AlarmStatus, AlarmType, DataPoint};
use ems_alarm::AlarmEvaluator;
use ems_storage::{ConfigStore, InMemoryConfigStore};
use std::sync::Arc;

fn boiler() -> DataPoint {
    let mut point = DataPoint::new(7, 1, "boiler", "40001", "float32");
    point.alarm_enabled = true;
    point.alarm_high = Some(100.0);
    point
}

fn setup() -> (Arc<InMemoryConfigStore>, AlarmEvaluator) {
    let store = Arc::new(InMemoryConfigStore::new());
    let evaluator = AlarmEvaluator::new(store.clone());
    (store, evaluator)
}

#[tokio::test]
async fn raises_once_and_clears_on_return() {
    let (store, evaluator) = setup();
    let point = boiler();

    let mut events = Vec::new();
    for value in [50.0, 150.0, 160.0] {
        if let Some(event) = evaluator.evaluate(&point, Some(value)).await.expect("evaluate") {
            events.push(event);
        }
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alarm_type, "HIGH");
    assert_eq!(events[0].value, 150.0);
    assert_eq!(events[0].threshold, 100.0);
    assert_eq!(
        store.list_alarms(Some(AlarmStatus::Active)).await.expect("list").len(),
        1
    );

    let event = evaluator.evaluate(&point, Some(90.0)).await.expect("evaluate");
    assert!(event.is_none());
    assert!(store
        .find_active_alarm(point.id, AlarmType::High)
        .await
        .expect("find")
        .is_none());
    let cleared = store
        .list_alarms(Some(AlarmStatus::Cleared))
        .await
        .expect("list");
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].level, "WARNING");
}

#[tokio::test]
async fn disabled_or_missing_values_are_ignored() {
    let (store, evaluator) = setup();
    let mut point = boiler();

    assert!(evaluator.evaluate(&point, None).await.expect("evaluate").is_none());
    point.alarm_enabled = false;
    assert!(evaluator.evaluate(&point, Some(500.0)).await.expect("evaluate").is_none());
    assert!(store.list_alarms(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn high_and_low_are_tracked_separately() {
    let (store, evaluator) = setup();
    let mut point = boiler();
    point.alarm_low = Some(10.0);

    evaluator.evaluate(&point, Some(5.0)).await.expect("low");
    evaluator.evaluate(&point, Some(120.0)).await.expect("high");
    evaluator.evaluate(&point, Some(4.0)).await.expect("low again");

    let active = store
        .list_alarms(Some(AlarmStatus::Active))
        .await
        .expect("list");
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|a| a.alarm_type == AlarmType::High));
    assert!(active.iter().any(|a| a.alarm_type == AlarmType::Low));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_crossings_keep_a_single_active_alarm() {
    let store = Arc::new(InMemoryConfigStore::new());
    let evaluator = Arc::new(AlarmEvaluator::new(store.clone()));
    let point = boiler();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let evaluator = Arc::clone(&evaluator);
        let point = point.clone();
        tasks.push(tokio::spawn(async move {
            evaluator
                .evaluate(&point, Some(150.0 + f64::from(i)))
                .await
                .expect("evaluate")
        }));
    }
    let mut raised = 0;
    for task in tasks {
        if task.await.expect("join").is_some() {
            raised += 1;
        }
    }

    assert_eq!(raised, 1);
    assert_eq!(
        store.list_alarms(Some(AlarmStatus::Active)).await.expect("list").len(),
        1
    );
}
