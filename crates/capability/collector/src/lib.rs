//! # 周期采集调度
//!
//! [`DataCollector`] 按固定间隔执行采集轮次：
//!
//! 1. 读取启用的设备
//! 2. 每个设备一个 worker（总并发受信号量限制），未连接则先连接，失败跳过本轮
//! 3. 设备内按顺序读取启用的数据点；每个采样写历史、清理过期历史、评估报警、推送 data 事件
//!
//! 上一轮未结束时到来的 tick 直接丢弃并计数；`stop` 只停止定时器，进行中的轮次会跑完。

mod sink;

pub use sink::{BroadcastEventSink, EventSink, NoopEventSink};

use api_contract::{DataEvent, GatewayEvent};
use chrono::{SecondsFormat, Utc};
use domain::{DataPoint, Device, Sample};
use ems_alarm::{AlarmError, AlarmEvaluator};
use ems_device::{DeviceError, DeviceManager};
use ems_storage::{ConfigStore, StorageError};
use ems_telemetry::{
    new_pass_id, record_history_purged, record_history_write_failure, record_pass_completed,
    record_pass_skipped,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};

/// 采集错误（只在单个数据点范围内记录，不终止调度）。
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("alarm error: {0}")]
    Alarm(#[from] AlarmError),
    #[error("collector state lock poisoned")]
    State,
}

/// 调度参数。
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub retention_days: u32,
    pub max_concurrent_devices: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            retention_days: 90,
            max_concurrent_devices: 16,
        }
    }
}

impl CollectorConfig {
    fn sanitized(mut self) -> Self {
        if self.interval.is_zero() {
            self.interval = Self::default().interval;
        }
        if self.max_concurrent_devices == 0 {
            self.max_concurrent_devices = 1;
        }
        self
    }
}

/// 单轮采集统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub devices: usize,
    pub devices_skipped: usize,
    pub samples: usize,
    pub bad_samples: usize,
}

#[derive(Debug, Default)]
struct DeviceOutcome {
    skipped: bool,
    samples: usize,
    bad_samples: usize,
}

struct CollectorInner {
    store: Arc<dyn ConfigStore>,
    devices: Arc<DeviceManager>,
    alarms: AlarmEvaluator,
    sink: Arc<dyn EventSink>,
    config: CollectorConfig,
    pass_guard: Arc<tokio::sync::Mutex<()>>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    ticker: JoinHandle<()>,
}

/// 采集调度器（stopped / running）。
pub struct DataCollector {
    inner: Arc<CollectorInner>,
    running: Mutex<Option<Running>>,
}

impl DataCollector {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        devices: Arc<DeviceManager>,
        sink: Arc<dyn EventSink>,
        config: CollectorConfig,
    ) -> Self {
        let inner = CollectorInner {
            alarms: AlarmEvaluator::new(Arc::clone(&store)),
            store,
            devices,
            sink,
            config: config.sanitized(),
            pass_guard: Arc::new(tokio::sync::Mutex::new(())),
        };
        Self {
            inner: Arc::new(inner),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// 启动定时采集，并在返回前完成一轮采集。已运行时只记录告警。
    pub async fn start(&self) -> Result<(), CollectorError> {
        {
            let mut running = self.running.lock().map_err(|_| CollectorError::State)?;
            if running.is_some() {
                warn!(target: "ems.collector", "collector_already_running");
                return Ok(());
            }
            let (shutdown, shutdown_rx) = watch::channel(false);
            let ticker = tokio::spawn(tick_loop(Arc::clone(&self.inner), shutdown_rx));
            *running = Some(Running { shutdown, ticker });
        }
        info!(
            target: "ems.collector",
            interval_ms = self.inner.config.interval.as_millis() as u64,
            retention_days = self.inner.config.retention_days,
            max_concurrent_devices = self.inner.config.max_concurrent_devices,
            "collector_started"
        );

        let _guard = self.inner.pass_guard.lock().await;
        run_pass(&self.inner).await;
        Ok(())
    }

    /// 停止定时器并等待进行中的轮次结束。未运行时为空操作。
    pub async fn stop(&self) -> Result<(), CollectorError> {
        let running = self
            .running
            .lock()
            .map_err(|_| CollectorError::State)?
            .take();
        let Some(running) = running else {
            debug!(target: "ems.collector", "collector_not_running");
            return Ok(());
        };
        let _ = running.shutdown.send(true);
        if let Err(err) = running.ticker.await {
            warn!(target: "ems.collector", error = %err, "collector_ticker_join_failed");
        }
        let _guard = self.inner.pass_guard.lock().await;
        info!(target: "ems.collector", "collector_stopped");
        Ok(())
    }

    /// 立即执行一轮采集（与定时轮次互斥）。
    pub async fn collect_once(&self) -> PassSummary {
        let _guard = self.inner.pass_guard.lock().await;
        run_pass(&self.inner).await
    }
}

async fn tick_loop(inner: Arc<CollectorInner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        match Arc::clone(&inner.pass_guard).try_lock_owned() {
            Ok(guard) => {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let _guard = guard;
                    run_pass(&inner).await;
                });
            }
            Err(_) => {
                record_pass_skipped();
                warn!(target: "ems.collector", "collection_pass_skipped");
            }
        }
    }
}

async fn run_pass(inner: &Arc<CollectorInner>) -> PassSummary {
    let span = info_span!("collection_pass", pass_id = %new_pass_id());
    collect_pass(inner).instrument(span).await
}

async fn collect_pass(inner: &Arc<CollectorInner>) -> PassSummary {
    let started_at = Instant::now();
    let devices = match inner.store.list_enabled_devices().await {
        Ok(devices) => devices,
        Err(err) => {
            warn!(target: "ems.collector", error = %err, "device_list_failed");
            return PassSummary::default();
        }
    };

    let permits = Arc::new(Semaphore::new(inner.config.max_concurrent_devices));
    let mut workers = JoinSet::new();
    for device in devices {
        let inner = Arc::clone(inner);
        let permits = Arc::clone(&permits);
        workers.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return DeviceOutcome {
                        skipped: true,
                        ..DeviceOutcome::default()
                    };
                };
                collect_device(&inner, &device).await
            }
            .in_current_span(),
        );
    }

    let mut summary = PassSummary::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(outcome) => {
                summary.devices += 1;
                if outcome.skipped {
                    summary.devices_skipped += 1;
                }
                summary.samples += outcome.samples;
                summary.bad_samples += outcome.bad_samples;
            }
            Err(err) => {
                warn!(target: "ems.collector", error = %err, "device_worker_failed");
            }
        }
    }

    let duration_ms = started_at.elapsed().as_millis() as u64;
    record_pass_completed(duration_ms);
    info!(
        target: "ems.collector",
        devices = summary.devices,
        devices_skipped = summary.devices_skipped,
        samples = summary.samples,
        bad_samples = summary.bad_samples,
        duration_ms,
        "collection_pass_finished"
    );
    summary
}

async fn collect_device(inner: &CollectorInner, device: &Device) -> DeviceOutcome {
    if !inner.devices.is_device_connected(device.id).await
        && let Err(err) = inner.devices.connect_device(device).await
    {
        warn!(
            target: "ems.collector",
            device_id = device.id,
            device_name = %device.name,
            error = %err,
            "device_connect_failed"
        );
        return DeviceOutcome {
            skipped: true,
            ..DeviceOutcome::default()
        };
    }

    let points = match inner.store.list_enabled_data_points(device.id).await {
        Ok(points) => points,
        Err(err) => {
            warn!(target: "ems.collector", device_id = device.id, error = %err, "data_point_list_failed");
            return DeviceOutcome::default();
        }
    };

    let mut outcome = DeviceOutcome::default();
    for point in &points {
        match collect_point(inner, device, point).await {
            Ok(sample) => {
                outcome.samples += 1;
                if !sample.quality.is_good() {
                    outcome.bad_samples += 1;
                }
            }
            Err(err) => {
                warn!(
                    target: "ems.collector",
                    device_id = device.id,
                    data_point_id = point.id,
                    data_point_name = %point.name,
                    error = %err,
                    "data_point_collect_failed"
                );
            }
        }
    }
    outcome
}

async fn collect_point(
    inner: &CollectorInner,
    device: &Device,
    point: &DataPoint,
) -> Result<Sample, CollectorError> {
    let sample = inner.devices.read_data_point(device.id, point).await?;

    if let Err(err) = save_history(inner, point, &sample).await {
        record_history_write_failure();
        warn!(
            target: "ems.collector",
            data_point_id = point.id,
            error = %err,
            "history_write_failed"
        );
    }

    if let Some(alarm) = inner.alarms.evaluate(point, sample.value).await? {
        inner.sink.publish(GatewayEvent::Alarm(alarm));
    }

    inner.sink.publish(GatewayEvent::Data(DataEvent {
        device_id: device.id,
        device_name: device.name.clone(),
        data_point_id: point.id,
        data_point_name: point.name.clone(),
        value: sample.value,
        quality: sample.quality.as_u8(),
        timestamp: sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    }));
    Ok(sample)
}

/// 写入历史采样，成功后清理保留期之外的旧数据。
async fn save_history(
    inner: &CollectorInner,
    point: &DataPoint,
    sample: &Sample,
) -> Result<(), CollectorError> {
    inner
        .store
        .insert_history_sample(point.id, sample.value, sample.quality, sample.timestamp)
        .await?;

    let cutoff = Utc::now() - chrono::Duration::days(i64::from(inner.config.retention_days));
    let purged = inner.store.delete_history_older_than(cutoff).await?;
    if purged > 0 {
        record_history_purged(purged);
        info!(target: "ems.collector", purged, "history_purged");
    }
    Ok(())
}
