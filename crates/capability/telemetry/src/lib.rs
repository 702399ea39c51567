//! 日志初始化、采集指标与采集轮次 ID。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 网关指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub passes_completed: u64,
    pub passes_skipped: u64,
    pub pass_duration_ms_total: u64,
    pub pass_duration_ms_count: u64,
    pub connect_success: u64,
    pub connect_failure: u64,
    pub read_success: u64,
    pub read_failure: u64,
    pub write_success: u64,
    pub write_failure: u64,
    pub history_write_failure: u64,
    pub history_rows_purged: u64,
    pub alarms_raised: u64,
    pub alarms_cleared: u64,
    pub events_published: u64,
    pub events_dropped: u64,
}

/// 网关指标（进程内原子计数）。
pub struct TelemetryMetrics {
    passes_completed: AtomicU64,
    passes_skipped: AtomicU64,
    pass_duration_ms_total: AtomicU64,
    pass_duration_ms_count: AtomicU64,
    connect_success: AtomicU64,
    connect_failure: AtomicU64,
    read_success: AtomicU64,
    read_failure: AtomicU64,
    write_success: AtomicU64,
    write_failure: AtomicU64,
    history_write_failure: AtomicU64,
    history_rows_purged: AtomicU64,
    alarms_raised: AtomicU64,
    alarms_cleared: AtomicU64,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            passes_completed: AtomicU64::new(0),
            passes_skipped: AtomicU64::new(0),
            pass_duration_ms_total: AtomicU64::new(0),
            pass_duration_ms_count: AtomicU64::new(0),
            connect_success: AtomicU64::new(0),
            connect_failure: AtomicU64::new(0),
            read_success: AtomicU64::new(0),
            read_failure: AtomicU64::new(0),
            write_success: AtomicU64::new(0),
            write_failure: AtomicU64::new(0),
            history_write_failure: AtomicU64::new(0),
            history_rows_purged: AtomicU64::new(0),
            alarms_raised: AtomicU64::new(0),
            alarms_cleared: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_skipped: self.passes_skipped.load(Ordering::Relaxed),
            pass_duration_ms_total: self.pass_duration_ms_total.load(Ordering::Relaxed),
            pass_duration_ms_count: self.pass_duration_ms_count.load(Ordering::Relaxed),
            connect_success: self.connect_success.load(Ordering::Relaxed),
            connect_failure: self.connect_failure.load(Ordering::Relaxed),
            read_success: self.read_success.load(Ordering::Relaxed),
            read_failure: self.read_failure.load(Ordering::Relaxed),
            write_success: self.write_success.load(Ordering::Relaxed),
            write_failure: self.write_failure.load(Ordering::Relaxed),
            history_write_failure: self.history_write_failure.load(Ordering::Relaxed),
            history_rows_purged: self.history_rows_purged.load(Ordering::Relaxed),
            alarms_raised: self.alarms_raised.load(Ordering::Relaxed),
            alarms_cleared: self.alarms_cleared.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成采集轮次 ID，用于关联同一轮的日志。
pub fn new_pass_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录完成的采集轮次及其耗时（毫秒）。
pub fn record_pass_completed(duration_ms: u64) {
    let metrics = metrics();
    metrics.passes_completed.fetch_add(1, Ordering::Relaxed);
    metrics
        .pass_duration_ms_total
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .pass_duration_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录因上一轮未结束而跳过的 tick。
pub fn record_pass_skipped() {
    metrics().passes_skipped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_connect_success() {
    metrics().connect_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_connect_failure() {
    metrics().connect_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录数据点读取成功次数（quality = 1）。
pub fn record_read_success() {
    metrics().read_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录数据点读取失败次数（quality = 0）。
pub fn record_read_failure() {
    metrics().read_failure.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_success() {
    metrics().write_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_failure() {
    metrics().write_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录历史样本写库失败次数。
pub fn record_history_write_failure() {
    metrics()
        .history_write_failure
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录保留期清理删除的历史行数。
pub fn record_history_purged(rows: u64) {
    metrics()
        .history_rows_purged
        .fetch_add(rows, Ordering::Relaxed);
}

pub fn record_alarm_raised() {
    metrics().alarms_raised.fetch_add(1, Ordering::Relaxed);
}

pub fn record_alarm_cleared(count: u64) {
    metrics().alarms_cleared.fetch_add(count, Ordering::Relaxed);
}

/// 记录事件推送次数。
pub fn record_event_published() {
    metrics().events_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录无订阅方时丢弃的事件。
pub fn record_event_dropped() {
    metrics().events_dropped.fetch_add(1, Ordering::Relaxed);
}
