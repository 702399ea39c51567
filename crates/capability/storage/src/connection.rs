//! 数据库连接管理
//!
//! - connect_pool：建立 SQLite 连接池（文件不存在时创建）
//! - ensure_schema：按需建表、建索引
//!
//! 时间字段统一存 epoch 毫秒（INTEGER）。

use crate::error::StorageError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

const MAX_CONNECTIONS: u32 = 8;

const SCHEMA: &[&str] = &[
    "create table if not exists devices (\
        id integer primary key autoincrement, \
        name text not null, \
        type text, \
        protocol text not null, \
        connection_type text not null default 'tcp', \
        host text, \
        port integer, \
        serial_port text, \
        baud_rate integer, \
        data_bits integer, \
        stop_bits integer, \
        parity text, \
        slave_id integer, \
        rack integer, \
        slot integer, \
        timeout integer, \
        enabled integer not null default 1)",
    "create table if not exists data_points (\
        id integer primary key autoincrement, \
        device_id integer not null references devices(id) on delete cascade, \
        name text not null, \
        address text not null, \
        data_type text not null, \
        unit text, \
        scale real default 1.0, \
        \"offset\" real default 0.0, \
        description text, \
        enabled integer not null default 1, \
        alarm_enabled integer not null default 0, \
        alarm_high real, \
        alarm_low real)",
    "create table if not exists history_data (\
        id integer primary key autoincrement, \
        data_point_id integer not null references data_points(id) on delete cascade, \
        value real, \
        quality integer not null default 1, \
        ts_ms integer not null)",
    "create table if not exists alarms (\
        id integer primary key autoincrement, \
        data_point_id integer not null references data_points(id) on delete cascade, \
        alarm_type text not null, \
        alarm_level text not null, \
        value real not null, \
        threshold real, \
        message text not null, \
        status text not null default 'active', \
        ack_time_ms integer, \
        ack_user text, \
        created_at_ms integer not null)",
    "create index if not exists idx_history_ts on history_data(ts_ms)",
    "create index if not exists idx_history_point on history_data(data_point_id)",
    "create index if not exists idx_alarms_status on alarms(status)",
];

/// 建立 SQLite 连接池
///
/// 内存库（`sqlite::memory:`）每条连接各自独立，因此只保留一条常驻连接。
pub async fn connect_pool(database_url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?
    };
    Ok(pool)
}

/// 建表（幂等）
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(target: "ems.storage", tables = 4, "schema_ready");
    Ok(())
}
