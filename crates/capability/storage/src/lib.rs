//! # EMS Storage 模块
//!
//! 采集网关的配置与历史存储抽象。
//!
//! ## 架构
//!
//! 1. **接口层** (`traits.rs`)：[`ConfigStore`]，采集引擎唯一依赖的存储接口
//! 2. **模型层** (`models.rs`)：历史记录与时间戳换算
//! 3. **错误层** (`error.rs`)：统一的 [`StorageError`]
//! 4. **连接层** (`connection.rs`)：SQLite 连接池与建表
//! 5. **实现层**：
//!    - `in_memory/`：内存实现（测试、演示）
//!    - `sqlite/`：SQLite 实现（生产）
//!
//! ## 表结构
//!
//! - `devices` / `data_points`：外部维护的配置，引擎只读（测试可用 upsert 写入）
//! - `history_data`：采样历史，`value` 可空（quality = 0）
//! - `alarms`：报警，状态 `active → cleared | acknowledged`
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use ems_storage::{ConfigStore, SqliteConfigStore};
//!
//! let store = SqliteConfigStore::connect("sqlite://gateway.db?mode=rwc").await?;
//! let devices = store.list_enabled_devices().await?;
//! ```

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use in_memory::InMemoryConfigStore;
pub use models::*;
pub use sqlite::SqliteConfigStore;
pub use traits::*;
