//! Flat backup library entry
//! 博客数据库的平面文件备份与恢复，供 bin 目标与宿主应用调用。

pub mod auth;
pub mod backup_common;
pub mod backup_config;
pub mod database;
pub mod flat_backup;
pub mod test_utils;

pub use auth::{AuthContext, StaticAuth};
pub use backup_config::BackupConfig;
pub use database::{DatabaseManager, RowStore, SqliteStore};
pub use flat_backup::{BackupMode, FlatBackupError, FlatImport, ImportReport};
