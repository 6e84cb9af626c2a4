//! DatabaseManager - 连接池管理器
//!
//! 负责：
//! - r2d2 连接池管理
//! - Schema 初始化
//! - 为导入/导出提供 [`SqliteStore`]

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::schema::create_schema;
use super::{SqlitePool, SqlitePooledConnection, SqliteStore};

pub struct DatabaseManager {
    pool: SqlitePool,
    db_path: PathBuf,
    prefix: String,
}

impl DatabaseManager {
    /// 创建新的数据库管理器，使用 r2d2 连接池
    pub fn new(db_path: &Path, prefix: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建数据库目录失败: {:?}", parent))?;
            }
        }

        let pool = Self::build_pool(db_path)?;

        Ok(DatabaseManager {
            pool,
            db_path: db_path.to_path_buf(),
            prefix: prefix.to_string(),
        })
    }

    /// 获取数据库连接
    pub fn get_conn(&self) -> Result<SqlitePooledConnection> {
        self.pool.get().with_context(|| "从连接池获取连接失败")
    }

    /// 获取一个独占连接上的行存储
    ///
    /// 导入/导出在单个连接上完成，事务不跨连接。
    pub fn store(&self) -> Result<SqliteStore<SqlitePooledConnection>> {
        let conn = self.get_conn()?;
        Ok(SqliteStore::with_connection(conn, self.prefix.clone()))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 建表（已存在的表保持不变）
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;
        create_schema(&conn, &self.prefix)
            .with_context(|| format!("初始化数据库结构失败: {:?}", self.db_path))?;
        info!(
            "[DatabaseManager] Schema ready at {:?} (prefix '{}')",
            self.db_path, self.prefix
        );
        Ok(())
    }

    fn build_pool(db_path: &Path) -> Result<SqlitePool> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
            c.pragma_update(None, "foreign_keys", "ON")?;
            c.pragma_update(None, "journal_mode", "WAL")?;
            c.pragma_update(None, "synchronous", "NORMAL")?;
            // 导入可能长时间持有写锁，其他连接快速失败
            c.pragma_update(None, "busy_timeout", 3000i64)?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .with_context(|| format!("创建数据库连接池失败: {:?}", db_path))?;

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RowStore;
    use tempfile::TempDir;

    #[test]
    fn test_manager_creates_schema_and_store() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&dir.path().join("nested/blog.db"), "dc_").unwrap();
        manager.init_schema().unwrap();
        // 重复初始化不报错
        manager.init_schema().unwrap();

        let store = manager.store().unwrap();
        assert_eq!(store.table("post"), "dc_post");
        let rs = store.select("SELECT COUNT(*) AS n FROM dc_post", &[]).unwrap();
        assert_eq!(rs.first().unwrap().get_i64("n"), Some(0));
    }

    #[test]
    fn test_pool_connections_enforce_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let manager = DatabaseManager::new(&dir.path().join("blog.db"), "dc_").unwrap();
        let conn = manager.get_conn().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
