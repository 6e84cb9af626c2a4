//! 全站导入
//!
//! 先清空博客、媒体、垃圾规则、设置与日志表（其余博客数据随外键级联删除），
//! 然后按段名原样写入对应的表，只做列类型转换。
//! 用户表不清空：已存在的用户与偏好设置跳过。

use tracing::{debug, info};

use super::{insert_record, HandlerRegistry, ModeState, RowOutcome};
use crate::database::{FieldValue, RowStore};
use crate::flat_backup::export::FULL_EXPORT_TABLES;
use crate::flat_backup::record::Record;
use crate::flat_backup::Result;

/// 导入前清空的表
const WIPED_TABLES: &[&str] = &["blog", "media", "spamrule", "setting", "log"];

pub(crate) struct FullImport<'a> {
    store: &'a dyn RowStore,
}

impl<'a> FullImport<'a> {
    pub fn prepare(store: &'a dyn RowStore) -> Result<Self> {
        for table in WIPED_TABLES {
            let removed = store.execute(&format!("DELETE FROM {}", store.table(table)), &[])?;
            debug!("[FlatImport] Cleared {} rows from '{}'", removed, table);
        }
        info!("[FlatImport] Instance content cleared for full import");
        Ok(Self { store })
    }

    fn exists(&self, table: &str, keys: &[(&str, &str)]) -> Result<bool> {
        let conditions: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{} = ?{}", column, idx + 1))
            .collect();
        let sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            self.store.table(table),
            conditions.join(" AND ")
        );
        let params: Vec<FieldValue> = keys.iter().map(|(_, v)| FieldValue::from(*v)).collect();
        Ok(!self.store.select(&sql, &params)?.is_empty())
    }

    fn import_row(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let table = rec.section().to_string();
        insert_record(self.store, &table, rec)?;
        Ok(RowOutcome::Inserted)
    }

    fn import_user(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        if self.exists("user", &[("user_id", rec.as_str("user_id"))])? {
            debug!("[FlatImport] User '{}' already exists", rec.as_str("user_id"));
            return Ok(RowOutcome::Skipped);
        }
        insert_record(self.store, "user", rec)?;
        Ok(RowOutcome::Inserted)
    }

    fn import_pref(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let keys = [
            ("pref_ws", rec.as_str("pref_ws")),
            ("pref_id", rec.as_str("pref_id")),
            ("user_id", rec.as_str("user_id")),
        ];
        if self.exists("pref", &keys)? {
            return Ok(RowOutcome::Skipped);
        }
        insert_record(self.store, "pref", rec)?;
        Ok(RowOutcome::Inserted)
    }
}

impl ModeState for FullImport<'_> {
    fn registry() -> HandlerRegistry<Self> {
        let mut registry: HandlerRegistry<Self> = HandlerRegistry::new();
        for table in FULL_EXPORT_TABLES {
            registry.register(*table, Self::import_row);
        }
        registry
            .register("user", Self::import_user)
            .register("pref", Self::import_pref);
        registry
    }
}
