//! 平面备份导出
//!
//! 每个表或查询写成一个段：结果为空时什么都不写（连段头也不写），
//! 导入端把缺失的段视为“没有数据”。每个段写完后立即 flush，
//! 进程中断时文件至少在最后一个完整段之前是完整的。
//!
//! 标记行由调用方在第一个段之前写入（见 [`write_marker`]）。

use indexmap::IndexMap;
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

use super::codec::encode;
use super::{blog_public_path, BackupMode, Result, MARKER_PREFIX};
use crate::database::{FieldValue, RowStore};

/// 全站备份导出的表，按导入时的依赖顺序排列
pub const FULL_EXPORT_TABLES: &[&str] = &[
    "blog",
    "category",
    "link",
    "setting",
    "user",
    "pref",
    "permissions",
    "post",
    "meta",
    "media",
    "post_media",
    "log",
    "ping",
    "comment",
    "spamrule",
];

/// 写入标记行
pub fn write_marker(out: &mut dyn Write, version: &str, mode: BackupMode) -> std::io::Result<()> {
    writeln!(out, "{}{}|{}", MARKER_PREFIX, version, mode.as_str())?;
    out.flush()
}

/// 导出扩展点：插件可以在核心段之后追加自己的段
pub trait ExportExtension {
    fn export_single(&self, _exp: &mut FlatExport<'_>, _blog_id: &str) -> Result<()> {
        Ok(())
    }

    fn export_full(&self, _exp: &mut FlatExport<'_>) -> Result<()> {
        Ok(())
    }
}

/// 导出统计
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub mode: BackupMode,
    pub version: String,
    /// 段名 → 行数（只含非空段）
    pub sections: IndexMap<String, usize>,
}

impl ExportReport {
    pub fn total_rows(&self) -> usize {
        self.sections.values().sum()
    }
}

pub struct FlatExport<'a> {
    store: &'a dyn RowStore,
    out: &'a mut dyn Write,
    sections: IndexMap<String, usize>,
}

impl<'a> FlatExport<'a> {
    pub fn new(store: &'a dyn RowStore, out: &'a mut dyn Write) -> Self {
        Self {
            store,
            out,
            sections: IndexMap::new(),
        }
    }

    pub fn store(&self) -> &'a dyn RowStore {
        self.store
    }

    /// 导出一个查询为段，返回行数
    pub fn export_query(&mut self, section: &str, sql: &str, params: &[FieldValue]) -> Result<usize> {
        let out = &mut *self.out;
        let mut header_written = false;
        let mut fields: Vec<String> = Vec::new();

        let count = self.store.for_each_row(sql, params, &mut |row| {
            if !header_written {
                write!(out, "\n[{} {}]\n", section, row.columns().join(","))?;
                header_written = true;
            }
            fields.clear();
            fields.extend(row.values().iter().map(FieldValue::to_backup_string));
            out.write_all(encode(&fields).as_bytes())
        })?;

        if count > 0 {
            self.out.flush()?;
            *self.sections.entry(section.to_string()).or_insert(0) += count;
        }
        debug!("[FlatExport] Section '{}': {} rows", section, count);
        Ok(count)
    }

    /// 导出整张表
    pub fn export_table(&mut self, table: &str) -> Result<usize> {
        let sql = format!("SELECT * FROM {}", self.store.table(table));
        self.export_query(table, &sql, &[])
    }

    /// 导出全站备份的全部表
    pub fn export_all(&mut self) -> Result<()> {
        for table in FULL_EXPORT_TABLES {
            self.export_table(table)?;
        }
        Ok(())
    }

    pub fn sections(&self) -> &IndexMap<String, usize> {
        &self.sections
    }

    fn into_report(self, mode: BackupMode, version: &str) -> ExportReport {
        ExportReport {
            mode,
            version: version.to_string(),
            sections: self.sections,
        }
    }
}

/// 导出单个博客
pub fn export_blog(
    store: &dyn RowStore,
    out: &mut dyn Write,
    blog_id: &str,
    version: &str,
    extensions: &[Box<dyn ExportExtension>],
) -> Result<ExportReport> {
    write_marker(out, version, BackupMode::Single)?;

    let blog = [FieldValue::from(blog_id)];
    let public_path = blog_public_path(store, blog_id)?;
    let t = |name: &str| store.table(name);

    let mut exp = FlatExport::new(store, out);
    for table in ["category", "link", "setting", "post"] {
        let sql = format!("SELECT * FROM {} WHERE blog_id = ?1", t(table));
        exp.export_query(table, &sql, &blog)?;
    }
    exp.export_query(
        "meta",
        &format!(
            "SELECT meta_id, meta_type, M.post_id FROM {} M, {} P \
             WHERE P.post_id = M.post_id AND P.blog_id = ?1",
            t("meta"),
            t("post")
        ),
        &blog,
    )?;
    exp.export_query(
        "media",
        &format!("SELECT * FROM {} WHERE media_path = ?1", t("media")),
        &[FieldValue::from(public_path)],
    )?;
    exp.export_query(
        "post_media",
        &format!(
            "SELECT media_id, M.post_id, M.link_type FROM {} M, {} P \
             WHERE P.post_id = M.post_id AND P.blog_id = ?1",
            t("post_media"),
            t("post")
        ),
        &blog,
    )?;
    exp.export_query(
        "ping",
        &format!(
            "SELECT ping.post_id, ping_url, ping_dt FROM {} ping, {} P \
             WHERE P.post_id = ping.post_id AND P.blog_id = ?1",
            t("ping"),
            t("post")
        ),
        &blog,
    )?;
    exp.export_query(
        "comment",
        &format!(
            "SELECT C.* FROM {} C, {} P WHERE P.post_id = C.post_id AND P.blog_id = ?1",
            t("comment"),
            t("post")
        ),
        &blog,
    )?;

    for ext in extensions {
        ext.export_single(&mut exp, blog_id)?;
    }

    let report = exp.into_report(BackupMode::Single, version);
    info!(
        "[FlatExport] Blog '{}' exported: {} sections, {} rows",
        blog_id,
        report.sections.len(),
        report.total_rows()
    );
    Ok(report)
}

/// 导出全站
pub fn export_full(
    store: &dyn RowStore,
    out: &mut dyn Write,
    version: &str,
    extensions: &[Box<dyn ExportExtension>],
) -> Result<ExportReport> {
    write_marker(out, version, BackupMode::Full)?;

    let mut exp = FlatExport::new(store, out);
    exp.export_all()?;
    for ext in extensions {
        ext.export_full(&mut exp)?;
    }

    let report = exp.into_report(BackupMode::Full, version);
    info!(
        "[FlatExport] Full export: {} sections, {} rows",
        report.sections.len(),
        report.total_rows()
    );
    Ok(report)
}
