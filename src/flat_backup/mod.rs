//! # 平面文件备份（Flat Backup）
//!
//! 博客数据库的文本备份格式与导入/导出流程。
//!
//! ## 文件格式
//!
//! ```text
//! ///DOTCLEAR|<version>|<single|full>
//!
//! [post post_id,blog_id,post_title]
//! "1","default","Hello \"world\""
//! "2","default","Line\nbreak"
//!
//! [comment comment_id,post_id,comment_content]
//! ...
//! ```
//!
//! - 第一行为标记行，声明版本与模式
//! - `[名称 列1,列2,...]` 开始一个段
//! - 数据行由带引号、转义后的字段以逗号连接而成
//!
//! ## 组件
//!
//! - `codec`: 单行编解码
//! - `record`: 一行解码后的字段表
//! - `reader`: 按段流式读取记录
//! - `export`: 把表/查询写成段
//! - `import`: 单博客 / 全站导入
//! - `archive`: zip 打包与解包

pub mod archive;
pub mod codec;
pub mod export;
pub mod import;
pub mod reader;
pub mod record;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::{FieldValue, RowStore, StoreError};

pub use codec::{decode, encode, CodecError};
pub use export::{export_blog, export_full, write_marker, ExportExtension, ExportReport, FlatExport};
pub use import::{FlatImport, ImportContext, ImportExtension, ImportReport};
pub use reader::FlatBackup;
pub use record::Record;

/// 标记行前缀
pub const MARKER_PREFIX: &str = "///DOTCLEAR|";

/// 未配置公共目录时的默认值
pub const DEFAULT_PUBLIC_PATH: &str = "public";

/// 备份模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// 单个博客，导入时重新分配主键
    Single,
    /// 整个站点，导入时原样回放
    Full,
}

impl BackupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Single => "single",
            BackupMode::Full => "full",
        }
    }

    /// 标记行中的模式字段，非 `full` 一律视为 `single`
    pub fn from_marker(value: &str) -> Self {
        if value.trim() == "full" {
            BackupMode::Full
        } else {
            BackupMode::Single
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单博客导入时需要重新分配主键的实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Category,
    Link,
    Post,
    Media,
    Comment,
    Log,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Category,
        EntityKind::Link,
        EntityKind::Post,
        EntityKind::Media,
        EntityKind::Comment,
        EntityKind::Log,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Link => "link",
            EntityKind::Post => "post",
            EntityKind::Media => "media",
            EntityKind::Comment => "comment",
            EntityKind::Log => "log",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            EntityKind::Category => "cat_id",
            EntityKind::Link => "link_id",
            EntityKind::Post => "post_id",
            EntityKind::Media => "media_id",
            EntityKind::Comment => "comment_id",
            EntityKind::Log => "log_id",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// 平面备份错误
#[derive(Debug, thiserror::Error)]
pub enum FlatBackupError {
    #[error("File is not readable: {path}")]
    FileNotReadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to read backup file: {0}")]
    UnreadableFile(String),

    #[error("File is not a backup file")]
    NotABackupFile,

    #[error("Invalid data at line {line}: expected {expected} columns, found {found}")]
    ColumnCountMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid data at line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("Invalid data at line {line}: no section header before data")]
    DataBeforeHeader { line: usize },

    #[error("The related {kind} does not exist (line {line})")]
    DanglingReference { kind: EntityKind, line: usize },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Backup mode mismatch: expected {expected}, file declares {found}")]
    ModeMismatch {
        expected: BackupMode,
        found: BackupMode,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{source} (line {line})")]
    AtLine {
        line: usize,
        #[source]
        source: Box<FlatBackupError>,
    },
}

impl FlatBackupError {
    /// 出错的源文件行号（如果有）
    pub fn line(&self) -> Option<usize> {
        match self {
            FlatBackupError::ColumnCountMismatch { line, .. }
            | FlatBackupError::MalformedLine { line, .. }
            | FlatBackupError::DataBeforeHeader { line }
            | FlatBackupError::DanglingReference { line, .. }
            | FlatBackupError::AtLine { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// 为不带行号的错误补上行号
    pub fn with_line(self, line: usize) -> Self {
        if self.line().is_some() {
            self
        } else {
            FlatBackupError::AtLine {
                line,
                source: Box::new(self),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FlatBackupError>;

/// 博客公共目录（媒体路径），来自 `system.public_path` 设置
pub fn blog_public_path(store: &dyn RowStore, blog_id: &str) -> Result<String> {
    let sql = format!(
        "SELECT setting_value FROM {} WHERE blog_id = ?1 AND setting_ns = 'system' AND setting_id = 'public_path'",
        store.table("setting")
    );
    let rs = store.select(&sql, &[FieldValue::from(blog_id)])?;
    Ok(rs
        .first()
        .map(|row| row.get_string("setting_value"))
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_PUBLIC_PATH.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_marker_defaults_to_single() {
        assert_eq!(BackupMode::from_marker("full"), BackupMode::Full);
        assert_eq!(BackupMode::from_marker("single"), BackupMode::Single);
        assert_eq!(BackupMode::from_marker(""), BackupMode::Single);
        assert_eq!(BackupMode::from_marker("FULL?"), BackupMode::Single);
    }

    #[test]
    fn test_with_line_keeps_existing_line() {
        let err = FlatBackupError::DanglingReference {
            kind: EntityKind::Post,
            line: 12,
        };
        assert_eq!(err.with_line(40).line(), Some(12));

        let err = FlatBackupError::Archive("boom".into()).with_line(40);
        assert_eq!(err.line(), Some(40));
        assert_eq!(err.to_string(), "Archive error: boom (line 40)");
    }

    #[test]
    fn test_dangling_reference_message_names_kind() {
        let err = FlatBackupError::DanglingReference {
            kind: EntityKind::Category,
            line: 5,
        };
        assert_eq!(err.to_string(), "The related category does not exist (line 5)");
    }
}
