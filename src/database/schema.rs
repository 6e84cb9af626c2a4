//! 博客数据库表结构注册表
//!
//! 每张表登记列名与列类型，用途：
//! - 全量导入时按列类型把备份文件中的字符串转换为目标类型
//! - 单博客导入时把记录映射到游标
//! - 测试与 CLI 初始化 SQLite 结构
//!
//! 表按依赖顺序排列（被引用的表在前）。

use rusqlite::Connection;

/// 列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// 整数，空串视为 0
    Int,
    /// 可空整数，空串视为 NULL
    OptInt,
    /// 布尔，存储为 0/1
    Bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
    pub references: &'static str,
    pub on_delete: &'static str,
}

#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnKind)],
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
}

impl TableSchema {
    pub fn column_kind(&self, column: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, kind)| *kind)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_kind(column).is_some()
    }

    /// 生成 SQLite 建表语句
    pub fn create_sql(&self, prefix: &str) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|(name, kind)| {
                let ty = match kind {
                    ColumnKind::Text => "TEXT",
                    ColumnKind::Int | ColumnKind::Bool => "INTEGER NOT NULL DEFAULT 0",
                    ColumnKind::OptInt => "INTEGER",
                };
                format!("{} {}", name, ty)
            })
            .collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for fk in self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}{} ({}) ON DELETE {}",
                fk.column, prefix, fk.table, fk.references, fk.on_delete
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {}{} (\n  {}\n)",
            prefix,
            self.name,
            parts.join(",\n  ")
        )
    }
}

use ColumnKind::{Bool, Int, OptInt, Text};

const fn fk(
    column: &'static str,
    table: &'static str,
    references: &'static str,
    on_delete: &'static str,
) -> ForeignKey {
    ForeignKey {
        column,
        table,
        references,
        on_delete,
    }
}

pub static TABLES: &[TableSchema] = &[
    TableSchema {
        name: "blog",
        columns: &[
            ("blog_id", Text),
            ("blog_uid", Text),
            ("blog_creadt", Text),
            ("blog_upddt", Text),
            ("blog_url", Text),
            ("blog_name", Text),
            ("blog_desc", Text),
            ("blog_status", Int),
        ],
        primary_key: &["blog_id"],
        foreign_keys: &[],
    },
    TableSchema {
        name: "user",
        columns: &[
            ("user_id", Text),
            ("user_super", Bool),
            ("user_status", Int),
            ("user_pwd", Text),
            ("user_name", Text),
            ("user_firstname", Text),
            ("user_displayname", Text),
            ("user_email", Text),
            ("user_url", Text),
            ("user_desc", Text),
            ("user_default_blog", Text),
            ("user_options", Text),
            ("user_lang", Text),
            ("user_tz", Text),
            ("user_post_status", Int),
            ("user_creadt", Text),
            ("user_upddt", Text),
        ],
        primary_key: &["user_id"],
        foreign_keys: &[],
    },
    TableSchema {
        name: "category",
        columns: &[
            ("cat_id", Int),
            ("blog_id", Text),
            ("cat_title", Text),
            ("cat_url", Text),
            ("cat_desc", Text),
            ("cat_position", Int),
            ("cat_lft", Int),
            ("cat_rgt", Int),
        ],
        primary_key: &["cat_id"],
        foreign_keys: &[fk("blog_id", "blog", "blog_id", "CASCADE")],
    },
    TableSchema {
        name: "link",
        columns: &[
            ("link_id", Int),
            ("blog_id", Text),
            ("link_href", Text),
            ("link_title", Text),
            ("link_desc", Text),
            ("link_lang", Text),
            ("link_xfn", Text),
            ("link_position", Int),
        ],
        primary_key: &["link_id"],
        foreign_keys: &[fk("blog_id", "blog", "blog_id", "CASCADE")],
    },
    TableSchema {
        name: "setting",
        columns: &[
            ("setting_id", Text),
            ("blog_id", Text),
            ("setting_ns", Text),
            ("setting_value", Text),
            ("setting_type", Text),
            ("setting_label", Text),
        ],
        primary_key: &[],
        foreign_keys: &[fk("blog_id", "blog", "blog_id", "CASCADE")],
    },
    TableSchema {
        name: "pref",
        columns: &[
            ("pref_id", Text),
            ("user_id", Text),
            ("pref_ws", Text),
            ("pref_value", Text),
            ("pref_type", Text),
            ("pref_label", Text),
        ],
        primary_key: &[],
        foreign_keys: &[fk("user_id", "user", "user_id", "CASCADE")],
    },
    TableSchema {
        name: "permissions",
        columns: &[
            ("user_id", Text),
            ("blog_id", Text),
            ("permissions", Text),
        ],
        primary_key: &["user_id", "blog_id"],
        foreign_keys: &[
            fk("user_id", "user", "user_id", "CASCADE"),
            fk("blog_id", "blog", "blog_id", "CASCADE"),
        ],
    },
    TableSchema {
        name: "post",
        columns: &[
            ("post_id", Int),
            ("blog_id", Text),
            ("user_id", Text),
            ("cat_id", OptInt),
            ("post_dt", Text),
            ("post_tz", Text),
            ("post_creadt", Text),
            ("post_upddt", Text),
            ("post_password", Text),
            ("post_type", Text),
            ("post_format", Text),
            ("post_url", Text),
            ("post_lang", Text),
            ("post_title", Text),
            ("post_excerpt", Text),
            ("post_excerpt_xhtml", Text),
            ("post_content", Text),
            ("post_content_xhtml", Text),
            ("post_notes", Text),
            ("post_meta", Text),
            ("post_words", Text),
            ("post_status", Int),
            ("post_selected", Bool),
            ("post_position", Int),
            ("post_open_comment", Bool),
            ("post_open_tb", Bool),
            ("nb_comment", Int),
            ("nb_trackback", Int),
        ],
        primary_key: &["post_id"],
        foreign_keys: &[
            fk("blog_id", "blog", "blog_id", "CASCADE"),
            fk("user_id", "user", "user_id", "CASCADE"),
            fk("cat_id", "category", "cat_id", "SET NULL"),
        ],
    },
    TableSchema {
        name: "meta",
        columns: &[("meta_id", Text), ("meta_type", Text), ("post_id", Int)],
        primary_key: &["meta_id", "meta_type", "post_id"],
        foreign_keys: &[fk("post_id", "post", "post_id", "CASCADE")],
    },
    TableSchema {
        name: "media",
        columns: &[
            ("media_id", Int),
            ("user_id", Text),
            ("media_path", Text),
            ("media_title", Text),
            ("media_file", Text),
            ("media_dir", Text),
            ("media_meta", Text),
            ("media_dt", Text),
            ("media_creadt", Text),
            ("media_upddt", Text),
            ("media_private", Bool),
        ],
        primary_key: &["media_id"],
        foreign_keys: &[fk("user_id", "user", "user_id", "CASCADE")],
    },
    TableSchema {
        name: "post_media",
        columns: &[("media_id", Int), ("post_id", Int), ("link_type", Text)],
        primary_key: &["media_id", "post_id", "link_type"],
        foreign_keys: &[
            fk("media_id", "media", "media_id", "CASCADE"),
            fk("post_id", "post", "post_id", "CASCADE"),
        ],
    },
    TableSchema {
        name: "log",
        columns: &[
            ("log_id", Int),
            ("user_id", Text),
            ("blog_id", Text),
            ("log_table", Text),
            ("log_dt", Text),
            ("log_ip", Text),
            ("log_msg", Text),
        ],
        primary_key: &["log_id"],
        foreign_keys: &[],
    },
    TableSchema {
        name: "ping",
        columns: &[("post_id", Int), ("ping_url", Text), ("ping_dt", Text)],
        primary_key: &["post_id", "ping_url"],
        foreign_keys: &[fk("post_id", "post", "post_id", "CASCADE")],
    },
    TableSchema {
        name: "comment",
        columns: &[
            ("comment_id", Int),
            ("post_id", Int),
            ("comment_dt", Text),
            ("comment_tz", Text),
            ("comment_upddt", Text),
            ("comment_author", Text),
            ("comment_email", Text),
            ("comment_site", Text),
            ("comment_content", Text),
            ("comment_words", Text),
            ("comment_ip", Text),
            ("comment_status", Int),
            ("comment_spam_status", Text),
            ("comment_spam_filter", Text),
            ("comment_trackback", Bool),
        ],
        primary_key: &["comment_id"],
        foreign_keys: &[fk("post_id", "post", "post_id", "CASCADE")],
    },
    TableSchema {
        name: "spamrule",
        columns: &[
            ("rule_id", Int),
            ("blog_id", Text),
            ("rule_type", Text),
            ("rule_content", Text),
        ],
        primary_key: &["rule_id"],
        foreign_keys: &[],
    },
];

/// 按逻辑表名查找结构
pub fn table(name: &str) -> Option<&'static TableSchema> {
    TABLES.iter().find(|t| t.name == name)
}

/// 创建全部表（幂等）
pub fn create_schema(conn: &Connection, prefix: &str) -> rusqlite::Result<()> {
    for table in TABLES {
        conn.execute_batch(&table.create_sql(prefix))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql_contains_keys() {
        let post = table("post").unwrap();
        let sql = post.create_sql("dc_");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS dc_post"));
        assert!(sql.contains("PRIMARY KEY (post_id)"));
        assert!(sql.contains("FOREIGN KEY (cat_id) REFERENCES dc_category (cat_id) ON DELETE SET NULL"));
        assert!(sql.contains("cat_id INTEGER,"));
    }

    #[test]
    fn test_referenced_tables_come_first() {
        for (idx, t) in TABLES.iter().enumerate() {
            for fk in t.foreign_keys {
                let target = TABLES.iter().position(|o| o.name == fk.table).unwrap();
                assert!(target < idx, "{} must follow {}", t.name, fk.table);
            }
        }
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn, "dc_").unwrap();
        create_schema(&conn, "dc_").unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'dc_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, TABLES.len() as i64);
    }

    #[test]
    fn test_column_kind_lookup() {
        let post = table("post").unwrap();
        assert_eq!(post.column_kind("cat_id"), Some(ColumnKind::OptInt));
        assert_eq!(post.column_kind("post_open_comment"), Some(ColumnKind::Bool));
        assert!(!post.has_column("post_titre"));
        assert!(table("nope").is_none());
    }
}
