//! 行存储（Row Store）
//!
//! 备份导入/导出只通过本模块暴露的接口访问数据库：
//! - [`RowStore`]: 查询、插入、事务、外键约束延迟
//! - [`Cursor`]: 按表组装一行待插入的数据
//! - [`RowSet`] / [`Row`]: 查询结果
//! - [`SqliteStore`]: 基于 rusqlite 的实现
//!
//! 表名一律传入不带前缀的逻辑名（如 `post`），由 [`RowStore::table`] 拼接前缀。

mod manager;
pub mod schema;

pub use manager::DatabaseManager;

use indexmap::IndexMap;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::fmt;
use std::ops::Deref;
use tracing::debug;

pub type SqlitePool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;
pub type SqlitePooledConnection = r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>;

/// 行存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row consumer failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// SQL 方言，只影响外键约束开关语句
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
    Postgresql,
}

impl Dialect {
    /// 进入/离开约束延迟窗口时执行的语句
    pub fn constraint_toggle_sql(&self, deferred: bool) -> &'static str {
        match (self, deferred) {
            (Dialect::Mysql, true) => "SET foreign_key_checks = 0",
            (Dialect::Mysql, false) => "SET foreign_key_checks = 1",
            (Dialect::Postgresql, true) => "SET CONSTRAINTS ALL DEFERRED",
            (Dialect::Postgresql, false) => "SET CONSTRAINTS ALL IMMEDIATE",
            (Dialect::Sqlite, true) => "PRAGMA defer_foreign_keys = ON",
            (Dialect::Sqlite, false) => "PRAGMA defer_foreign_keys = OFF",
        }
    }
}

/// 单个字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    /// 备份文件中的字符串形式，NULL 写成空串
    pub fn to_backup_string(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Real(v) => v.to_string(),
            FieldValue::Text(v) => v.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Null => None,
            FieldValue::Int(v) => Some(*v),
            FieldValue::Real(v) => Some(*v as i64),
            FieldValue::Text(v) => v.trim().parse().ok(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.to_backup_string()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(v: Option<i64>) -> Self {
        v.map(FieldValue::Int).unwrap_or(FieldValue::Null)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<ValueRef<'_>> for FieldValue {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Int(i),
            ValueRef::Real(r) => FieldValue::Real(r),
            ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => FieldValue::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            FieldValue::Int(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            FieldValue::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            FieldValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

/// 查询结果中的一行（借用列名与值）
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [FieldValue],
}

impl<'a> Row<'a> {
    pub fn new(columns: &'a [String], values: &'a [FieldValue]) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> &'a [FieldValue] {
        self.values
    }

    /// 按列名取值
    pub fn f(&self, column: &str) -> Option<&'a FieldValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.f(column).and_then(FieldValue::as_i64)
    }

    pub fn get_string(&self, column: &str) -> String {
        self.f(column)
            .map(FieldValue::to_backup_string)
            .unwrap_or_default()
    }
}

/// 已物化的查询结果
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<FieldValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<FieldValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row::new(&self.columns, values))
    }

    pub fn first(&self) -> Option<Row<'_>> {
        self.iter().next()
    }
}

/// 一行待插入数据，对应原系统中按表打开的游标
#[derive(Debug, Clone)]
pub struct Cursor {
    table: String,
    fields: IndexMap<String, FieldValue>,
}

impl Cursor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// 清空已赋值字段，游标可复用
    pub fn clean(&mut self) {
        self.fields.clear();
    }

    pub fn set(&mut self, column: &str, value: impl Into<FieldValue>) {
        self.fields.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }

    pub fn fields(&self) -> &IndexMap<String, FieldValue> {
        &self.fields
    }

    pub fn insert(&self, store: &dyn RowStore) -> StoreResult<()> {
        store.insert(&self.table, &self.fields)
    }
}

/// 导入/导出所依赖的数据库能力
pub trait RowStore {
    fn dialect(&self) -> Dialect;

    /// 表名前缀（如 `dc_`）
    fn prefix(&self) -> &str;

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    fn open_cursor(&self, table: &str) -> Cursor {
        Cursor::new(table)
    }

    fn select(&self, sql: &str, params: &[FieldValue]) -> StoreResult<RowSet>;

    /// 流式遍历查询结果，返回行数
    fn for_each_row(
        &self,
        sql: &str,
        params: &[FieldValue],
        f: &mut dyn FnMut(Row<'_>) -> std::io::Result<()>,
    ) -> StoreResult<usize>;

    fn execute(&self, sql: &str, params: &[FieldValue]) -> StoreResult<usize>;

    fn insert(&self, table: &str, fields: &IndexMap<String, FieldValue>) -> StoreResult<()>;

    fn begin(&self) -> StoreResult<()>;

    fn commit(&self) -> StoreResult<()>;

    fn rollback(&self) -> StoreResult<()>;

    /// 把字符串转义为 SQL 字面量内容（单引号加倍）
    ///
    /// 导入/导出本身走参数绑定；供扩展拼接原始 SQL 时使用。
    fn escape_str(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn set_constraints_deferred(&self, deferred: bool) -> StoreResult<()> {
        self.execute(self.dialect().constraint_toggle_sql(deferred), &[])
            .map(|_| ())
    }
}

/// SQLite 行存储
///
/// `C` 可以是独占连接（`Box<Connection>`）或连接池连接。
pub struct SqliteStore<C = Box<Connection>> {
    conn: C,
    prefix: String,
}

impl SqliteStore<Box<Connection>> {
    pub fn new(conn: Connection, prefix: impl Into<String>) -> Self {
        Self::with_connection(Box::new(conn), prefix)
    }
}

impl<C: Deref<Target = Connection>> SqliteStore<C> {
    pub fn with_connection(conn: C, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl<C: Deref<Target = Connection>> RowStore for SqliteStore<C> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn select(&self, sql: &str, params: &[FieldValue]) -> StoreResult<RowSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(FieldValue::from(row.get_ref(idx)?));
            }
            out.push(values);
        }
        Ok(RowSet::new(columns, out))
    }

    fn for_each_row(
        &self,
        sql: &str,
        params: &[FieldValue],
        f: &mut dyn FnMut(Row<'_>) -> std::io::Result<()>,
    ) -> StoreResult<usize> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut values = Vec::with_capacity(columns.len());
        let mut count = 0;
        while let Some(row) = rows.next()? {
            values.clear();
            for idx in 0..columns.len() {
                values.push(FieldValue::from(row.get_ref(idx)?));
            }
            f(Row::new(&columns, &values))?;
            count += 1;
        }
        Ok(count)
    }

    fn execute(&self, sql: &str, params: &[FieldValue]) -> StoreResult<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn insert(&self, table: &str, fields: &IndexMap<String, FieldValue>) -> StoreResult<()> {
        let columns: Vec<String> = fields.keys().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table(table)),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(fields.values()))?;
        Ok(())
    }

    fn begin(&self) -> StoreResult<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| StoreError::Transaction(format!("BEGIN failed: {}", e)))
    }

    fn commit(&self) -> StoreResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StoreError::Transaction(format!("COMMIT failed: {}", e)))
    }

    fn rollback(&self) -> StoreResult<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| StoreError::Transaction(format!("ROLLBACK failed: {}", e)))
    }

    fn set_constraints_deferred(&self, deferred: bool) -> StoreResult<()> {
        debug!("[SqliteStore] defer_foreign_keys = {}", deferred);
        self.conn
            .pragma_update(None, "defer_foreign_keys", deferred)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t_item (id INTEGER PRIMARY KEY, name TEXT, score REAL, note TEXT);",
        )
        .unwrap();
        SqliteStore::new(conn, "t_")
    }

    #[test]
    fn test_constraint_toggle_sql_per_dialect() {
        assert_eq!(
            Dialect::Mysql.constraint_toggle_sql(true),
            "SET foreign_key_checks = 0"
        );
        assert_eq!(
            Dialect::Mysql.constraint_toggle_sql(false),
            "SET foreign_key_checks = 1"
        );
        assert_eq!(
            Dialect::Postgresql.constraint_toggle_sql(true),
            "SET CONSTRAINTS ALL DEFERRED"
        );
        assert_eq!(
            Dialect::Postgresql.constraint_toggle_sql(false),
            "SET CONSTRAINTS ALL IMMEDIATE"
        );
    }

    #[test]
    fn test_cursor_insert_and_select() {
        let store = memory_store();
        let mut cur = store.open_cursor("item");
        cur.set("id", 7i64);
        cur.set("name", "seven");
        cur.set("score", FieldValue::Real(1.5));
        cur.set("note", FieldValue::Null);
        cur.insert(&store).unwrap();

        let rs = store
            .select(
                &format!("SELECT * FROM {} WHERE id = ?1", store.table("item")),
                &[FieldValue::Int(7)],
            )
            .unwrap();
        assert_eq!(rs.len(), 1);
        let row = rs.first().unwrap();
        assert_eq!(row.get_i64("id"), Some(7));
        assert_eq!(row.get_string("name"), "seven");
        assert_eq!(row.get_string("score"), "1.5");
        assert!(row.f("note").unwrap().is_null());
        assert_eq!(row.get_string("note"), "");
    }

    #[test]
    fn test_escape_str_makes_literal_safe() {
        let store = memory_store();
        let name = store.escape_str("O'Brien");
        assert_eq!(name, "O''Brien");
        store
            .execute(&format!("INSERT INTO t_item (id, name) VALUES (3, '{}')", name), &[])
            .unwrap();
        let rs = store.select("SELECT name FROM t_item WHERE id = 3", &[]).unwrap();
        assert_eq!(rs.first().unwrap().get_string("name"), "O'Brien");
    }

    #[test]
    fn test_cursor_clean_resets_fields() {
        let mut cur = Cursor::new("item");
        cur.set("id", 1i64);
        cur.clean();
        assert!(cur.fields().is_empty());
        assert_eq!(cur.table(), "item");
    }

    #[test]
    fn test_rollback_discards_rows() {
        let store = memory_store();
        store.begin().unwrap();
        let mut cur = store.open_cursor("item");
        cur.set("id", 1i64);
        cur.insert(&store).unwrap();
        store.rollback().unwrap();

        let rs = store.select("SELECT * FROM t_item", &[]).unwrap();
        assert!(rs.is_empty());
    }

    #[test]
    fn test_for_each_row_streams_in_order() {
        let store = memory_store();
        for (id, name) in [(1i64, "a"), (2, "b"), (3, "c")] {
            let mut cur = store.open_cursor("item");
            cur.set("id", id);
            cur.set("name", name);
            cur.insert(&store).unwrap();
        }

        let mut names = Vec::new();
        let count = store
            .for_each_row("SELECT name FROM t_item ORDER BY id", &[], &mut |row| {
                names.push(row.get_string("name"));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_field_value_text_parses_as_int() {
        assert_eq!(FieldValue::from(" 42 ").as_i64(), Some(42));
        assert_eq!(FieldValue::from("x").as_i64(), None);
        assert_eq!(FieldValue::from(true), FieldValue::Int(1));
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
    }
}
