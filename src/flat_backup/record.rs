//! 备份记录
//!
//! 一条数据行解码后的字段表，带所属段名与源文件行号。
//! 字段值一律为字符串，类型转换集中在 `as_*` 方法中。

use indexmap::IndexMap;

use crate::database::schema::ColumnKind;
use crate::database::FieldValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    section: String,
    line: usize,
    fields: IndexMap<String, String>,
}

impl Record {
    pub fn new(section: impl Into<String>, line: usize, fields: IndexMap<String, String>) -> Self {
        Self {
            section: section.into(),
            line,
            fields,
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    /// 旧版本文件的段名与当前不同时使用
    pub fn set_section(&mut self, section: impl Into<String>) {
        self.section = section.into();
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn exists(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn drop(&mut self, names: &[&str]) {
        for name in names {
            self.fields.shift_remove(*name);
        }
    }

    /// 重命名字段；新名已存在时被覆盖。旧字段不存在时不做任何事。
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        if let Some(value) = self.fields.shift_remove(old) {
            self.fields.insert(new.to_string(), value);
        }
    }

    pub fn as_str(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// 缺失或无法解析时为 0
    pub fn as_int(&self, name: &str) -> i64 {
        self.as_opt_int(name).unwrap_or(0)
    }

    /// 空串（即导出时的 NULL）为 `None`
    pub fn as_opt_int(&self, name: &str) -> Option<i64> {
        let raw = self.as_str(name).trim();
        if raw.is_empty() {
            return None;
        }
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))
    }

    /// `1`、`t`、`true`、`y`、`yes`、`on` 为真（不区分大小写）
    pub fn as_bool(&self, name: &str) -> bool {
        matches!(
            self.as_str(name).trim().to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "y" | "yes" | "on"
        )
    }

    /// 按列类型转换为数据库值
    pub fn as_value(&self, name: &str, kind: ColumnKind) -> FieldValue {
        match kind {
            ColumnKind::Text => FieldValue::Text(self.as_str(name).to_string()),
            ColumnKind::Int => FieldValue::Int(self.as_int(name)),
            ColumnKind::OptInt => FieldValue::from(self.as_opt_int(name)),
            ColumnKind::Bool => FieldValue::from(self.as_bool(name)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
