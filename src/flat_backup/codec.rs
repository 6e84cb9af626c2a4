//! 单行编解码
//!
//! 字段转义规则：`\` → `\\`，换行 → `\n`，回车 → `\r`，`"` → `\"`，
//! 然后整体包上双引号，字段之间以逗号连接。
//!
//! 解码按字符扫描，每个 `\` 只与紧随其后的一个字符组成转义序列，
//! 因此 `"a\\","n"` 恢复为 `a\` 与 `n` 两个字段，不会与 `a\n` 混淆。

use indexmap::IndexMap;

/// 解码错误（不含行号，由读取器补充）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCountMismatch { expected: usize, found: usize },

    #[error("{0}")]
    Malformed(String),
}

/// 转义单个字段（不含外层引号）
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

/// 编码一行（含结尾换行符）
pub fn encode<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            line.push(',');
        }
        line.push('"');
        line.push_str(&escape_field(field.as_ref()));
        line.push('"');
    }
    line.push('\n');
    line
}

/// 把一行拆成反转义后的字段
pub fn split_fields(line: &str) -> Result<Vec<String>, CodecError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut fields = Vec::new();
    let mut chars = line.char_indices().peekable();

    if line.is_empty() {
        return Ok(fields);
    }

    loop {
        match chars.next() {
            Some((_, '"')) => {}
            Some((pos, other)) => {
                return Err(CodecError::Malformed(format!(
                    "expected '\"' at offset {}, found '{}'",
                    pos, other
                )))
            }
            None => return Err(CodecError::Malformed("missing field after ','".into())),
        }

        let mut field = String::new();
        let mut closed = false;
        while let Some((_, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, 'n')) => field.push('\n'),
                    Some((_, 'r')) => field.push('\r'),
                    Some((_, '"')) => field.push('"'),
                    Some((_, '\\')) => field.push('\\'),
                    // 未知转义原样保留
                    Some((_, other)) => {
                        field.push('\\');
                        field.push(other);
                    }
                    None => field.push('\\'),
                },
                '"' => {
                    closed = true;
                    break;
                }
                other => field.push(other),
            }
        }
        if !closed {
            return Err(CodecError::Malformed(format!(
                "unterminated field {}",
                fields.len() + 1
            )));
        }
        fields.push(field);

        match chars.next() {
            None => break,
            Some((_, ',')) => continue,
            Some((pos, other)) => {
                return Err(CodecError::Malformed(format!(
                    "expected ',' at offset {}, found '{}'",
                    pos, other
                )))
            }
        }
    }

    Ok(fields)
}

/// 解码一行并与列名配对
pub fn decode<S: AsRef<str>>(
    line: &str,
    columns: &[S],
) -> Result<IndexMap<String, String>, CodecError> {
    let values = split_fields(line)?;
    if values.len() != columns.len() {
        return Err(CodecError::ColumnCountMismatch {
            expected: columns.len(),
            found: values.len(),
        });
    }
    Ok(columns
        .iter()
        .map(|c| c.as_ref().to_string())
        .zip(values)
        .collect())
}
