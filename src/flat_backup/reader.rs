//! 段读取器
//!
//! 逐行读取备份文件，识别段头 `[名称 列1,列2,...]`，
//! 把数据行解码为带段名与行号的 [`Record`]。
//!
//! - 空行跳过（仍计入行号）
//! - 既不是段头也不是数据行的内容跳过（包括标记行）
//! - 行号从 1 开始

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

use super::codec::{decode, CodecError};
use super::record::Record;
use super::{FlatBackupError, Result, MARKER_PREFIX};

#[derive(Debug)]
pub struct FlatBackup<R> {
    reader: Option<R>,
    section: Option<String>,
    columns: Vec<String>,
    line: usize,
    buf: Vec<u8>,
}

impl FlatBackup<BufReader<File>> {
    /// 打开备份文件
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| FlatBackupError::FileNotReadable {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> FlatBackup<R> {
    pub fn new(reader: R) -> Self {
        Self::with_line_offset(reader, 0)
    }

    /// 调用方已自行读取了前 `lines_read` 行（例如标记行）
    pub fn with_line_offset(reader: R, lines_read: usize) -> Self {
        Self {
            reader: Some(reader),
            section: None,
            columns: Vec::new(),
            line: lines_read,
            buf: Vec::new(),
        }
    }

    /// 最近读取的物理行号
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 释放底层句柄，可重复调用
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("[FlatBackup] Stream closed after line {}", self.line);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    fn read_physical_line(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        self.buf.clear();
        let n = reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        let text = std::str::from_utf8(&self.buf).map_err(|e| FlatBackupError::MalformedLine {
            line: self.line,
            reason: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })?;
        Ok(Some(text.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn apply_header(&mut self, header: &str) {
        let inner = header
            .trim_start_matches('[')
            .trim_end()
            .trim_end_matches(']');
        let (name, rest) = match inner.find(' ') {
            Some(pos) => (&inner[..pos], inner[pos + 1..].trim()),
            None => (inner, ""),
        };
        self.section = Some(name.to_string());
        self.columns = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(|c| c.trim().to_string()).collect()
        };
        debug!(
            "[FlatBackup] Section '{}' ({} columns) at line {}",
            name,
            self.columns.len(),
            self.line
        );
    }

    /// 下一条记录；文件结束时返回 `None`
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(line) = self.read_physical_line()? else {
                return Ok(None);
            };

            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with('[') {
                self.apply_header(&line);
                continue;
            }

            if line.starts_with('"') {
                let Some(section) = self.section.clone() else {
                    return Err(FlatBackupError::DataBeforeHeader { line: self.line });
                };
                let fields = decode(&line, &self.columns).map_err(|e| match e {
                    CodecError::ColumnCountMismatch { expected, found } => {
                        FlatBackupError::ColumnCountMismatch {
                            line: self.line,
                            expected,
                            found,
                        }
                    }
                    CodecError::Malformed(reason) => FlatBackupError::MalformedLine {
                        line: self.line,
                        reason,
                    },
                })?;
                return Ok(Some(Record::new(section, self.line, fields)));
            }

            if line.starts_with(MARKER_PREFIX) {
                debug!("[FlatBackup] Marker line {} skipped", self.line);
            } else {
                warn!("[FlatBackup] Skipping non-data line {}", self.line);
            }
        }
    }
}

impl<R: BufRead> Iterator for FlatBackup<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn reader(text: &str) -> FlatBackup<Cursor<Vec<u8>>> {
        FlatBackup::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_sections_and_line_numbers() {
        let text = "///DOTCLEAR|2.4|single\n\
                    \n\
                    [category cat_id,cat_title]\n\
                    \"1\",\"News\"\n\
                    \"2\",\"Misc\"\n\
                    \n\
                    [post post_id,cat_id,post_title]\n\
                    \"10\",\"1\",\"Hello\"\n";
        let records: Vec<Record> = reader(text).collect::<Result<_>>().unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].section(), "category");
        assert_eq!(records[0].line(), 4);
        assert_eq!(records[1].get("cat_title"), Some("Misc"));
        assert_eq!(records[1].line(), 5);
        assert_eq!(records[2].section(), "post");
        assert_eq!(records[2].line(), 8);
        assert_eq!(records[2].len(), 3);
        assert_eq!(records[2].get("cat_id"), Some("1"));
    }

    #[test]
    fn test_column_count_mismatch_reports_line() {
        let text = "[link link_id,link_href]\n\n\"1\",\"http://a\"\n\"2\"\n";
        let mut rd = reader(text);
        assert!(rd.next_record().unwrap().is_some());
        assert_matches!(
            rd.next_record(),
            Err(FlatBackupError::ColumnCountMismatch {
                line: 4,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_data_before_header_fails() {
        let mut rd = reader("\n\"1\",\"2\"\n");
        assert_matches!(
            rd.next_record(),
            Err(FlatBackupError::DataBeforeHeader { line: 2 })
        );
    }

    #[test]
    fn test_junk_lines_are_skipped() {
        let text = "# comment\n[meta meta_id,meta_type,post_id]\nnot data\n\"tag\",\"tag\",\"3\"\n";
        let records: Vec<Record> = reader(text).collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line(), 4);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut bytes = b"[post post_id,post_title]\n\"1\",\"Ok\"\n\"2\",\"Caf".to_vec();
        bytes.extend_from_slice(&[0xE9, b'"', b'\n']);
        let mut rd = FlatBackup::new(Cursor::new(bytes));
        assert!(rd.next_record().unwrap().is_some());
        assert_matches!(
            rd.next_record(),
            Err(FlatBackupError::MalformedLine { line: 3, ref reason }) if reason.contains("UTF-8")
        );
    }

    #[test]
    fn test_header_without_columns() {
        let mut rd = reader("[empty]\n");
        assert!(rd.next_record().unwrap().is_none());
        assert_eq!(rd.section(), Some("empty"));
        assert!(rd.columns().is_empty());
    }

    #[test]
    fn test_line_offset_and_close() {
        let mut rd = FlatBackup::with_line_offset(
            Cursor::new(b"[a x]\n\"1\"\n\"2\"\n".to_vec()),
            1,
        );
        let first = rd.next_record().unwrap().unwrap();
        assert_eq!(first.line(), 3);
        rd.close();
        rd.close();
        assert!(rd.is_closed());
        assert!(rd.next_record().unwrap().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FlatBackup::open(&dir.path().join("missing.txt"));
        assert_matches!(result, Err(FlatBackupError::FileNotReadable { .. }));
    }
}
