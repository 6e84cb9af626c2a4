//! 平面备份导入
//!
//! [`FlatImport`] 负责两种模式共用的部分：
//! - 打开文件（zip 包先解压到工作目录）并解析标记行
//! - 权限与模式检查
//! - 事务：整个文件要么全部写入，要么全部回滚
//! - 按段名把记录分派给处理函数，未知段跳过
//! - 在受约束的段（post/meta/post_media/ping/comment）连续出现期间延迟外键检查
//!
//! 具体的写入规则见 `single`（单博客，重新分配主键）与 `full`（全站回放）。

mod full;
pub mod legacy;
mod single;


use indexmap::IndexMap;
use serde::Serialize;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::archive::{is_zip, unzip_backup};
use super::reader::FlatBackup;
use super::record::Record;
use super::{BackupMode, EntityKind, FlatBackupError, Result, MARKER_PREFIX};
use crate::auth::AuthContext;
use crate::database::{schema, RowStore, StoreResult};

pub use single::IdMaps;

use full::FullImport;
use single::SingleImport;

/// 连续出现时需要延迟外键检查的段
pub const CONSTRAINED_SECTIONS: &[&str] = &["post", "meta", "post_media", "ping", "comment"];

/// 低于此版本（major.minor）的文件需要旧字段改名
const LEGACY_THRESHOLD: (u32, u32) = (2, 0);

/// 处理一条记录的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowOutcome {
    Inserted,
    /// 已存在（合并到现有行）或按规则忽略
    Skipped,
}

pub(crate) type Handler<S> = fn(&mut S, &mut Record) -> Result<RowOutcome>;

/// 段名 → 处理函数；未登记的段由调用方跳过
pub(crate) struct HandlerRegistry<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, section: &'static str, handler: Handler<S>) -> &mut Self {
        self.handlers.insert(section, handler);
        self
    }

    pub fn get(&self, section: &str) -> Option<Handler<S>> {
        self.handlers.get(section).copied()
    }
}

/// 导入模式的状态
pub(crate) trait ModeState: Sized {
    fn registry() -> HandlerRegistry<Self>;

    fn blog_id(&self) -> Option<&str> {
        None
    }

    fn id_maps(&self) -> Option<&IdMaps> {
        None
    }

    fn finish(&mut self, _report: &mut ImportReport) {}
}

/// 传给扩展的只读上下文
pub struct ImportContext<'a> {
    store: &'a dyn RowStore,
    mode: BackupMode,
    version: &'a str,
    blog_id: Option<&'a str>,
    ids: Option<&'a IdMaps>,
}

impl<'a> ImportContext<'a> {
    pub fn store(&self) -> &'a dyn RowStore {
        self.store
    }

    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    pub fn version(&self) -> &'a str {
        self.version
    }

    /// 单博客导入的目标博客
    pub fn blog_id(&self) -> Option<&'a str> {
        self.blog_id
    }

    /// 单博客导入中旧主键对应的新主键
    pub fn new_id(&self, kind: EntityKind, old_id: i64) -> Option<i64> {
        self.ids.and_then(|ids| ids.get(kind, old_id))
    }
}

/// 导入扩展点：插件可以读取（或自行写入）每条记录，包括未知段
pub trait ImportExtension {
    fn init(&self, _ctx: &ImportContext<'_>) -> Result<()> {
        Ok(())
    }

    fn record(&self, _record: &Record, _ctx: &ImportContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// 导入统计
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub mode: BackupMode,
    pub version: String,
    pub inserted: IndexMap<String, usize>,
    pub skipped: IndexMap<String, usize>,
    /// 导入时自动创建的用户
    pub users_created: Vec<String>,
    /// 读取的物理行数（含标记行）
    pub lines: usize,
}

impl ImportReport {
    fn new(mode: BackupMode, version: &str) -> Self {
        Self {
            mode,
            version: version.to_string(),
            inserted: IndexMap::new(),
            skipped: IndexMap::new(),
            users_created: Vec::new(),
            lines: 0,
        }
    }

    fn count(&mut self, section: &str, outcome: RowOutcome) {
        let counters = match outcome {
            RowOutcome::Inserted => &mut self.inserted,
            RowOutcome::Skipped => &mut self.skipped,
        };
        *counters.entry(section.to_string()).or_insert(0) += 1;
    }

    pub fn inserted(&self, section: &str) -> usize {
        self.inserted.get(section).copied().unwrap_or(0)
    }

    pub fn total_inserted(&self) -> usize {
        self.inserted.values().sum()
    }
}

/// 事务守卫
///
/// 未调用 [`TransactionGuard::commit`] 就被丢弃时回滚，
/// 若仍处于约束延迟窗口则先恢复约束检查。
pub(crate) struct TransactionGuard<'a> {
    store: &'a dyn RowStore,
    deferred: Cell<bool>,
    finished: bool,
}

impl<'a> TransactionGuard<'a> {
    pub fn begin(store: &'a dyn RowStore) -> Result<Self> {
        store.begin()?;
        debug!("[FlatImport] Transaction started");
        Ok(Self {
            store,
            deferred: Cell::new(false),
            finished: false,
        })
    }

    pub fn store(&self) -> &'a dyn RowStore {
        self.store
    }

    pub fn set_deferred(&self, deferred: bool) -> StoreResult<()> {
        self.store.set_constraints_deferred(deferred)?;
        self.deferred.set(deferred);
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.store.commit()?;
        self.finished = true;
        debug!("[FlatImport] Transaction committed");
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.deferred.get() {
            if let Err(e) = self.store.set_constraints_deferred(false) {
                warn!("[FlatImport] Failed to restore constraint checks: {}", e);
            }
        }
        match self.store.rollback() {
            Ok(()) => warn!("[FlatImport] Transaction rolled back"),
            Err(e) => warn!("[FlatImport] Rollback failed: {}", e),
        }
    }
}

/// 按表结构把记录写入一张表；表结构未登记时所有字段按文本写入
pub(crate) fn insert_record(store: &dyn RowStore, table: &str, record: &Record) -> Result<()> {
    let mut cur = store.open_cursor(table);
    match schema::table(table) {
        Some(schema) => {
            for &(column, kind) in schema.columns {
                if record.exists(column) {
                    cur.set(column, record.as_value(column, kind));
                }
            }
        }
        None => {
            for (column, value) in record.iter() {
                cur.set(column, value);
            }
        }
    }
    cur.insert(store)?;
    Ok(())
}

/// 标记行中的版本是否早于 2.0
pub fn is_legacy_version(version: &str) -> bool {
    let mut parts = version.trim().split('.').map(|p| {
        let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(major), minor) => (major, minor.unwrap_or(0)) < LEGACY_THRESHOLD,
        (None, _) => false,
    }
}

#[derive(Debug)]
pub struct FlatImport {
    path: PathBuf,
    /// 从 zip 包解压出的临时文件，导入器释放时删除
    extracted: Option<PathBuf>,
    version: String,
    mode: BackupMode,
    legacy: bool,
}

impl FlatImport {
    /// 打开备份文件
    ///
    /// zip 包会被解压到 `work_dir`（默认系统临时目录）。
    pub fn open(path: &Path, work_dir: Option<&Path>) -> Result<Self> {
        File::open(path)
            .map_err(|e| FlatBackupError::UnreadableFile(format!("{}: {}", path.display(), e)))?;

        let mut import = if is_zip(path)? {
            let target = work_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir);
            let extracted = unzip_backup(path, &target)?;
            Self::unopened(extracted.clone(), Some(extracted))
        } else {
            Self::unopened(path.to_path_buf(), None)
        };

        import.read_marker()?;
        info!(
            "[FlatImport] Opened {:?}: version {}, mode {}{}",
            path,
            import.version,
            import.mode,
            if import.legacy { " (legacy)" } else { "" }
        );
        Ok(import)
    }

    fn unopened(path: PathBuf, extracted: Option<PathBuf>) -> Self {
        Self {
            path,
            extracted,
            version: String::new(),
            mode: BackupMode::Single,
            legacy: false,
        }
    }

    fn open_stream(&self) -> Result<(BufReader<File>, String)> {
        let unreadable =
            |e: std::io::Error| FlatBackupError::UnreadableFile(format!("{}: {}", self.path.display(), e));
        let mut reader = BufReader::new(File::open(&self.path).map_err(unreadable)?);
        let mut buf = Vec::new();
        reader.read_until(b'\n', &mut buf).map_err(unreadable)?;
        let first = match std::str::from_utf8(&buf) {
            Ok(text) => text.trim_end_matches(['\n', '\r']).to_string(),
            Err(_) if buf.starts_with(MARKER_PREFIX.as_bytes()) => {
                return Err(FlatBackupError::MalformedLine {
                    line: 1,
                    reason: "invalid UTF-8 in marker line".to_string(),
                })
            }
            Err(_) => return Err(FlatBackupError::NotABackupFile),
        };
        Ok((reader, first))
    }

    fn read_marker(&mut self) -> Result<()> {
        let (_, first) = self.open_stream()?;
        let rest = first
            .strip_prefix(MARKER_PREFIX)
            .ok_or(FlatBackupError::NotABackupFile)?;
        let mut parts = rest.split('|');
        self.version = parts.next().unwrap_or("").trim().to_string();
        self.mode = BackupMode::from_marker(parts.next().unwrap_or(""));
        self.legacy = is_legacy_version(&self.version);
        Ok(())
    }

    /// 标记行之后的记录流
    fn reader(&self) -> Result<FlatBackup<BufReader<File>>> {
        let (reader, _) = self.open_stream()?;
        Ok(FlatBackup::with_line_offset(reader, 1))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    fn expect_mode(&self, expected: BackupMode) -> Result<()> {
        if self.mode != expected {
            return Err(FlatBackupError::ModeMismatch {
                expected,
                found: self.mode,
            });
        }
        Ok(())
    }

    /// 把单博客备份合并到 `blog_id`
    pub fn import_single(
        &self,
        store: &dyn RowStore,
        auth: &dyn AuthContext,
        blog_id: &str,
        extensions: &[Box<dyn ImportExtension>],
    ) -> Result<ImportReport> {
        if !auth.is_super_admin() && !auth.check_permission("admin", blog_id) {
            return Err(FlatBackupError::PermissionDenied(format!(
                "user '{}' is not an administrator of blog '{}'",
                auth.user_id(),
                blog_id
            )));
        }
        self.expect_mode(BackupMode::Single)?;

        let guard = TransactionGuard::begin(store)?;
        let mut state = SingleImport::prepare(store, auth, blog_id)?;
        let report = self.run(&guard, &mut state, extensions)?;
        guard.commit()?;

        info!(
            "[FlatImport] Single import into '{}' done: {} rows inserted, {} users created",
            blog_id,
            report.total_inserted(),
            report.users_created.len()
        );
        Ok(report)
    }

    /// 用全站备份替换当前站点内容
    pub fn import_full(
        &self,
        store: &dyn RowStore,
        auth: &dyn AuthContext,
        extensions: &[Box<dyn ImportExtension>],
    ) -> Result<ImportReport> {
        if !auth.is_super_admin() {
            return Err(FlatBackupError::PermissionDenied(format!(
                "user '{}' is not a super administrator",
                auth.user_id()
            )));
        }
        self.expect_mode(BackupMode::Full)?;

        let guard = TransactionGuard::begin(store)?;
        let mut state = FullImport::prepare(store)?;
        let report = self.run(&guard, &mut state, extensions)?;
        guard.commit()?;

        info!(
            "[FlatImport] Full import done: {} rows inserted, {} skipped",
            report.total_inserted(),
            report.skipped.values().sum::<usize>()
        );
        Ok(report)
    }

    fn context<'s, S: ModeState>(&'s self, store: &'s dyn RowStore, state: &'s S) -> ImportContext<'s> {
        ImportContext {
            store,
            mode: self.mode,
            version: &self.version,
            blog_id: state.blog_id(),
            ids: state.id_maps(),
        }
    }

    fn run<S: ModeState>(
        &self,
        guard: &TransactionGuard<'_>,
        state: &mut S,
        extensions: &[Box<dyn ImportExtension>],
    ) -> Result<ImportReport> {
        let store = guard.store();
        let registry = S::registry();
        let mut report = ImportReport::new(self.mode, &self.version);
        let mut unknown: HashSet<String> = HashSet::new();

        {
            let ctx = self.context(store, state);
            for ext in extensions {
                ext.init(&ctx)?;
            }
        }

        let mut reader = self.reader()?;
        let mut deferred = false;

        while let Some(mut record) = reader.next_record()? {
            let line = record.line();
            if self.legacy {
                legacy::upgrade(&mut record);
            }

            let constrained = CONSTRAINED_SECTIONS.contains(&record.section());
            if constrained != deferred {
                guard
                    .set_deferred(constrained)
                    .map_err(|e| FlatBackupError::from(e).with_line(line))?;
                deferred = constrained;
            }

            match registry.get(record.section()) {
                Some(handler) => {
                    let outcome = handler(state, &mut record).map_err(|e| e.with_line(line))?;
                    report.count(record.section(), outcome);
                }
                None => {
                    if unknown.insert(record.section().to_string()) {
                        warn!(
                            "[FlatImport] Unknown section '{}' skipped (line {})",
                            record.section(),
                            line
                        );
                    }
                    report.count(record.section(), RowOutcome::Skipped);
                }
            }

            let ctx = self.context(store, state);
            for ext in extensions {
                ext.record(&record, &ctx).map_err(|e| e.with_line(line))?;
            }
        }

        if deferred {
            guard.set_deferred(false)?;
        }
        report.lines = reader.line();
        reader.close();
        state.finish(&mut report);
        Ok(report)
    }
}

impl Drop for FlatImport {
    fn drop(&mut self) {
        if let Some(path) = self.extracted.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("[FlatImport] Removed extracted file {:?}", path),
                Err(e) => warn!("[FlatImport] Failed to remove {:?}: {}", path, e),
            }
        }
    }
}
