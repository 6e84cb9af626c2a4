//! zip 打包与解包
//!
//! 备份文件可以整体压缩为只含一个 `.txt` 成员的 zip 包。
//! 解包时只接受恰好一个内容以标记行开头的 `.txt` 成员。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{FlatBackupError, Result, MARKER_PREFIX};
use crate::backup_common::check_zip_security;

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// 按文件头判断是否为 zip 包
pub fn is_zip(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|e| FlatBackupError::FileNotReadable {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn starts_with_marker(reader: &mut dyn Read) -> io::Result<bool> {
    let mut head = Vec::with_capacity(MARKER_PREFIX.len());
    reader
        .take(MARKER_PREFIX.len() as u64)
        .read_to_end(&mut head)?;
    Ok(head == MARKER_PREFIX.as_bytes())
}

/// 把 zip 包中的备份文件解压到 `target_dir`，返回解压出的文件路径
pub fn unzip_backup(zip_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    check_zip_security(zip_path)?.validate()?;

    let file = File::open(zip_path).map_err(|e| FlatBackupError::FileNotReadable {
        path: zip_path.display().to_string(),
        source: e,
    })?;
    let mut archive = ZipArchive::new(file)?;

    let mut candidates: Vec<(usize, String)> = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".txt") {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
        else {
            debug!("[BackupArchive] Skipping unsafe member name '{}'", entry.name());
            continue;
        };
        if starts_with_marker(&mut entry)? {
            candidates.push((i, name));
        }
    }

    let (index, name) = match candidates.len() {
        0 => {
            return Err(FlatBackupError::Archive(
                "no backup file found in archive".into(),
            ))
        }
        1 => candidates.remove(0),
        n => {
            return Err(FlatBackupError::Archive(format!(
                "archive holds {} backup files, expected one",
                n
            )))
        }
    };

    let target = target_dir.join(&name);
    if target.exists() {
        return Err(FlatBackupError::Archive(format!(
            "file {} already exists",
            target.display()
        )));
    }

    fs::create_dir_all(target_dir)?;
    let mut outfile = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)?;
    let mut entry = archive.by_index(index)?;
    let bytes = io::copy(&mut entry, &mut outfile)?;

    info!(
        "[BackupArchive] Extracted '{}' ({} bytes) to {:?}",
        name, bytes, target_dir
    );
    Ok(target)
}

/// 把备份文件压缩为单成员 zip 包
pub fn compress_backup(txt_path: &Path, zip_path: &Path) -> Result<()> {
    let name = txt_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FlatBackupError::Archive(format!("invalid file name: {:?}", txt_path)))?;

    let mut source = File::open(txt_path).map_err(|e| FlatBackupError::FileNotReadable {
        path: txt_path.display().to_string(),
        source: e,
    })?;
    let mut zip_writer = ZipWriter::new(File::create(zip_path)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    zip_writer.start_file(name.as_str(), options)?;
    let bytes = io::copy(&mut source, &mut zip_writer)?;
    zip_writer.finish()?;

    info!(
        "[BackupArchive] Compressed '{}' ({} bytes) into {:?}",
        name, bytes, zip_path
    );
    Ok(())
}
