//! 备份共享组件
//!
//! - SHA256 计算: 导出完成后输出文件摘要
//! - 安全防护: 导入 zip 包前的 ZIP 炸弹检测

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::flat_backup::{FlatBackupError, Result};

// ============================================================================
// 安全常量 - 防止 ZIP 炸弹和资源耗尽攻击
// ============================================================================

/// 最大允许解压总大小: 4GB
pub const MAX_UNCOMPRESSED_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// 最大允许单文件大小: 2GB
pub const MAX_SINGLE_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// 最大允许压缩比 (解压后大小 / 压缩大小)
/// 文本备份压缩比通常在 3-15 之间，超过 100 时记录警告
pub const MAX_COMPRESSION_RATIO: u64 = 100;

/// 超过此压缩比直接拒绝
pub const EXTREME_COMPRESSION_RATIO: u64 = 1000;

/// 最大允许条目数量，备份包只应包含一个文本文件
pub const MAX_FILE_COUNT: usize = 64;

/// 计算文件的SHA256哈希值
///
/// 使用8KB缓冲区分块读取，适合处理大文件而不会占用过多内存
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| FlatBackupError::FileNotReadable {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// ZIP 炸弹检测
// ============================================================================

/// ZIP 安全验证结果
#[derive(Debug)]
pub struct ZipSecurityCheck {
    pub total_uncompressed_size: u64,
    pub total_compressed_size: u64,
    pub file_count: usize,
    pub compression_ratio: f64,
    pub largest_file_size: u64,
    pub largest_file_name: String,
}

impl ZipSecurityCheck {
    /// 验证 ZIP 文件是否安全
    pub fn validate(&self) -> Result<()> {
        if self.total_uncompressed_size > MAX_UNCOMPRESSED_SIZE {
            return Err(FlatBackupError::Archive(format!(
                "uncompressed size {:.2} GB exceeds limit {:.2} GB",
                self.total_uncompressed_size as f64 / 1024.0 / 1024.0 / 1024.0,
                MAX_UNCOMPRESSED_SIZE as f64 / 1024.0 / 1024.0 / 1024.0
            )));
        }

        if self.largest_file_size > MAX_SINGLE_FILE_SIZE {
            return Err(FlatBackupError::Archive(format!(
                "member '{}' ({:.2} GB) exceeds single file limit {:.2} GB",
                self.largest_file_name,
                self.largest_file_size as f64 / 1024.0 / 1024.0 / 1024.0,
                MAX_SINGLE_FILE_SIZE as f64 / 1024.0 / 1024.0 / 1024.0
            )));
        }

        if self.compression_ratio > EXTREME_COMPRESSION_RATIO as f64 {
            return Err(FlatBackupError::Archive(format!(
                "compression ratio {:.1} exceeds limit {}",
                self.compression_ratio, EXTREME_COMPRESSION_RATIO
            )));
        } else if self.compression_ratio > MAX_COMPRESSION_RATIO as f64 {
            tracing::warn!(
                "[BackupArchive] High compression ratio ({:.1} > {})",
                self.compression_ratio,
                MAX_COMPRESSION_RATIO
            );
        }

        if self.file_count > MAX_FILE_COUNT {
            return Err(FlatBackupError::Archive(format!(
                "archive holds {} entries, limit is {}",
                self.file_count, MAX_FILE_COUNT
            )));
        }

        Ok(())
    }
}

/// 对 ZIP 文件进行安全检查
///
/// 只读取中央目录，不解压任何内容
pub fn check_zip_security(zip_path: &Path) -> Result<ZipSecurityCheck> {
    let file = File::open(zip_path).map_err(|e| FlatBackupError::FileNotReadable {
        path: zip_path.display().to_string(),
        source: e,
    })?;

    let compressed_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut archive = zip::ZipArchive::new(file)?;

    let file_count = archive.len();
    let mut total_uncompressed = 0u64;
    let mut largest_size = 0u64;
    let mut largest_name = String::new();

    for i in 0..file_count {
        let entry = archive.by_index(i)?;
        let size = entry.size();
        total_uncompressed += size;

        if size > largest_size {
            largest_size = size;
            largest_name = entry.name().to_string();
        }
    }

    let compression_ratio = if compressed_size > 0 {
        total_uncompressed as f64 / compressed_size as f64
    } else {
        0.0
    };

    Ok(ZipSecurityCheck {
        total_uncompressed_size: total_uncompressed,
        total_compressed_size: compressed_size,
        file_count,
        compression_ratio,
        largest_file_size: largest_size,
        largest_file_name: largest_name,
    })
}
