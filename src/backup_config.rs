//! 备份配置模块
//!
//! 配置来源（后者覆盖前者）：
//! - 内置默认值
//! - 可选的 TOML 文件
//! - `FLAT_BACKUP_` 前缀的环境变量（`.env` 由入口程序预先加载）
//! - 命令行参数（由入口程序覆盖）

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "FLAT_BACKUP";

/// 备份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// SQLite 数据库文件
    pub database_path: PathBuf,

    /// 表名前缀
    pub table_prefix: String,

    /// 写入标记行的版本号
    pub app_version: String,

    /// 单博客导出/导入的目标博客
    pub blog_id: String,

    /// 当前操作者，权限从数据库读取
    pub user_id: String,

    /// 导出后压缩为 zip
    pub compress: bool,

    /// zip 备份的解压目录（None 表示系统临时目录）
    pub work_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("blog.db"),
            table_prefix: "dc_".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            blog_id: "default".to_string(),
            user_id: "admin".to_string(),
            compress: false,
            work_dir: None,
        }
    }
}

impl BackupConfig {
    /// 从配置文件（可选）与环境变量加载
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
