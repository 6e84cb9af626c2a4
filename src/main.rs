//! flat-backup 命令行入口
//!
//! 配置优先级：命令行参数 > `FLAT_BACKUP_*` 环境变量（含 `.env`）> 配置文件 > 默认值。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flat_backup::backup_common::calculate_file_hash;
use flat_backup::flat_backup::archive::compress_backup;
use flat_backup::flat_backup::{export_blog, export_full, ExportReport};
use flat_backup::{BackupConfig, DatabaseManager, FlatImport, RowStore, StaticAuth};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// TOML 配置文件
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    #[clap(short, long, global = true)]
    database: Option<PathBuf>,
    #[clap(long, global = true)]
    prefix: Option<String>,
    /// 当前操作者（权限从数据库读取）
    #[clap(short, long, global = true)]
    user: Option<String>,
    #[clap(long, global = true, default_value = "info")]
    log_level: String,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 创建数据库表
    InitSchema,
    /// 导出单个博客
    ExportBlog {
        output: PathBuf,
        #[clap(short, long)]
        blog: Option<String>,
        /// 压缩为 zip（输出文件扩展名改为 .zip）
        #[clap(long)]
        compress: bool,
    },
    /// 导出全站
    ExportFull {
        output: PathBuf,
        #[clap(long)]
        compress: bool,
    },
    /// 把单博客备份合并到目标博客
    ImportSingle {
        input: PathBuf,
        #[clap(short, long)]
        blog: Option<String>,
        #[clap(long)]
        work_dir: Option<PathBuf>,
    },
    /// 用全站备份替换站点内容
    ImportFull {
        input: PathBuf,
        #[clap(long)]
        work_dir: Option<PathBuf>,
    },
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_config(cli: &Cli) -> Result<BackupConfig> {
    let mut config = BackupConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.table_prefix = prefix.clone();
    }
    if let Some(user) = &cli.user {
        config.user_id = user.clone();
    }
    match &cli.command {
        Commands::ExportBlog { blog, compress, .. } => {
            if let Some(blog) = blog {
                config.blog_id = blog.clone();
            }
            config.compress |= *compress;
        }
        Commands::ExportFull { compress, .. } => config.compress |= *compress,
        Commands::ImportSingle { blog, work_dir, .. } => {
            if let Some(blog) = blog {
                config.blog_id = blog.clone();
            }
            if work_dir.is_some() {
                config.work_dir = work_dir.clone();
            }
        }
        Commands::ImportFull { work_dir, .. } => {
            if work_dir.is_some() {
                config.work_dir = work_dir.clone();
            }
        }
        Commands::InitSchema => {}
    }
    Ok(config)
}

/// 命令行操作者的权限来自 `user`/`permissions` 表
fn load_auth(store: &dyn RowStore, user_id: &str) -> Result<StaticAuth> {
    StaticAuth::load(store, user_id).with_context(|| format!("读取用户权限失败: {}", user_id))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 写出备份文件；失败时删除不完整的输出
fn write_backup<F>(output: &Path, compress: bool, export: F) -> Result<ExportReport>
where
    F: FnOnce(&mut BufWriter<File>) -> flat_backup::flat_backup::Result<ExportReport>,
{
    let txt_path = if compress {
        output.with_extension("txt")
    } else {
        output.to_path_buf()
    };
    let file = File::create(&txt_path).with_context(|| format!("创建输出文件失败: {:?}", txt_path))?;
    let mut writer = BufWriter::new(file);

    let result = export(&mut writer).and_then(|report| {
        writer.flush()?;
        Ok(report)
    });
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            drop(writer);
            if let Err(rm) = fs::remove_file(&txt_path) {
                error!("[FlatExport] Failed to remove partial file {:?}: {}", txt_path, rm);
            }
            return Err(e).context("导出失败");
        }
    };
    drop(writer);

    let final_path = if compress {
        let zip_path = output.with_extension("zip");
        compress_backup(&txt_path, &zip_path).context("压缩备份失败")?;
        fs::remove_file(&txt_path).with_context(|| format!("删除临时文件失败: {:?}", txt_path))?;
        zip_path
    } else {
        txt_path
    };

    let hash = calculate_file_hash(&final_path)?;
    info!("[FlatExport] Wrote {:?} (sha256 {})", final_path, hash);
    Ok(report)
}

fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("读取 .env 失败");
        }
    }

    let cli = Cli::parse();
    setup_logging(&cli.log_level);
    let config = resolve_config(&cli)?;

    let manager = DatabaseManager::new(&config.database_path, &config.table_prefix)?;

    match &cli.command {
        Commands::InitSchema => {
            manager.init_schema()?;
        }
        Commands::ExportBlog { output, .. } => {
            let store = manager.store()?;
            let report = write_backup(output, config.compress, |out| {
                export_blog(&store, out, &config.blog_id, &config.app_version, &[])
            })?;
            print_json(&report)?;
        }
        Commands::ExportFull { output, .. } => {
            let store = manager.store()?;
            let report = write_backup(output, config.compress, |out| {
                export_full(&store, out, &config.app_version, &[])
            })?;
            print_json(&report)?;
        }
        Commands::ImportSingle { input, .. } => {
            let store = manager.store()?;
            let import = FlatImport::open(input, config.work_dir.as_deref())
                .with_context(|| format!("打开备份文件失败: {:?}", input))?;
            let report = import
                .import_single(&store, &load_auth(&store, &config.user_id)?, &config.blog_id, &[])
                .context("导入失败")?;
            print_json(&report)?;
        }
        Commands::ImportFull { input, .. } => {
            let store = manager.store()?;
            let import = FlatImport::open(input, config.work_dir.as_deref())
                .with_context(|| format!("打开备份文件失败: {:?}", input))?;
            let report = import
                .import_full(&store, &load_auth(&store, &config.user_id)?, &[])
                .context("导入失败")?;
            print_json(&report)?;
        }
    }

    Ok(())
}
