//! 文件数据库上的导出/导入集成测试

use flat_backup::backup_common::calculate_file_hash;
use flat_backup::flat_backup::archive::compress_backup;
use flat_backup::flat_backup::{export_blog, export_full, BackupMode};
use flat_backup::test_utils::database_seed::{insert_blog, insert_user, seed_blog, SeedConfig};
use flat_backup::{DatabaseManager, FlatBackupError, FlatImport, RowStore, StaticAuth};
use std::fs::{self, File};
use std::path::Path;
use tempfile::TempDir;

fn manager(dir: &TempDir, name: &str) -> DatabaseManager {
    let manager = DatabaseManager::new(&dir.path().join(name), "dc_").unwrap();
    manager.init_schema().unwrap();
    manager
}

fn count(store: &dyn RowStore, sql: &str) -> i64 {
    store
        .select(sql, &[])
        .unwrap()
        .first()
        .and_then(|row| row.get_i64("n"))
        .unwrap()
}

fn export_single(manager: &DatabaseManager, path: &Path, blog_id: &str) {
    let store = manager.store().unwrap();
    let mut file = File::create(path).unwrap();
    export_blog(&store, &mut file, blog_id, "2.4.0", &[]).unwrap();
}

#[test]
fn test_blog_moves_between_databases() {
    let dir = TempDir::new().unwrap();
    let source = manager(&dir, "source.db");
    seed_blog(&source.store().unwrap(), &SeedConfig::default()).unwrap();

    let backup = dir.path().join("default.txt");
    export_single(&source, &backup, "default");

    let target = manager(&dir, "target.db");
    {
        let store = target.store().unwrap();
        insert_blog(&store, "copy").unwrap();
        insert_user(&store, "admin", true).unwrap();
    }

    let auth = StaticAuth::user("admin").grant("copy", "admin");
    let import = FlatImport::open(&backup, None).unwrap();
    let report = import
        .import_single(&target.store().unwrap(), &auth, "copy", &[])
        .unwrap();
    assert_eq!(report.mode, BackupMode::Single);
    assert_eq!(report.inserted("post"), 3);

    // 新连接上能看到已提交的数据
    let store = target.store().unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM dc_category WHERE blog_id = 'copy'"), 2);
    assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM dc_post WHERE blog_id = 'copy'"), 3);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) AS n FROM dc_comment C JOIN dc_post P ON C.post_id = P.post_id \
             WHERE P.post_title = 'Second post'"
        ),
        1
    );
    assert_eq!(count(&store, "SELECT COUNT(*) AS n FROM dc_setting"), 0);
}

#[test]
fn test_empty_sections_are_omitted_and_import_cleanly() {
    let dir = TempDir::new().unwrap();
    let source = manager(&dir, "source.db");
    let config = SeedConfig {
        create_extras: false,
        ..Default::default()
    };
    seed_blog(&source.store().unwrap(), &config).unwrap();

    let backup = dir.path().join("bare.txt");
    export_single(&source, &backup, "default");
    let text = fs::read_to_string(&backup).unwrap();
    assert!(text.starts_with("///DOTCLEAR|2.4.0|single\n"));
    assert!(!text.contains("[link "));
    assert!(!text.contains("[meta "));
    assert!(!text.contains("[ping "));
    assert!(text.contains("[post "));

    let store = source.store().unwrap();
    insert_blog(&store, "copy").unwrap();
    let report = FlatImport::open(&backup, None)
        .unwrap()
        .import_single(&store, &StaticAuth::super_admin("admin"), "copy", &[])
        .unwrap();
    assert_eq!(report.inserted("link"), 0);
    assert_eq!(report.inserted("post"), 3);
}

#[test]
fn test_zip_backup_from_file_database() {
    let dir = TempDir::new().unwrap();
    let source = manager(&dir, "source.db");
    seed_blog(&source.store().unwrap(), &SeedConfig::default()).unwrap();

    let txt = dir.path().join("blog-backup.txt");
    export_single(&source, &txt, "default");
    let zip_path = dir.path().join("blog-backup.zip");
    compress_backup(&txt, &zip_path).unwrap();
    let digest = calculate_file_hash(&zip_path).unwrap();
    assert_eq!(digest.len(), 64);
    fs::remove_file(&txt).unwrap();

    let store = source.store().unwrap();
    insert_blog(&store, "copy").unwrap();
    let work = TempDir::new().unwrap();
    let import = FlatImport::open(&zip_path, Some(work.path())).unwrap();
    let report = import
        .import_single(&store, &StaticAuth::super_admin("admin"), "copy", &[])
        .unwrap();
    assert_eq!(report.inserted("comment"), 1);

    // zip 文件本身不受影响
    assert_eq!(calculate_file_hash(&zip_path).unwrap(), digest);
}

#[test]
fn test_full_backup_restores_fresh_database() {
    let dir = TempDir::new().unwrap();
    let source = manager(&dir, "source.db");
    seed_blog(&source.store().unwrap(), &SeedConfig::default()).unwrap();

    let backup = dir.path().join("full.txt");
    {
        let store = source.store().unwrap();
        let mut file = File::create(&backup).unwrap();
        export_full(&store, &mut file, "2.4.0", &[]).unwrap();
    }

    let target = manager(&dir, "restored.db");
    let import = FlatImport::open(&backup, None).unwrap();
    assert_eq!(import.mode(), BackupMode::Full);

    // 普通用户不能做全站导入
    let err = import
        .import_full(&target.store().unwrap(), &StaticAuth::user("admin"), &[])
        .unwrap_err();
    assert!(matches!(err, FlatBackupError::PermissionDenied(_)));

    import
        .import_full(&target.store().unwrap(), &StaticAuth::super_admin("admin"), &[])
        .unwrap();

    let src = source.store().unwrap();
    let dst = target.store().unwrap();
    for table in ["blog", "category", "post", "comment", "media", "meta", "setting"] {
        let sql = format!("SELECT COUNT(*) AS n FROM dc_{}", table);
        assert_eq!(count(&src, &sql), count(&dst, &sql), "table {}", table);
    }
    assert_eq!(
        count(&dst, "SELECT post_id AS n FROM dc_comment WHERE comment_id = 1"),
        2
    );
}
