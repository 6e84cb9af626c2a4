//! 单博客导入
//!
//! 所有主键重新分配（从目标表 `MAX(id)+1` 开始递增），
//! 子记录引用的父记录必须已在本次导入中出现，否则报 `DanglingReference`。

use chrono::{NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{insert_record, HandlerRegistry, ModeState, RowOutcome};
use crate::auth::AuthContext;
use crate::database::{FieldValue, RowStore};
use crate::flat_backup::record::Record;
use crate::flat_backup::{blog_public_path, EntityKind, FlatBackupError, Result};

static RE_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static RE_USER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").unwrap());

/// 旧主键 → 新主键
#[derive(Debug, Default)]
pub struct IdMaps {
    categories: HashMap<i64, i64>,
    posts: HashMap<i64, i64>,
    media: HashMap<i64, i64>,
}

impl IdMaps {
    pub fn get(&self, kind: EntityKind, old_id: i64) -> Option<i64> {
        let map = match kind {
            EntityKind::Category => &self.categories,
            EntityKind::Post => &self.posts,
            EntityKind::Media => &self.media,
            _ => return None,
        };
        map.get(&old_id).copied()
    }

    fn insert(&mut self, kind: EntityKind, old_id: i64, new_id: i64) {
        let map = match kind {
            EntityKind::Category => &mut self.categories,
            EntityKind::Post => &mut self.posts,
            EntityKind::Media => &mut self.media,
            _ => return,
        };
        map.insert(old_id, new_id);
    }

    /// 查找映射，缺失时报告引用的实体类型与行号
    fn require(&self, kind: EntityKind, old_id: i64, line: usize) -> Result<i64> {
        self.get(kind, old_id)
            .ok_or(FlatBackupError::DanglingReference { kind, line })
    }
}

/// 用户 ID 只保留字母数字，过短时补 `-a`
pub(crate) fn sanitize_user_id(user_id: &str) -> String {
    let mut id = RE_USER_ID.replace_all(user_id, "").into_owned();
    if id.chars().count() < 2 {
        id.push_str("-a");
    }
    id
}

fn slugify(title: &str) -> String {
    RE_SLUG
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// `YYYY/MM/DD/`，日期无法解析时使用当天
fn date_prefix(post_dt: &str) -> String {
    let dt = NaiveDateTime::parse_from_str(post_dt.trim(), "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    dt.format("%Y/%m/%d/").to_string()
}

pub(crate) struct SingleImport<'a> {
    store: &'a dyn RowStore,
    auth: &'a dyn AuthContext,
    blog_id: String,
    public_path: String,
    next_ids: HashMap<EntityKind, i64>,
    ids: IdMaps,
    /// 目标博客已有分类：URL → cat_id
    category_urls: HashMap<String, i64>,
    /// 导入分类的 lft/rgt 偏移量
    cat_shift: i64,
    /// 文件中的 user_id → 实际使用的 user_id
    users: HashMap<String, String>,
    created_users: Vec<String>,
}

impl<'a> SingleImport<'a> {
    pub fn prepare(store: &'a dyn RowStore, auth: &'a dyn AuthContext, blog_id: &str) -> Result<Self> {
        let blog = [FieldValue::from(blog_id)];

        let mut next_ids = HashMap::new();
        for kind in EntityKind::ALL {
            let sql = format!(
                "SELECT MAX({}) AS max_id FROM {}",
                kind.id_column(),
                store.table(kind.table())
            );
            let max = store
                .select(&sql, &[])?
                .first()
                .and_then(|row| row.get_i64("max_id"))
                .unwrap_or(0);
            next_ids.insert(kind, max + 1);
        }

        let mut category_urls = HashMap::new();
        let sql = format!(
            "SELECT cat_id, cat_url FROM {} WHERE blog_id = ?1",
            store.table("category")
        );
        for row in store.select(&sql, &blog)?.iter() {
            if let Some(id) = row.get_i64("cat_id") {
                category_urls.insert(row.get_string("cat_url"), id);
            }
        }

        let sql = format!(
            "SELECT MAX(cat_rgt) AS max_rgt FROM {} WHERE blog_id = ?1",
            store.table("category")
        );
        let cat_shift = store
            .select(&sql, &blog)?
            .first()
            .and_then(|row| row.get_i64("max_rgt"))
            .unwrap_or(0);

        let public_path = blog_public_path(store, blog_id)?;

        debug!(
            "[FlatImport] Single import into '{}': {} existing categories, next post id {}",
            blog_id,
            category_urls.len(),
            next_ids.get(&EntityKind::Post).copied().unwrap_or(1)
        );

        Ok(Self {
            store,
            auth,
            blog_id: blog_id.to_string(),
            public_path,
            next_ids,
            ids: IdMaps::default(),
            category_urls,
            cat_shift,
            users: HashMap::new(),
            created_users: Vec::new(),
        })
    }

    fn allocate(&mut self, kind: EntityKind) -> i64 {
        let next = self.next_ids.entry(kind).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    fn user_exists(&self, user_id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT user_id FROM {} WHERE user_id = ?1",
            self.store.table("user")
        );
        Ok(!self.store.select(&sql, &[FieldValue::from(user_id)])?.is_empty())
    }

    fn create_user(&self, user_id: &str) -> Result<()> {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut cur = self.store.open_cursor("user");
        cur.set("user_id", user_id);
        cur.set("user_super", false);
        cur.set("user_status", 1i64);
        cur.set("user_pwd", hex::encode(Sha256::digest(password.as_bytes())));
        cur.set("user_name", user_id);
        cur.set("user_default_blog", self.blog_id.as_str());
        cur.set("user_post_status", -2i64);
        cur.set("user_creadt", now.as_str());
        cur.set("user_upddt", now);
        cur.insert(self.store)?;
        Ok(())
    }

    /// 文件中的用户在目标库不存在时：超级管理员自动创建，否则改用当前用户
    fn resolve_user(&mut self, user_id: &str) -> Result<String> {
        if let Some(resolved) = self.users.get(user_id) {
            return Ok(resolved.clone());
        }

        let resolved = if self.user_exists(user_id)? {
            user_id.to_string()
        } else if self.auth.is_super_admin() {
            let id = sanitize_user_id(user_id);
            if !self.user_exists(&id)? {
                self.create_user(&id)?;
                info!("[FlatImport] Created user '{}' for '{}'", id, user_id);
                self.created_users.push(id.clone());
            }
            id
        } else {
            warn!(
                "[FlatImport] Unknown user '{}' replaced by '{}'",
                user_id,
                self.auth.user_id()
            );
            self.auth.user_id().to_string()
        };

        self.users.insert(user_id.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn post_url_taken(&self, url: &str) -> Result<bool> {
        let sql = format!(
            "SELECT post_id FROM {} WHERE blog_id = ?1 AND post_url = ?2",
            self.store.table("post")
        );
        let params = [FieldValue::from(self.blog_id.as_str()), FieldValue::from(url)];
        Ok(!self.store.select(&sql, &params)?.is_empty())
    }

    /// 博客内唯一的文章 URL，重复时追加 `-1`、`-2`……
    fn unique_post_url(&self, record: &Record, post_id: i64) -> Result<String> {
        let mut base = record.as_str("post_url").trim().to_string();
        if base.is_empty() {
            let mut slug = slugify(record.as_str("post_title"));
            if slug.is_empty() {
                slug = post_id.to_string();
            }
            base = format!("{}{}", date_prefix(record.as_str("post_dt")), slug);
        }

        let mut url = base.clone();
        let mut n = 0;
        while self.post_url_taken(&url)? {
            n += 1;
            url = format!("{}-{}", base, n);
        }
        Ok(url)
    }

    fn import_category(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let old_id = rec.as_int("cat_id");
        let url = rec.as_str("cat_url").to_string();

        if let Some(&existing) = self.category_urls.get(&url) {
            self.ids.insert(EntityKind::Category, old_id, existing);
            debug!(
                "[FlatImport] Category '{}' merged into existing {} (line {})",
                url,
                existing,
                rec.line()
            );
            return Ok(RowOutcome::Skipped);
        }

        let new_id = self.allocate(EntityKind::Category);
        rec.set("cat_id", new_id.to_string());
        rec.set("blog_id", self.blog_id.as_str());
        rec.set("cat_lft", (rec.as_int("cat_lft") + self.cat_shift).to_string());
        rec.set("cat_rgt", (rec.as_int("cat_rgt") + self.cat_shift).to_string());
        insert_record(self.store, "category", rec)?;

        self.category_urls.insert(url, new_id);
        self.ids.insert(EntityKind::Category, old_id, new_id);
        Ok(RowOutcome::Inserted)
    }

    fn import_link(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let new_id = self.allocate(EntityKind::Link);
        rec.set("link_id", new_id.to_string());
        rec.set("blog_id", self.blog_id.as_str());
        insert_record(self.store, "link", rec)?;
        Ok(RowOutcome::Inserted)
    }

    fn import_post(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let cat_id = match rec.as_opt_int("cat_id").filter(|id| *id != 0) {
            Some(old) => Some(self.ids.require(EntityKind::Category, old, rec.line())?),
            None => None,
        };

        let old_id = rec.as_int("post_id");
        let new_id = self.allocate(EntityKind::Post);
        let user_id = self.resolve_user(rec.as_str("user_id"))?;
        let url = self.unique_post_url(rec, new_id)?;

        rec.set("post_id", new_id.to_string());
        rec.set("blog_id", self.blog_id.as_str());
        rec.set("cat_id", cat_id.map(|id| id.to_string()).unwrap_or_default());
        rec.set("user_id", user_id);
        rec.set("post_url", url);
        insert_record(self.store, "post", rec)?;

        self.ids.insert(EntityKind::Post, old_id, new_id);
        Ok(RowOutcome::Inserted)
    }

    /// meta / ping 只需改写 post_id
    fn import_post_child(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let post_id = self
            .ids
            .require(EntityKind::Post, rec.as_int("post_id"), rec.line())?;
        rec.set("post_id", post_id.to_string());
        let table = rec.section().to_string();
        insert_record(self.store, &table, rec)?;
        Ok(RowOutcome::Inserted)
    }

    fn import_comment(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let post_id = self
            .ids
            .require(EntityKind::Post, rec.as_int("post_id"), rec.line())?;
        let new_id = self.allocate(EntityKind::Comment);
        rec.set("comment_id", new_id.to_string());
        rec.set("post_id", post_id.to_string());
        insert_record(self.store, "comment", rec)?;
        Ok(RowOutcome::Inserted)
    }

    fn import_media(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let old_id = rec.as_int("media_id");
        let new_id = self.allocate(EntityKind::Media);
        let user_id = self.resolve_user(rec.as_str("user_id"))?;

        rec.set("media_id", new_id.to_string());
        rec.set("media_path", self.public_path.as_str());
        rec.set("user_id", user_id);
        insert_record(self.store, "media", rec)?;

        self.ids.insert(EntityKind::Media, old_id, new_id);
        Ok(RowOutcome::Inserted)
    }

    fn import_post_media(&mut self, rec: &mut Record) -> Result<RowOutcome> {
        let media_id = self
            .ids
            .require(EntityKind::Media, rec.as_int("media_id"), rec.line())?;
        let post_id = self
            .ids
            .require(EntityKind::Post, rec.as_int("post_id"), rec.line())?;
        rec.set("media_id", media_id.to_string());
        rec.set("post_id", post_id.to_string());
        insert_record(self.store, "post_media", rec)?;
        Ok(RowOutcome::Inserted)
    }
}

impl ModeState for SingleImport<'_> {
    fn registry() -> HandlerRegistry<Self> {
        let mut registry: HandlerRegistry<Self> = HandlerRegistry::new();
        registry
            .register("category", Self::import_category)
            .register("link", Self::import_link)
            .register("post", Self::import_post)
            .register("meta", Self::import_post_child)
            .register("ping", Self::import_post_child)
            .register("comment", Self::import_comment)
            .register("media", Self::import_media)
            .register("post_media", Self::import_post_media);
        registry
    }

    fn blog_id(&self) -> Option<&str> {
        Some(&self.blog_id)
    }

    fn id_maps(&self) -> Option<&IdMaps> {
        Some(&self.ids)
    }

    fn finish(&mut self, report: &mut super::ImportReport) {
        report.users_created = std::mem::take(&mut self.created_users);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_user_id() {
        assert_eq!(sanitize_user_id("john.doe"), "johndoe");
        assert_eq!(sanitize_user_id("x"), "x-a");
        assert_eq!(sanitize_user_id("?!"), "-a");
        assert_eq!(sanitize_user_id("admin"), "admin");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --  "), "");
    }

    #[test]
    fn test_date_prefix() {
        assert_eq!(date_prefix("2024-03-05 10:20:30"), "2024/03/05/");
        assert_eq!(date_prefix("garbage").len(), "2024/03/05/".len());
    }

    #[test]
    fn test_id_maps_report_missing_kind() {
        let mut ids = IdMaps::default();
        ids.insert(EntityKind::Post, 7, 70);
        assert_eq!(ids.require(EntityKind::Post, 7, 1).unwrap(), 70);
        assert!(matches!(
            ids.require(EntityKind::Media, 7, 9),
            Err(FlatBackupError::DanglingReference {
                kind: EntityKind::Media,
                line: 9
            })
        ));
        assert_eq!(ids.get(EntityKind::Comment, 7), None);
    }
}
