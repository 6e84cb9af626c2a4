/// 测试数据库播种工具
/// 用于创建固定的博客数据，确保导入/导出测试的可重复性
///
/// 主键是固定的，同一数据库只应播种一次；
/// 其他博客用 [`insert_blog`] 创建空壳。
use crate::database::{RowStore, StoreResult};

/// 种子数据配置
pub struct SeedConfig {
    pub blog_id: String,
    /// 写入 `system.public_path` 设置，媒体行使用同一路径
    pub public_path: String,
    /// 是否创建链接、标签、附件与引用通告
    pub create_extras: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            blog_id: "default".to_string(),
            public_path: "public".to_string(),
            create_extras: true,
        }
    }
}

/// 播种结果
#[derive(Debug, Clone, Default)]
pub struct SeedResult {
    pub categories: usize,
    pub posts: usize,
    pub comments: usize,
    pub media: usize,
    pub links: usize,
    pub metas: usize,
}

const SEED_DT: &str = "2024-01-15 10:00:00";

/// 创建一个空博客
pub fn insert_blog(store: &dyn RowStore, blog_id: &str) -> StoreResult<()> {
    let mut cur = store.open_cursor("blog");
    cur.set("blog_id", blog_id);
    cur.set("blog_uid", format!("uid-{}", blog_id));
    cur.set("blog_creadt", SEED_DT);
    cur.set("blog_upddt", SEED_DT);
    cur.set("blog_url", format!("http://example.org/{}/", blog_id));
    cur.set("blog_name", format!("Blog {}", blog_id));
    cur.set("blog_desc", "");
    cur.set("blog_status", 1i64);
    cur.insert(store)
}

/// 创建用户
pub fn insert_user(store: &dyn RowStore, user_id: &str, super_admin: bool) -> StoreResult<()> {
    let mut cur = store.open_cursor("user");
    cur.set("user_id", user_id);
    cur.set("user_super", super_admin);
    cur.set("user_status", 1i64);
    cur.set("user_pwd", "x");
    cur.set("user_name", user_id);
    cur.set("user_email", format!("{}@example.org", user_id));
    cur.set("user_lang", "en");
    cur.set("user_tz", "UTC");
    cur.set("user_creadt", SEED_DT);
    cur.set("user_upddt", SEED_DT);
    cur.insert(store)
}

fn insert_category(
    store: &dyn RowStore,
    blog_id: &str,
    id: i64,
    title: &str,
    url: &str,
    lft: i64,
) -> StoreResult<()> {
    let mut cur = store.open_cursor("category");
    cur.set("cat_id", id);
    cur.set("blog_id", blog_id);
    cur.set("cat_title", title);
    cur.set("cat_url", url);
    cur.set("cat_desc", "");
    cur.set("cat_position", id);
    cur.set("cat_lft", lft);
    cur.set("cat_rgt", lft + 1);
    cur.insert(store)
}

fn insert_post(
    store: &dyn RowStore,
    blog_id: &str,
    id: i64,
    cat_id: Option<i64>,
    title: &str,
) -> StoreResult<()> {
    let slug = title.to_lowercase().replace(' ', "-");
    let mut cur = store.open_cursor("post");
    cur.set("post_id", id);
    cur.set("blog_id", blog_id);
    cur.set("user_id", "admin");
    cur.set("cat_id", cat_id);
    cur.set("post_dt", SEED_DT);
    cur.set("post_tz", "UTC");
    cur.set("post_creadt", SEED_DT);
    cur.set("post_upddt", SEED_DT);
    cur.set("post_type", "post");
    cur.set("post_format", "xhtml");
    cur.set("post_url", format!("2024/01/15/{}", slug));
    cur.set("post_lang", "en");
    cur.set("post_title", title);
    cur.set("post_content", format!("<p>{}\n\"quoted\" \\ body</p>", title));
    cur.set("post_content_xhtml", format!("<p>{}</p>", title));
    cur.set("post_status", 1i64);
    cur.set("post_open_comment", true);
    cur.set("post_open_tb", false);
    cur.set("nb_comment", i64::from(id == 2));
    cur.insert(store)
}

/// 播种一个博客：2 个分类、3 篇文章（第 3 篇无分类）、文章 2 上的 1 条评论、1 个媒体
pub fn seed_blog(store: &dyn RowStore, config: &SeedConfig) -> StoreResult<SeedResult> {
    let blog = config.blog_id.as_str();
    let mut result = SeedResult::default();

    insert_blog(store, blog)?;
    insert_user(store, "admin", true)?;

    let mut cur = store.open_cursor("permissions");
    cur.set("user_id", "admin");
    cur.set("blog_id", blog);
    cur.set("permissions", "|admin|");
    cur.insert(store)?;

    let mut cur = store.open_cursor("pref");
    cur.set("pref_id", "editor");
    cur.set("user_id", "admin");
    cur.set("pref_ws", "interface");
    cur.set("pref_value", "xhtml");
    cur.set("pref_type", "string");
    cur.insert(store)?;

    for (id, value) in [("public_path", config.public_path.as_str()), ("lang", "en")] {
        let mut cur = store.open_cursor("setting");
        cur.set("setting_id", id);
        cur.set("blog_id", blog);
        cur.set("setting_ns", "system");
        cur.set("setting_value", value);
        cur.set("setting_type", "string");
        cur.insert(store)?;
    }

    insert_category(store, blog, 1, "News", "news", 1)?;
    insert_category(store, blog, 2, "Misc", "misc", 3)?;
    result.categories = 2;

    insert_post(store, blog, 1, Some(1), "First post")?;
    insert_post(store, blog, 2, Some(2), "Second post")?;
    insert_post(store, blog, 3, None, "Third post")?;
    result.posts = 3;

    let mut cur = store.open_cursor("comment");
    cur.set("comment_id", 1i64);
    cur.set("post_id", 2i64);
    cur.set("comment_dt", SEED_DT);
    cur.set("comment_tz", "UTC");
    cur.set("comment_author", "Reader");
    cur.set("comment_email", "reader@example.org");
    cur.set("comment_content", "Nice, \"really\"");
    cur.set("comment_ip", "127.0.0.1");
    cur.set("comment_status", 1i64);
    cur.insert(store)?;
    result.comments = 1;

    let mut cur = store.open_cursor("media");
    cur.set("media_id", 1i64);
    cur.set("user_id", "admin");
    cur.set("media_path", config.public_path.as_str());
    cur.set("media_title", "Logo");
    cur.set("media_file", "logo.png");
    cur.set("media_dir", ".");
    cur.set("media_dt", SEED_DT);
    cur.set("media_creadt", SEED_DT);
    cur.set("media_upddt", SEED_DT);
    cur.set("media_private", false);
    cur.insert(store)?;
    result.media = 1;

    if config.create_extras {
        let mut cur = store.open_cursor("link");
        cur.set("link_id", 1i64);
        cur.set("blog_id", blog);
        cur.set("link_href", "http://example.com");
        cur.set("link_title", "Example");
        cur.set("link_position", 1i64);
        cur.insert(store)?;
        result.links = 1;

        for (meta_id, post_id) in [("rust", 1i64), ("backup", 2i64)] {
            let mut cur = store.open_cursor("meta");
            cur.set("meta_id", meta_id);
            cur.set("meta_type", "tag");
            cur.set("post_id", post_id);
            cur.insert(store)?;
            result.metas += 1;
        }

        let mut cur = store.open_cursor("post_media");
        cur.set("media_id", 1i64);
        cur.set("post_id", 1i64);
        cur.set("link_type", "attachment");
        cur.insert(store)?;

        let mut cur = store.open_cursor("ping");
        cur.set("post_id", 1i64);
        cur.set("ping_url", "http://example.net/trackback");
        cur.set("ping_dt", SEED_DT);
        cur.insert(store)?;
    }

    Ok(result)
}
