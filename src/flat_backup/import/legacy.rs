//! 旧格式（2.0 之前）记录升级
//!
//! 在分派之前逐条改写段名与字段名，使旧文件的记录符合当前表结构。
//! 旧文件只有一个博客，凡是带 `blog_id` 列的表一律填 `default`。

use chrono::NaiveDateTime;

use crate::database::schema;
use crate::flat_backup::record::Record;

const LEGACY_BLOG_ID: &str = "default";
const MAX_URL_LEN: usize = 255;

/// 升级一条记录（原地修改）
pub fn upgrade(record: &mut Record) {
    match record.section() {
        "categorie" | "category" => {
            record.set_section("category");
            upgrade_category(record);
        }
        "link" => upgrade_link(record),
        "post" => upgrade_post(record),
        "post_meta" => {
            record.set_section("meta");
            upgrade_meta(record);
        }
        "comment" => upgrade_comment(record),
        _ => {}
    }

    let has_blog_id = schema::table(record.section())
        .map(|t| t.has_column("blog_id"))
        .unwrap_or(false);
    if has_blog_id {
        record.set("blog_id", LEGACY_BLOG_ID);
    }
}

fn upgrade_category(record: &mut Record) {
    record.rename("cat_libelle", "cat_title");
    record.rename("cat_libelle_url", "cat_url");
}

fn upgrade_link(record: &mut Record) {
    record.rename("href", "link_href");
    record.rename("label", "link_title");
    record.rename("title", "link_desc");
    record.rename("lang", "link_lang");
    record.rename("rel", "link_xfn");
    record.rename("position", "link_position");
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn upgrade_post(record: &mut Record) {
    record.rename("post_titre", "post_title");

    let date = NaiveDateTime::parse_from_str(record.as_str("post_dt").trim(), "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.format("%Y/%m/%d/").to_string())
        .unwrap_or_default();
    let url = format!(
        "{}{}-{}",
        date,
        record.as_str("post_id"),
        record.as_str("post_titre_url")
    );
    record.set("post_url", truncate_chars(&url, MAX_URL_LEN));

    let wiki = !record.as_str("post_content_wiki").is_empty();
    record.set("post_format", if wiki { "wiki" } else { "xhtml" });
    record.set("post_content_xhtml", record.as_str("post_content").to_string());
    record.set("post_excerpt_xhtml", record.as_str("post_chapo").to_string());
    if wiki {
        record.set("post_content", record.as_str("post_content_wiki").to_string());
        record.set("post_excerpt", record.as_str("post_chapo_wiki").to_string());
    } else {
        record.set("post_excerpt", record.as_str("post_chapo").to_string());
    }

    record.rename("post_pub", "post_status");
    record.set("post_status", record.as_int("post_status").to_string());
    record.set("post_type", "post");
    record.drop(&[
        "post_titre_url",
        "post_content_wiki",
        "post_chapo",
        "post_chapo_wiki",
    ]);
}

fn upgrade_meta(record: &mut Record) {
    record.drop(&["meta_id"]);
    record.rename("meta_key", "meta_type");
    record.rename("meta_value", "meta_id");
}

fn upgrade_comment(record: &mut Record) {
    record.rename("comment_auteur", "comment_author");

    let site = record.as_str("comment_site").trim().to_string();
    if !site.is_empty() && !site.starts_with("http://") && !site.starts_with("https://") {
        record.set("comment_site", format!("http://{}", site));
    }

    record.rename("comment_pub", "comment_status");
    record.set("comment_status", record.as_int("comment_status").to_string());
}
