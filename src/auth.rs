//! 权限协作接口
//!
//! 导入前只检查一次权限；具体的认证由宿主应用完成。

use tracing::debug;

use crate::database::{FieldValue, RowStore, StoreResult};

/// 当前操作者的权限视图
pub trait AuthContext {
    fn is_super_admin(&self) -> bool;

    /// `permissions` 为逗号分隔的权限名，任意一个满足即可
    fn check_permission(&self, permissions: &str, blog_id: &str) -> bool;

    fn user_id(&self) -> &str;
}

/// 固定权限集合的实现（CLI 与测试使用）
#[derive(Debug, Clone)]
pub struct StaticAuth {
    user_id: String,
    super_admin: bool,
    /// (blog_id, 权限)
    grants: Vec<(String, String)>,
}

impl StaticAuth {
    pub fn super_admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            super_admin: true,
            grants: Vec::new(),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            super_admin: false,
            grants: Vec::new(),
        }
    }

    pub fn grant(mut self, blog_id: impl Into<String>, permission: impl Into<String>) -> Self {
        self.grants.push((blog_id.into(), permission.into()));
        self
    }

    /// 从 `user` 与 `permissions` 表读取用户的权限
    ///
    /// `permissions` 列形如 `|admin|usage|`；用户不存在时没有任何权限。
    pub fn load(store: &dyn RowStore, user_id: &str) -> StoreResult<Self> {
        let user = [FieldValue::from(user_id)];
        let sql = format!(
            "SELECT user_super FROM {} WHERE user_id = ?1",
            store.table("user")
        );
        let super_admin = store
            .select(&sql, &user)?
            .first()
            .and_then(|row| row.get_i64("user_super"))
            .unwrap_or(0)
            != 0;

        let mut auth = if super_admin {
            Self::super_admin(user_id)
        } else {
            Self::user(user_id)
        };

        let sql = format!(
            "SELECT blog_id, permissions FROM {} WHERE user_id = ?1",
            store.table("permissions")
        );
        for row in store.select(&sql, &user)?.iter() {
            let blog_id = row.get_string("blog_id");
            for perm in row.get_string("permissions").split('|').filter(|p| !p.is_empty()) {
                auth = auth.grant(blog_id.as_str(), perm);
            }
        }

        debug!(
            "[Auth] Loaded '{}': super admin {}, {} grants",
            user_id,
            auth.super_admin,
            auth.grants.len()
        );
        Ok(auth)
    }
}

impl AuthContext for StaticAuth {
    fn is_super_admin(&self) -> bool {
        self.super_admin
    }

    fn check_permission(&self, permissions: &str, blog_id: &str) -> bool {
        if self.super_admin {
            return true;
        }
        permissions.split(',').map(str::trim).any(|wanted| {
            self.grants
                .iter()
                .any(|(blog, perm)| blog == blog_id && perm == wanted)
        })
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_schema;
    use crate::database::SqliteStore;
    use crate::test_utils::database_seed::{insert_user, seed_blog, SeedConfig};
    use rusqlite::Connection;

    #[test]
    fn test_super_admin_passes_every_check() {
        let auth = StaticAuth::super_admin("root");
        assert!(auth.is_super_admin());
        assert!(auth.check_permission("admin", "anything"));
        assert_eq!(auth.user_id(), "root");
    }

    #[test]
    fn test_load_reads_user_and_permissions() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        create_schema(&conn, "dc_").unwrap();
        let store = SqliteStore::new(conn, "dc_");
        seed_blog(&store, &SeedConfig::default()).unwrap();
        insert_user(&store, "jane", false).unwrap();
        let mut cur = store.open_cursor("permissions");
        cur.set("user_id", "jane");
        cur.set("blog_id", "default");
        cur.set("permissions", "|usage|contentadmin|");
        cur.insert(&store).unwrap();

        let admin = StaticAuth::load(&store, "admin").unwrap();
        assert!(admin.is_super_admin());

        let jane = StaticAuth::load(&store, "jane").unwrap();
        assert!(!jane.is_super_admin());
        assert!(jane.check_permission("usage", "default"));
        assert!(jane.check_permission("contentadmin", "default"));
        assert!(!jane.check_permission("admin", "default"));

        let nobody = StaticAuth::load(&store, "nobody").unwrap();
        assert!(!nobody.is_super_admin());
        assert!(!nobody.check_permission("usage", "default"));
        assert_eq!(nobody.user_id(), "nobody");
    }

    #[test]
    fn test_grants_are_per_blog() {
        let auth = StaticAuth::user("jane").grant("default", "admin");
        assert!(auth.check_permission("usage,admin", "default"));
        assert!(!auth.check_permission("admin", "other"));
        assert!(!auth.check_permission("contentadmin", "default"));
    }
}
