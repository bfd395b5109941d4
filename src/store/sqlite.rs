use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::HashMap;

use crate::models::{EventEntry, Group, NewPost, Post, ScheduledTask, User};

use super::{valid_table_prefix, Store};

pub type DbPool = Pool<SqliteConnectionManager>;

pub struct SqliteStore {
    pool: DbPool,
    prefix: String,
}

impl SqliteStore {
    pub fn open(file: &str, prefix: &str) -> Result<Self, String> {
        let manager = SqliteConnectionManager::file(file);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| e.to_string())?;

        // WAL for better concurrent read performance
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| e.to_string())?;
        drop(conn);

        Self::from_pool(pool, prefix)
    }

    pub fn from_pool(pool: DbPool, prefix: &str) -> Result<Self, String> {
        if !valid_table_prefix(prefix) {
            return Err(format!("invalid table prefix '{}'", prefix));
        }
        Ok(SqliteStore {
            pool,
            prefix: prefix.to_string(),
        })
    }

    fn conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, String> {
        self.pool.get().map_err(|e| e.to_string())
    }

    fn t(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn provision(&self, statements: &[String]) -> Result<(), String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        for stmt in statements {
            tx.execute_batch(stmt).map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    // ── Options ──

    fn option_get(&self, name: &str) -> Option<String> {
        let conn = self.conn().ok()?;
        conn.query_row(
            &format!("SELECT value FROM {} WHERE name = ?1", self.t("options")),
            params![name],
            |row| row.get(0),
        )
        .ok()
    }

    fn option_set(&self, name: &str, value: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = ?2",
                self.t("options")
            ),
            params![name, value],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn option_all(&self) -> HashMap<String, String> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let mut stmt =
            match conn.prepare(&format!("SELECT name, value FROM {}", self.t("options"))) {
                Ok(s) => s,
                Err(_) => return HashMap::new(),
            };
        stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    // ── Users ──

    fn user_count(&self) -> i64 {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.t("users")),
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    fn user_create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<i64, String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (username, email, password_hash) VALUES (?1, ?2, ?3)",
                self.t("users")
            ),
            params![username, email, password_hash],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    fn user_get_by_name(&self, username: &str) -> Option<User> {
        let conn = self.conn().ok()?;
        conn.query_row(
            &format!(
                "SELECT id, username, email, password_hash, created_at FROM {} WHERE username = ?1",
                self.t("users")
            ),
            params![username],
            Self::user_from_row,
        )
        .ok()
    }

    // ── Groups ──

    fn group_create(&self, name: &str) -> Result<i64, String> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", self.t("groups")),
            params![name],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    fn group_list(&self) -> Vec<Group> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT id, name FROM {} ORDER BY id ASC",
            self.t("groups")
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    fn group_delete(&self, id: i64) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE group_id = ?1", self.t("group_members")),
            params![id],
        )
        .map_err(|e| e.to_string())?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE group_id = ?1",
                self.t("group_permissions")
            ),
            params![id],
        )
        .map_err(|e| e.to_string())?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.t("groups")),
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn group_add_member(&self, group_id: i64, user_id: i64) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (group_id, user_id) VALUES (?1, ?2)",
                self.t("group_members")
            ),
            params![group_id, user_id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn group_members(&self, group_id: i64) -> Vec<User> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let sql = format!(
            "SELECT u.id, u.username, u.email, u.password_hash, u.created_at
             FROM {} u JOIN {} m ON m.user_id = u.id
             WHERE m.group_id = ?1 ORDER BY u.id ASC",
            self.t("users"),
            self.t("group_members")
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![group_id], Self::user_from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    fn group_grant(&self, group_id: i64, permission: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (group_id, permission) VALUES (?1, ?2)",
                self.t("group_permissions")
            ),
            params![group_id, permission],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn group_permission_count(&self, group_id: i64) -> i64 {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE group_id = ?1",
                self.t("group_permissions")
            ),
            params![group_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    // ── Posts ──

    fn post_count(&self) -> i64 {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.t("posts")),
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    fn post_type_register(&self, name: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (name) VALUES (?1)",
                self.t("posttype")
            ),
            params![name],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn post_status_register(&self, name: &str, internal: bool) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (name, internal) VALUES (?1, ?2)",
                self.t("poststatus")
            ),
            params![name, internal as i32],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn post_create(&self, post: &NewPost) -> Result<i64, String> {
        let conn = self.conn()?;
        let type_id: i64 = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", self.t("posttype")),
                params![post.content_type],
                |row| row.get(0),
            )
            .map_err(|_| format!("unknown post type '{}'", post.content_type))?;
        let status_id: i64 = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", self.t("poststatus")),
                params![post.status],
                |row| row.get(0),
            )
            .map_err(|_| format!("unknown post status '{}'", post.status))?;

        let published = post.status == "published";
        conn.execute(
            &format!(
                "INSERT INTO {} (title, slug, content, user_id, status, content_type, tags, pubdate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                         CASE WHEN ?8 THEN CURRENT_TIMESTAMP ELSE NULL END)",
                self.t("posts")
            ),
            params![
                post.title,
                post.slug(),
                post.content,
                post.user_id,
                status_id,
                type_id,
                post.tags,
                published
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    fn post_recent(&self, limit: i64) -> Vec<Post> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let sql = format!(
            "SELECT p.id, p.title, p.slug, p.content, p.user_id, s.name, t.name,
                    p.tags, p.pubdate, p.created_at
             FROM {} p
             JOIN {} s ON s.id = p.status
             JOIN {} t ON t.id = p.content_type
             ORDER BY p.id DESC LIMIT ?1",
            self.t("posts"),
            self.t("poststatus"),
            self.t("posttype")
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![limit], |row| {
            Ok(Post {
                id: row.get(0)?,
                title: row.get(1)?,
                slug: row.get(2)?,
                content: row.get(3)?,
                user_id: row.get(4)?,
                status: row.get(5)?,
                content_type: row.get(6)?,
                tags: row.get(7)?,
                pubdate: row.get(8)?,
                created_at: row.get(9)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    // ── Event log ──

    fn log_type_register(&self, kind: &str, module: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (kind, module) VALUES (?1, ?2)",
                self.t("log_types")
            ),
            params![kind, module],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn event_log(&self, message: &str, severity: &str, kind: &str, module: &str) {
        if let Ok(conn) = self.conn() {
            let _ = conn.execute(
                &format!(
                    "INSERT INTO {} (message, severity, kind, module) VALUES (?1, ?2, ?3, ?4)",
                    self.t("log")
                ),
                params![message, severity, kind, module],
            );
        }
    }

    fn event_recent(&self, limit: i64) -> Vec<EventEntry> {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!(
            "SELECT id, message, severity, kind, module, created_at
             FROM {} ORDER BY id DESC LIMIT ?1",
            self.t("log")
        )) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![limit], |row| {
            Ok(EventEntry {
                id: row.get(0)?,
                message: row.get(1)?,
                severity: row.get(2)?,
                kind: row.get(3)?,
                module: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    fn event_count(&self) -> i64 {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.t("log")),
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    fn event_truncate(&self, keep_days: i64) -> Result<usize, String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE created_at < datetime('now', ?1)",
                self.t("log")
            ),
            params![format!("-{} days", keep_days)],
        )
        .map_err(|e| e.to_string())
    }

    // ── Sessions ──

    fn session_create(&self, id: &str, hours: i64) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, expires_at) VALUES (?1, datetime('now', ?2))",
                self.t("sessions")
            ),
            params![id, format!("+{} hours", hours)],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn session_valid(&self, id: &str) -> bool {
        let conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return false,
        };
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE id = ?1 AND expires_at > datetime('now')",
                    self.t("sessions")
                ),
                params![id],
                |row| row.get(0),
            )
            .unwrap_or(0);
        count > 0
    }

    fn session_destroy(&self, id: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.t("sessions")),
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Scheduled tasks ──

    fn task_register_daily(&self, name: &str, description: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (name, description, period) VALUES (?1, ?2, ?3)",
                self.t("tasks")
            ),
            params![name, description, crate::models::task::DAILY_SECS],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn task_get(&self, name: &str) -> Option<ScheduledTask> {
        let conn = self.conn().ok()?;
        conn.query_row(
            &format!(
                "SELECT name, description, period, last_run FROM {} WHERE name = ?1",
                self.t("tasks")
            ),
            params![name],
            |row| {
                Ok(ScheduledTask {
                    name: row.get(0)?,
                    description: row.get(1)?,
                    period: row.get(2)?,
                    last_run: row.get(3)?,
                })
            },
        )
        .ok()
    }
}
