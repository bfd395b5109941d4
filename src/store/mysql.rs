use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Pool, TxOpts};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{EventEntry, Group, NewPost, Post, ScheduledTask, User};

use super::{valid_table_prefix, Store};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What went wrong talking to the MySQL server, reduced to the cases the
/// installer reports on distinct form fields.
#[derive(Debug)]
pub enum MysqlFailure {
    AccessDenied,
    UnknownDatabase,
    Unreachable(String),
    Other(String),
}

impl MysqlFailure {
    pub fn message(&self) -> String {
        match self {
            MysqlFailure::AccessDenied => {
                "Access denied. Make sure these credentials are valid.".to_string()
            }
            MysqlFailure::UnknownDatabase => "That database does not exist.".to_string(),
            MysqlFailure::Unreachable(detail) => {
                format!("Could not connect to host. {}", detail)
            }
            MysqlFailure::Other(detail) => detail.clone(),
        }
    }
}

pub fn classify_error(e: &mysql::Error) -> MysqlFailure {
    match e {
        mysql::Error::MySqlError(server) if server.code == 1044 || server.code == 1045 => {
            MysqlFailure::AccessDenied
        }
        mysql::Error::MySqlError(server) if server.code == 1049 => MysqlFailure::UnknownDatabase,
        mysql::Error::IoError(io) => MysqlFailure::Unreachable(io.to_string()),
        other => MysqlFailure::Other(other.to_string()),
    }
}

/// Splits an optional `:port` suffix off the host field. Habitual inputs are
/// bare hostnames; the default MySQL port applies then.
pub fn split_host_port(host: &str) -> (String, u16) {
    if let Some(colon) = host.rfind(':') {
        if let Ok(port) = host[colon + 1..].parse::<u16>() {
            return (host[..colon].to_string(), port);
        }
    }
    (host.to_string(), 3306)
}

fn build_opts(host: &str, schema: &str, user: &str, pass: &str) -> OptsBuilder {
    let (hostname, port) = split_host_port(host);
    OptsBuilder::new()
        .ip_or_hostname(Some(hostname))
        .tcp_port(port)
        .user(Some(user))
        .pass(Some(pass))
        .db_name(Some(schema))
        .tcp_connect_timeout(Some(CONNECT_TIMEOUT))
}

/// One-shot connection attempt used by the installer's credential check.
pub fn check_credentials(
    host: &str,
    schema: &str,
    user: &str,
    pass: &str,
) -> Result<(), MysqlFailure> {
    match Conn::new(build_opts(host, schema, user, pass)) {
        Ok(_) => Ok(()),
        Err(e) => Err(classify_error(&e)),
    }
}

pub struct MysqlStore {
    pool: Pool,
    prefix: String,
}

impl MysqlStore {
    pub fn connect(cfg: &DatabaseConfig) -> Result<Self, String> {
        if !valid_table_prefix(&cfg.table_prefix) {
            return Err(format!("invalid table prefix '{}'", cfg.table_prefix));
        }
        let pool = Pool::new(build_opts(&cfg.host, &cfg.schema, &cfg.user, &cfg.password))
            .map_err(|e| classify_error(&e).message())?;
        let mut conn = pool
            .get_conn()
            .map_err(|e| classify_error(&e).message())?;
        conn.query_drop("SELECT 1")
            .map_err(|e| classify_error(&e).message())?;
        Ok(MysqlStore {
            pool,
            prefix: cfg.table_prefix.clone(),
        })
    }

    fn conn(&self) -> Result<mysql::PooledConn, String> {
        self.pool.get_conn().map_err(|e| e.to_string())
    }

    fn t(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

fn last_insert_id(conn: &mut mysql::PooledConn) -> Result<i64, String> {
    conn.query_first("SELECT LAST_INSERT_ID()")
        .map_err(|e| e.to_string())
        .map(|id| id.unwrap_or(0))
}

type UserRow = (i64, String, String, String, String);

fn user_from_row((id, username, email, password_hash, created_at): UserRow) -> User {
    User {
        id,
        username,
        email,
        password_hash,
        created_at,
    }
}

impl Store for MysqlStore {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    fn provision(&self, statements: &[String]) -> Result<(), String> {
        let mut conn = self.conn()?;
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(|e| e.to_string())?;
        for stmt in statements {
            tx.query_drop(stmt).map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())
    }

    // ── Options ──

    fn option_get(&self, name: &str) -> Option<String> {
        let mut conn = self.conn().ok()?;
        conn.exec_first(
            format!("SELECT value FROM {} WHERE name = ?", self.t("options")),
            (name,),
        )
        .ok()
        .flatten()
    }

    fn option_set(&self, name: &str, value: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} (name, value) VALUES (?, ?)
                 ON DUPLICATE KEY UPDATE value = VALUES(value)",
                self.t("options")
            ),
            (name, value),
        )
        .map_err(|e| e.to_string())
    }

    fn option_all(&self) -> HashMap<String, String> {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        conn.query_map(
            format!("SELECT name, value FROM {}", self.t("options")),
            |(name, value): (String, String)| (name, value),
        )
        .map(|rows| rows.into_iter().collect())
        .unwrap_or_default()
    }

    // ── Users ──

    fn user_count(&self) -> i64 {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_first(format!("SELECT COUNT(*) FROM {}", self.t("users")))
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    fn user_create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<i64, String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} (username, email, password_hash) VALUES (?, ?, ?)",
                self.t("users")
            ),
            (username, email, password_hash),
        )
        .map_err(|e| e.to_string())?;
        last_insert_id(&mut conn)
    }

    fn user_get_by_name(&self, username: &str) -> Option<User> {
        let mut conn = self.conn().ok()?;
        conn.exec_first(
            format!(
                "SELECT id, username, email, password_hash,
                        DATE_FORMAT(created_at, '%Y-%m-%d %H:%i:%S')
                 FROM {} WHERE username = ?",
                self.t("users")
            ),
            (username,),
        )
        .ok()
        .flatten()
        .map(user_from_row)
    }

    // ── Groups ──

    fn group_create(&self, name: &str) -> Result<i64, String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!("INSERT INTO {} (name) VALUES (?)", self.t("groups")),
            (name,),
        )
        .map_err(|e| e.to_string())?;
        last_insert_id(&mut conn)
    }

    fn group_list(&self) -> Vec<Group> {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        conn.query_map(
            format!("SELECT id, name FROM {} ORDER BY id ASC", self.t("groups")),
            |(id, name)| Group { id, name },
        )
        .unwrap_or_default()
    }

    fn group_delete(&self, id: i64) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!("DELETE FROM {} WHERE group_id = ?", self.t("group_members")),
            (id,),
        )
        .map_err(|e| e.to_string())?;
        conn.exec_drop(
            format!(
                "DELETE FROM {} WHERE group_id = ?",
                self.t("group_permissions")
            ),
            (id,),
        )
        .map_err(|e| e.to_string())?;
        conn.exec_drop(
            format!("DELETE FROM {} WHERE id = ?", self.t("groups")),
            (id,),
        )
        .map_err(|e| e.to_string())
    }

    fn group_add_member(&self, group_id: i64, user_id: i64) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (group_id, user_id) VALUES (?, ?)",
                self.t("group_members")
            ),
            (group_id, user_id),
        )
        .map_err(|e| e.to_string())
    }

    fn group_members(&self, group_id: i64) -> Vec<User> {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        conn.exec_map(
            format!(
                "SELECT u.id, u.username, u.email, u.password_hash,
                        DATE_FORMAT(u.created_at, '%Y-%m-%d %H:%i:%S')
                 FROM {} u JOIN {} m ON m.user_id = u.id
                 WHERE m.group_id = ? ORDER BY u.id ASC",
                self.t("users"),
                self.t("group_members")
            ),
            (group_id,),
            user_from_row,
        )
        .unwrap_or_default()
    }

    fn group_grant(&self, group_id: i64, permission: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (group_id, permission) VALUES (?, ?)",
                self.t("group_permissions")
            ),
            (group_id, permission),
        )
        .map_err(|e| e.to_string())
    }

    fn group_permission_count(&self, group_id: i64) -> i64 {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.exec_first(
            format!(
                "SELECT COUNT(*) FROM {} WHERE group_id = ?",
                self.t("group_permissions")
            ),
            (group_id,),
        )
        .ok()
        .flatten()
        .unwrap_or(0)
    }

    // ── Posts ──

    fn post_count(&self) -> i64 {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_first(format!("SELECT COUNT(*) FROM {}", self.t("posts")))
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    fn post_type_register(&self, name: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (name) VALUES (?)",
                self.t("posttype")
            ),
            (name,),
        )
        .map_err(|e| e.to_string())
    }

    fn post_status_register(&self, name: &str, internal: bool) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (name, internal) VALUES (?, ?)",
                self.t("poststatus")
            ),
            (name, internal),
        )
        .map_err(|e| e.to_string())
    }

    fn post_create(&self, post: &NewPost) -> Result<i64, String> {
        let mut conn = self.conn()?;
        let type_id: i64 = conn
            .exec_first(
                format!("SELECT id FROM {} WHERE name = ?", self.t("posttype")),
                (post.content_type.as_str(),),
            )
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown post type '{}'", post.content_type))?;
        let status_id: i64 = conn
            .exec_first(
                format!("SELECT id FROM {} WHERE name = ?", self.t("poststatus")),
                (post.status.as_str(),),
            )
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown post status '{}'", post.status))?;

        let published = post.status == "published";
        conn.exec_drop(
            format!(
                "INSERT INTO {} (title, slug, content, user_id, status, content_type, tags, pubdate)
                 VALUES (?, ?, ?, ?, ?, ?, ?, IF(?, NOW(), NULL))",
                self.t("posts")
            ),
            (
                post.title.as_str(),
                post.slug(),
                post.content.as_str(),
                post.user_id,
                status_id,
                type_id,
                post.tags.as_str(),
                published,
            ),
        )
        .map_err(|e| e.to_string())?;
        last_insert_id(&mut conn)
    }

    fn post_recent(&self, limit: i64) -> Vec<Post> {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        conn.exec_map(
            format!(
                "SELECT p.id, p.title, p.slug, p.content, p.user_id, s.name, t.name,
                        p.tags, DATE_FORMAT(p.pubdate, '%Y-%m-%d %H:%i:%S'),
                        DATE_FORMAT(p.created_at, '%Y-%m-%d %H:%i:%S')
                 FROM {} p
                 JOIN {} s ON s.id = p.status
                 JOIN {} t ON t.id = p.content_type
                 ORDER BY p.id DESC LIMIT ?",
                self.t("posts"),
                self.t("poststatus"),
                self.t("posttype")
            ),
            (limit,),
            |(id, title, slug, content, user_id, status, content_type, tags, pubdate, created_at): (
                i64,
                String,
                String,
                String,
                i64,
                String,
                String,
                Option<String>,
                Option<String>,
                String,
            )| Post {
                id,
                title,
                slug,
                content,
                user_id,
                status,
                content_type,
                tags: tags.unwrap_or_default(),
                pubdate,
                created_at,
            },
        )
        .unwrap_or_default()
    }

    // ── Event log ──

    fn log_type_register(&self, kind: &str, module: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (kind, module) VALUES (?, ?)",
                self.t("log_types")
            ),
            (kind, module),
        )
        .map_err(|e| e.to_string())
    }

    fn event_log(&self, message: &str, severity: &str, kind: &str, module: &str) {
        if let Ok(mut conn) = self.conn() {
            let _ = conn.exec_drop(
                format!(
                    "INSERT INTO {} (message, severity, kind, module) VALUES (?, ?, ?, ?)",
                    self.t("log")
                ),
                (message, severity, kind, module),
            );
        }
    }

    fn event_recent(&self, limit: i64) -> Vec<EventEntry> {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        conn.exec_map(
            format!(
                "SELECT id, message, severity, kind, module,
                        DATE_FORMAT(created_at, '%Y-%m-%d %H:%i:%S')
                 FROM {} ORDER BY id DESC LIMIT ?",
                self.t("log")
            ),
            (limit,),
            |(id, message, severity, kind, module, created_at)| EventEntry {
                id,
                message,
                severity,
                kind,
                module,
                created_at,
            },
        )
        .unwrap_or_default()
    }

    fn event_count(&self) -> i64 {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_first(format!("SELECT COUNT(*) FROM {}", self.t("log")))
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    fn event_truncate(&self, keep_days: i64) -> Result<usize, String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "DELETE FROM {} WHERE created_at < DATE_SUB(NOW(), INTERVAL ? DAY)",
                self.t("log")
            ),
            (keep_days,),
        )
        .map_err(|e| e.to_string())?;
        let removed: i64 = conn
            .query_first("SELECT ROW_COUNT()")
            .map_err(|e| e.to_string())?
            .unwrap_or(0);
        Ok(removed.max(0) as usize)
    }

    // ── Sessions ──

    fn session_create(&self, id: &str, hours: i64) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT INTO {} (id, expires_at) VALUES (?, DATE_ADD(NOW(), INTERVAL ? HOUR))",
                self.t("sessions")
            ),
            (id, hours),
        )
        .map_err(|e| e.to_string())
    }

    fn session_valid(&self, id: &str) -> bool {
        let mut conn = match self.conn() {
            Ok(c) => c,
            Err(_) => return false,
        };
        conn.exec_first::<i64, _, _>(
            format!(
                "SELECT COUNT(*) FROM {} WHERE id = ? AND expires_at > NOW()",
                self.t("sessions")
            ),
            (id,),
        )
        .ok()
        .flatten()
        .unwrap_or(0)
            > 0
    }

    fn session_destroy(&self, id: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!("DELETE FROM {} WHERE id = ?", self.t("sessions")),
            (id,),
        )
        .map_err(|e| e.to_string())
    }

    // ── Scheduled tasks ──

    fn task_register_daily(&self, name: &str, description: &str) -> Result<(), String> {
        let mut conn = self.conn()?;
        conn.exec_drop(
            format!(
                "INSERT IGNORE INTO {} (name, description, period) VALUES (?, ?, ?)",
                self.t("tasks")
            ),
            (name, description, crate::models::task::DAILY_SECS),
        )
        .map_err(|e| e.to_string())
    }

    fn task_get(&self, name: &str) -> Option<ScheduledTask> {
        let mut conn = self.conn().ok()?;
        conn.exec_first(
            format!(
                "SELECT name, description, period,
                        DATE_FORMAT(last_run, '%Y-%m-%d %H:%i:%S')
                 FROM {} WHERE name = ?",
                self.t("tasks")
            ),
            (name,),
        )
        .ok()
        .flatten()
        .map(
            |(name, description, period, last_run): (String, String, i64, Option<String>)| {
                ScheduledTask {
                    name,
                    description,
                    period,
                    last_run,
                }
            },
        )
    }
}
