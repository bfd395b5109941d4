use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::models::{EventEntry, Group, NewPost, Post, ScheduledTask, User};

pub mod mysql;
pub mod sqlite;

/// Current schema version, recorded in the `db_version` option after a
/// successful install or upgrade.
pub const DB_VERSION: i64 = 2;

/// Backend-agnostic persistence facade. One implementation per supported
/// database; the installer and the admin pages only talk to this trait.
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Executes the schema statements inside a single transaction.
    fn provision(&self, statements: &[String]) -> Result<(), String>;

    // ── Options ──

    fn option_get(&self, name: &str) -> Option<String>;
    fn option_set(&self, name: &str, value: &str) -> Result<(), String>;
    fn option_all(&self) -> HashMap<String, String>;

    // ── Users ──

    fn user_count(&self) -> i64;
    fn user_create(&self, username: &str, email: &str, password_hash: &str)
        -> Result<i64, String>;
    fn user_get_by_name(&self, username: &str) -> Option<User>;

    // ── Groups ──

    fn group_create(&self, name: &str) -> Result<i64, String>;
    fn group_list(&self) -> Vec<Group>;
    fn group_delete(&self, id: i64) -> Result<(), String>;
    fn group_add_member(&self, group_id: i64, user_id: i64) -> Result<(), String>;
    fn group_members(&self, group_id: i64) -> Vec<User>;
    fn group_grant(&self, group_id: i64, permission: &str) -> Result<(), String>;
    fn group_permission_count(&self, group_id: i64) -> i64;

    // ── Posts ──

    fn post_count(&self) -> i64;
    fn post_type_register(&self, name: &str) -> Result<(), String>;
    fn post_status_register(&self, name: &str, internal: bool) -> Result<(), String>;
    fn post_create(&self, post: &NewPost) -> Result<i64, String>;
    fn post_recent(&self, limit: i64) -> Vec<Post>;

    // ── Event log ──

    fn log_type_register(&self, kind: &str, module: &str) -> Result<(), String>;
    fn event_log(&self, message: &str, severity: &str, kind: &str, module: &str);
    fn event_recent(&self, limit: i64) -> Vec<EventEntry>;
    fn event_count(&self) -> i64;
    fn event_truncate(&self, keep_days: i64) -> Result<usize, String>;

    // ── Sessions ──

    fn session_create(&self, id: &str, hours: i64) -> Result<(), String>;
    fn session_valid(&self, id: &str) -> bool;
    fn session_destroy(&self, id: &str) -> Result<(), String>;

    // ── Scheduled tasks ──

    fn task_register_daily(&self, name: &str, description: &str) -> Result<(), String>;
    fn task_get(&self, name: &str) -> Option<ScheduledTask>;
}

/// Opens the store described by the database section of the config file.
pub fn open_store(cfg: &DatabaseConfig) -> Result<Arc<dyn Store>, String> {
    match cfg.backend.as_str() {
        "mysql" => Ok(Arc::new(mysql::MysqlStore::connect(cfg)?)),
        "sqlite" => Ok(Arc::new(sqlite::SqliteStore::open(
            &cfg.file,
            &cfg.table_prefix,
        )?)),
        other => Err(format!("unknown database backend '{}'", other)),
    }
}

// ── Schema templates ─────────────────────────────────────────

/// Directory holding one schema.sql template per backend.
pub const SCHEMA_DIR: &str = "schema";

pub fn schema_template_path(backend: &str) -> PathBuf {
    Path::new(SCHEMA_DIR).join(backend).join("schema.sql")
}

/// Loads the backend's schema template, fills in the `{prefix}` and
/// `{schema}` placeholders, and splits it into individual statements.
pub fn load_schema_statements(
    backend: &str,
    prefix: &str,
    schema: &str,
) -> Result<Vec<String>, String> {
    let path = schema_template_path(backend);
    let raw = fs::read_to_string(&path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
    Ok(split_statements(&substitute_placeholders(&raw, prefix, schema)))
}

pub fn substitute_placeholders(template: &str, prefix: &str, schema: &str) -> String {
    template
        .replace("{prefix}", prefix)
        .replace("{schema}", schema)
}

/// Statements in a template are separated by a blank line. Tolerates
/// templates that forgot the blank line after a `;` or used Windows line
/// endings. Comment-only chunks are dropped; MySQL rejects them as empty
/// queries.
pub fn split_statements(sql: &str) -> Vec<String> {
    let normalized = sql.replace("\r\n", "\n").replace('\r', "\n");
    let rejoined = Regex::new(r";\n([^\n])")
        .unwrap()
        .replace_all(normalized.trim(), ";\n\n$1")
        .to_string();
    let collapsed = Regex::new(r"\n{3,}")
        .unwrap()
        .replace_all(&rejoined, "\n\n")
        .to_string();
    collapsed
        .split("\n\n")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| s.lines().any(|line| !line.trim_start().starts_with("--")))
        .collect()
}

/// Table prefixes end up in SQL verbatim, so only identifier characters are
/// allowed.
pub fn valid_table_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
