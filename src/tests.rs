#![cfg(test)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::admin::menu::{and_list, main_menu};
use crate::auth;
use crate::boot;
use crate::config::{DatabaseConfig, ServerConfig, SiteConfig};
use crate::install::checks::{mysql_check, sqlite_check, MysqlCheckForm};
use crate::install::wizard::{self, InstallForm, SubmissionCheck};
use crate::models::group::BASE_PERMISSIONS;
use crate::rewrite::{self, RewriteStatus};
use crate::store::sqlite::SqliteStore;
use crate::store::{self, Store};

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Fresh in-memory store, provisioned from the real sqlite schema template.
/// Uses a named shared-cache in-memory DB so every pooled connection sees
/// the same data.
fn test_store() -> SqliteStore {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:testdb_{}?mode=memory&cache=shared", id);
    let store = SqliteStore::open(&uri, "tidings__").expect("Failed to open test store");
    let statements = store::load_schema_statements("sqlite", "tidings__", "")
        .expect("Failed to load schema template");
    store.provision(&statements).expect("Failed to provision");
    store
}

/// Fast bcrypt hash for tests (cost=4 instead of DEFAULT_COST=12).
fn fast_hash(password: &str) -> String {
    bcrypt::hash(password, 4).unwrap()
}

/// A form that would pass every wizard check against a sqlite file in `dir`.
fn complete_form(dir: &Path) -> InstallForm {
    let mut form = InstallForm::defaults();
    form.admin_email = "admin@example.org".to_string();
    // already-hashed password exercises the passthrough and keeps the test
    // off the expensive default bcrypt cost
    form.admin_pass1 = fast_hash("sekrit");
    form.admin_pass2 = form.admin_pass1.clone();
    form.db_file = dir.join("tidings.db").to_str().unwrap().to_string();
    form
}

// ═══════════════════════════════════════════════════════════
// Schema templates
// ═══════════════════════════════════════════════════════════

#[test]
fn schema_placeholder_substitution() {
    let out = store::substitute_placeholders(
        "CREATE TABLE {prefix}options; USE {schema};",
        "t__",
        "mydb",
    );
    assert_eq!(out, "CREATE TABLE t__options; USE mydb;");
}

#[test]
fn schema_split_on_blank_lines() {
    let sql = "CREATE TABLE a (id INTEGER);\n\nCREATE TABLE b (id INTEGER);";
    let statements = store::split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("CREATE TABLE a"));
    assert!(statements[1].starts_with("CREATE TABLE b"));
}

#[test]
fn schema_split_rejoins_missing_blank_line() {
    let sql = "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);";
    assert_eq!(store::split_statements(sql).len(), 2);
}

#[test]
fn schema_split_normalizes_line_endings() {
    let sql = "CREATE TABLE a (id INTEGER);\r\n\r\nCREATE TABLE b (id INTEGER);\r";
    let statements = store::split_statements(sql);
    assert_eq!(statements.len(), 2);
    assert!(!statements[0].contains('\r'));
}

#[test]
fn schema_split_collapses_extra_blank_lines() {
    let sql = "CREATE TABLE a (id INTEGER);\n\n\n\n\nCREATE TABLE b (id INTEGER);";
    assert_eq!(store::split_statements(sql).len(), 2);
}

#[test]
fn schema_split_drops_comment_only_chunks() {
    let sql = "-- header\n-- more header\n\nCREATE TABLE a (id INTEGER);";
    let statements = store::split_statements(sql);
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("CREATE TABLE"));
}

#[test]
fn schema_templates_parse() {
    let statements = store::load_schema_statements("sqlite", "p__", "").unwrap();
    assert!(statements.len() >= 10);
    assert!(statements.iter().all(|s| s.contains("p__")));
    assert!(!statements.iter().any(|s| s.contains("{prefix}")));

    let mysql = store::load_schema_statements("mysql", "p__", "mydb").unwrap();
    assert!(mysql.len() >= 10);
    assert!(!mysql.iter().any(|s| s.contains("{schema}")));
}

#[test]
fn table_prefix_validation() {
    assert!(store::valid_table_prefix("tidings__"));
    assert!(store::valid_table_prefix("t1"));
    assert!(!store::valid_table_prefix(""));
    assert!(!store::valid_table_prefix("bad prefix"));
    assert!(!store::valid_table_prefix("drop;--"));
}

// ═══════════════════════════════════════════════════════════
// Config file
// ═══════════════════════════════════════════════════════════

#[test]
fn connection_string_sqlite() {
    let cfg = DatabaseConfig {
        backend: "sqlite".to_string(),
        file: "website/db/tidings.db".to_string(),
        ..Default::default()
    };
    assert_eq!(cfg.connection_string(), "sqlite:website/db/tidings.db");
}

#[test]
fn connection_string_mysql() {
    let cfg = DatabaseConfig {
        backend: "mysql".to_string(),
        host: "db.internal".to_string(),
        schema: "tidings".to_string(),
        ..Default::default()
    };
    assert_eq!(cfg.connection_string(), "mysql:host=db.internal;dbname=tidings");
}

#[test]
fn connection_string_round_trip() {
    let parsed = DatabaseConfig::parse_connection_string("mysql:host=db.internal;dbname=blog")
        .unwrap();
    assert_eq!(parsed.backend, "mysql");
    assert_eq!(parsed.host, "db.internal");
    assert_eq!(parsed.schema, "blog");

    let parsed = DatabaseConfig::parse_connection_string("sqlite:data/site.db").unwrap();
    assert_eq!(parsed.backend, "sqlite");
    assert_eq!(parsed.file, "data/site.db");

    assert!(DatabaseConfig::parse_connection_string("postgres:whatever").is_none());
    assert!(DatabaseConfig::parse_connection_string("garbage").is_none());
}

#[test]
fn config_write_and_load_round_trip() {
    let tmp = TempDir::new().unwrap();
    let cfg = SiteConfig::default();

    assert!(cfg.write(tmp.path()).unwrap());
    let loaded = SiteConfig::load(&SiteConfig::path_in(tmp.path())).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn config_write_skips_unchanged_file() {
    let tmp = TempDir::new().unwrap();
    let cfg = SiteConfig::default();

    assert!(cfg.write(tmp.path()).unwrap());
    // same effective values: nothing to do
    assert!(!cfg.write(tmp.path()).unwrap());

    // a different database file means a real rewrite
    let mut changed = cfg.clone();
    changed.database.file = "elsewhere.db".to_string();
    assert!(changed.write(tmp.path()).unwrap());
}

#[test]
fn config_load_rejects_garbage() {
    let tmp = TempDir::new().unwrap();
    let path = SiteConfig::path_in(tmp.path());
    fs::write(&path, "not [valid toml").unwrap();
    assert!(SiteConfig::load(&path).is_none());
}

#[test]
fn base_path_from_base_url() {
    let mut cfg = SiteConfig::default();
    assert_eq!(cfg.base_path(), "");

    cfg.server.base_url = "http://example.com/blog/".to_string();
    assert_eq!(cfg.base_path(), "blog");

    cfg.server.base_url = "https://example.com/a/b".to_string();
    assert_eq!(cfg.base_path(), "a/b");
}

// ═══════════════════════════════════════════════════════════
// Store (sqlite)
// ═══════════════════════════════════════════════════════════

#[test]
fn options_set_get_upsert() {
    let store = test_store();
    assert_eq!(store.option_get("title"), None);
    store.option_set("title", "First").unwrap();
    store.option_set("title", "Second").unwrap();
    assert_eq!(store.option_get("title"), Some("Second".to_string()));
    assert!(store.option_all().contains_key("title"));
}

#[test]
fn user_create_and_lookup() {
    let store = test_store();
    assert_eq!(store.user_count(), 0);
    let id = store
        .user_create("admin", "admin@example.org", &fast_hash("pw"))
        .unwrap();
    assert!(id > 0);
    assert_eq!(store.user_count(), 1);

    let user = store.user_get_by_name("admin").unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.email, "admin@example.org");
    assert!(auth::verify_password("pw", &user.password_hash));
    assert!(store.user_get_by_name("nobody").is_none());
}

#[test]
fn duplicate_username_rejected() {
    let store = test_store();
    store.user_create("admin", "a@example.org", "h").unwrap();
    assert!(store.user_create("admin", "b@example.org", "h").is_err());
}

#[test]
fn group_membership_and_permissions() {
    let store = test_store();
    let user_id = store.user_create("admin", "a@example.org", "h").unwrap();
    let group_id = store.group_create("admin").unwrap();

    store.group_add_member(group_id, user_id).unwrap();
    store.group_add_member(group_id, user_id).unwrap(); // idempotent
    store.group_grant(group_id, "manage_posts").unwrap();
    store.group_grant(group_id, "manage_posts").unwrap(); // idempotent
    store.group_grant(group_id, "view_logs").unwrap();

    let members = store.group_members(group_id);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].username, "admin");
    assert_eq!(store.group_permission_count(group_id), 2);

    store.group_delete(group_id).unwrap();
    assert!(store.group_list().is_empty());
    assert_eq!(store.group_permission_count(group_id), 0);
}

#[test]
fn post_create_resolves_registries() {
    let store = test_store();
    store.post_type_register("entry").unwrap();
    store.post_status_register("published", false).unwrap();
    let user_id = store.user_create("admin", "a@example.org", "h").unwrap();

    let id = store
        .post_create(&crate::models::NewPost {
            title: "Hello World".to_string(),
            content: "hi".to_string(),
            user_id,
            status: "published".to_string(),
            content_type: "entry".to_string(),
            tags: "tidings".to_string(),
        })
        .unwrap();
    assert!(id > 0);
    assert_eq!(store.post_count(), 1);

    let recent = store.post_recent(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].title, "Hello World");
    assert_eq!(recent[0].slug, "hello-world");
    assert_eq!(recent[0].status, "published");
    assert_eq!(recent[0].content_type, "entry");
    assert!(recent[0].pubdate.is_some());
}

#[test]
fn post_create_unknown_registry_errors() {
    let store = test_store();
    store.post_type_register("entry").unwrap();
    let post = crate::models::NewPost {
        title: "x".to_string(),
        content: String::new(),
        user_id: 1,
        status: "published".to_string(),
        content_type: "entry".to_string(),
        tags: String::new(),
    };
    // status never registered
    assert!(store.post_create(&post).is_err());
    assert_eq!(store.post_count(), 0);
}

#[test]
fn event_log_and_truncate() {
    let store = test_store();
    store.log_type_register("default", "tidings").unwrap();
    store.event_log("one", "info", "default", "tidings");
    store.event_log("two", "warning", "default", "tidings");

    assert_eq!(store.event_count(), 2);
    let recent = store.event_recent(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].message, "two"); // newest first

    // fresh rows survive a truncate that keeps a month
    assert_eq!(store.event_truncate(30).unwrap(), 0);
    assert_eq!(store.event_count(), 2);
}

#[test]
fn sessions_lifecycle() {
    let store = test_store();
    store.session_create("s1", 1).unwrap();
    assert!(store.session_valid("s1"));
    assert!(!store.session_valid("unknown"));

    store.session_destroy("s1").unwrap();
    assert!(!store.session_valid("s1"));

    // zero-hour expiry is already in the past
    store.session_create("s2", 0).unwrap();
    assert!(!store.session_valid("s2"));
}

#[test]
fn task_registration_is_idempotent() {
    let store = test_store();
    store
        .task_register_daily("truncate_log", "Truncate the event log")
        .unwrap();
    store
        .task_register_daily("truncate_log", "Different description")
        .unwrap();

    let task = store.task_get("truncate_log").unwrap();
    assert_eq!(task.description, "Truncate the event log");
    assert_eq!(task.period, crate::models::task::DAILY_SECS);
    assert!(store.task_get("no_such_task").is_none());
}

#[test]
fn store_factory_rejects_unknown_backend() {
    let cfg = DatabaseConfig {
        backend: "postgres".to_string(),
        ..Default::default()
    };
    assert!(store::open_store(&cfg).is_err());
}

// ═══════════════════════════════════════════════════════════
// Wizard: defaults, prefill, validation
// ═══════════════════════════════════════════════════════════

#[test]
fn form_defaults() {
    let form = InstallForm::defaults();
    assert_eq!(form.db_type, "sqlite");
    assert_eq!(form.db_host, "localhost");
    assert_eq!(form.table_prefix, "tidings__");
    assert_eq!(form.admin_username, "admin");
    assert_eq!(form.blog_title, "My Tidings");
    assert!(form.admin_pass1.is_empty());
}

#[test]
fn form_overlay_prefers_non_empty_values() {
    let mut base = InstallForm::defaults();
    let mut posted = InstallForm::defaults();
    posted.db_type = "mysql".to_string();
    posted.db_host = String::new(); // must not erase the default
    posted.blog_title = "Shipping News".to_string();

    base.overlay(&posted);
    assert_eq!(base.db_type, "mysql");
    assert_eq!(base.db_host, "localhost");
    assert_eq!(base.blog_title, "Shipping News");
}

#[test]
fn form_prefill_from_mysql_config() {
    let cfg = SiteConfig {
        database: DatabaseConfig {
            backend: "mysql".to_string(),
            host: "db.internal".to_string(),
            user: "blog".to_string(),
            password: "hunter2".to_string(),
            schema: "tidings".to_string(),
            table_prefix: "t__".to_string(),
            ..Default::default()
        },
        server: ServerConfig::default(),
    };
    let form = InstallForm::from_config(&cfg);
    assert_eq!(form.db_type, "mysql");
    assert_eq!(form.db_host, "db.internal");
    assert_eq!(form.db_schema, "tidings");
    assert_eq!(form.db_user, "blog");
    assert_eq!(form.db_pass, "hunter2");
    assert_eq!(form.table_prefix, "t__");
    assert!(form.admin_username.is_empty());
}

#[test]
fn form_prefill_from_sqlite_config() {
    let form = InstallForm::from_config(&SiteConfig::default());
    assert_eq!(form.db_type, "sqlite");
    assert_eq!(form.db_file, "website/db/tidings.db");
    assert!(form.db_host.is_empty());
}

#[test]
fn submission_without_admin_details_is_incomplete() {
    // defaults carry a username but no email or passwords
    assert_eq!(
        wizard::validate_submission(&InstallForm::defaults()),
        SubmissionCheck::Incomplete
    );
}

#[test]
fn mismatched_passwords_block_installation() {
    let tmp = TempDir::new().unwrap();
    let mut form = complete_form(tmp.path());
    form.admin_pass2 = "something else".to_string();

    match wizard::validate_submission(&form) {
        SubmissionCheck::Invalid(errors) => {
            assert!(errors.contains_key("password_mismatch"));
        }
        other => panic!("expected Invalid, got {:?}", other),
    }
}

#[test]
fn mysql_submission_requires_user_schema_host() {
    let tmp = TempDir::new().unwrap();
    let mut form = complete_form(tmp.path());
    form.db_type = "mysql".to_string();
    form.db_host = String::new();
    form.db_user = String::new();
    form.db_schema = String::new();

    match wizard::validate_submission(&form) {
        SubmissionCheck::Invalid(errors) => {
            assert!(errors.contains_key("db_user"));
            assert!(errors.contains_key("db_schema"));
            assert!(errors.contains_key("db_host"));
        }
        other => panic!("expected Invalid, got {:?}", other),
    }
}

#[test]
fn unknown_backend_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut form = complete_form(tmp.path());
    form.db_type = "postgres".to_string();
    match wizard::validate_submission(&form) {
        SubmissionCheck::Invalid(errors) => assert!(errors.contains_key("db_type")),
        other => panic!("expected Invalid, got {:?}", other),
    }
}

#[test]
fn bad_table_prefix_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut form = complete_form(tmp.path());
    form.table_prefix = "bad prefix!".to_string();
    match wizard::validate_submission(&form) {
        SubmissionCheck::Invalid(errors) => assert!(errors.contains_key("table_prefix")),
        other => panic!("expected Invalid, got {:?}", other),
    }
}

#[test]
fn valid_sqlite_submission_is_ready() {
    let tmp = TempDir::new().unwrap();
    let form = complete_form(tmp.path());
    assert_eq!(wizard::validate_submission(&form), SubmissionCheck::Ready);
}

#[test]
fn sqlite_file_check_needs_existing_directory() {
    let tmp = TempDir::new().unwrap();
    let ok = tmp.path().join("site.db");
    assert!(wizard::check_sqlite_file(ok.to_str().unwrap()).is_ok());

    let missing_dir = tmp.path().join("no_such_dir").join("site.db");
    assert!(wizard::check_sqlite_file(missing_dir.to_str().unwrap()).is_err());
}

#[test]
fn bcrypt_detection() {
    assert!(wizard::looks_like_bcrypt(&fast_hash("pw")));
    assert!(!wizard::looks_like_bcrypt("plain password"));
    assert!(!wizard::looks_like_bcrypt("$1$legacy$hash"));
}

// ═══════════════════════════════════════════════════════════
// Wizard: installation
// ═══════════════════════════════════════════════════════════

#[test]
fn install_seeds_everything() {
    let tmp = TempDir::new().unwrap();
    let form = complete_form(tmp.path());
    let store = SqliteStore::open(&form.db_file, &form.table_prefix).unwrap();
    let server = ServerConfig::default();

    wizard::perform_install(&store, &form, &server).unwrap();

    assert_eq!(store.option_get("installed"), Some("true".to_string()));
    assert_eq!(store.option_get("title"), Some("My Tidings".to_string()));
    assert_eq!(store.option_get("base_url"), Some(server.base_url.clone()));
    assert_eq!(store.option_get("db_version"), Some("2".to_string()));

    let guid = store.option_get("guid").unwrap();
    assert_eq!(guid.len(), 64);
    assert!(guid.chars().all(|c| c.is_ascii_hexdigit()));

    // administrator with the already-hashed password taken as-is
    assert_eq!(store.user_count(), 1);
    let admin = store.user_get_by_name("admin").unwrap();
    assert!(auth::verify_password("sekrit", &admin.password_hash));

    // default admin group holding the administrator and the base permissions
    let groups = store.group_list();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "admin");
    assert_eq!(
        store.group_permission_count(groups[0].id),
        BASE_PERMISSIONS.len() as i64
    );
    assert_eq!(store.group_members(groups[0].id)[0].username, "admin");

    // first post
    assert_eq!(store.post_count(), 1);

    // log maintenance task
    assert!(store.task_get("truncate_log").is_some());

    assert!(!auth::needs_setup(&store));
}

#[test]
fn install_retry_converges() {
    let tmp = TempDir::new().unwrap();
    let form = complete_form(tmp.path());
    let store = SqliteStore::open(&form.db_file, &form.table_prefix).unwrap();
    let server = ServerConfig::default();

    wizard::perform_install(&store, &form, &server).unwrap();
    let guid = store.option_get("guid");
    wizard::perform_install(&store, &form, &server).unwrap();

    assert_eq!(store.user_count(), 1);
    assert_eq!(store.post_count(), 1);
    assert_eq!(store.group_list().len(), 1);
    // options were not re-seeded
    assert_eq!(store.option_get("guid"), guid);
}

#[test]
fn plain_password_is_hashed() {
    let tmp = TempDir::new().unwrap();
    let mut form = complete_form(tmp.path());
    form.admin_pass1 = "plain password".to_string();
    form.admin_pass2 = form.admin_pass1.clone();
    let store = SqliteStore::open(&form.db_file, &form.table_prefix).unwrap();

    wizard::perform_install(&store, &form, &ServerConfig::default()).unwrap();
    let admin = store.user_get_by_name("admin").unwrap();
    assert_ne!(admin.password_hash, "plain password");
    assert!(wizard::looks_like_bcrypt(&admin.password_hash));
    assert!(auth::verify_password("plain password", &admin.password_hash));
}

#[test]
fn theme_activation_prefers_single_design() {
    let store = test_store();
    let tmp = TempDir::new().unwrap();

    // no designs installed: fall back to the built-in
    assert_eq!(
        wizard::activate_theme(&store, tmp.path()).unwrap(),
        "default"
    );

    fs::create_dir(tmp.path().join("aurora")).unwrap();
    assert_eq!(
        wizard::activate_theme(&store, tmp.path()).unwrap(),
        "aurora"
    );
    assert_eq!(store.option_get("theme_name"), Some("aurora".to_string()));
    assert_eq!(store.option_get("theme_dir"), Some("aurora".to_string()));
}

#[test]
fn theme_activation_picks_among_many() {
    let store = test_store();
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("aurora")).unwrap();
    fs::create_dir(tmp.path().join("borealis")).unwrap();

    let picked = wizard::activate_theme(&store, tmp.path()).unwrap();
    assert!(picked == "aurora" || picked == "borealis");
}

#[test]
fn upgrade_backfills_task_and_version() {
    let store = test_store();
    let db = DatabaseConfig {
        backend: "sqlite".to_string(),
        table_prefix: "tidings__".to_string(),
        ..Default::default()
    };

    wizard::upgrade(&store, &db).unwrap();
    assert_eq!(store.option_get("db_version"), Some("2".to_string()));
    assert!(store.task_get("truncate_log").is_some());

    // running again is harmless
    wizard::upgrade(&store, &db).unwrap();
}

// ═══════════════════════════════════════════════════════════
// Credential checks (AJAX)
// ═══════════════════════════════════════════════════════════

#[test]
fn mysql_check_reports_missing_fields() {
    let response = mysql_check(&MysqlCheckForm {
        host: None,
        database: Some("  ".to_string()),
        user: None,
        pass: None,
    });
    assert_eq!(response.status, 0);
    assert_eq!(response.errors.len(), 3);

    let ids: Vec<&str> = response
        .errors
        .iter()
        .flat_map(|e| e.ids.iter().map(String::as_str))
        .collect();
    assert!(ids.contains(&"#databasehost"));
    assert!(ids.contains(&"#databasename"));
    assert!(ids.contains(&"#databaseuser"));
}

#[test]
fn mysql_check_missing_password_is_allowed() {
    let response = mysql_check(&MysqlCheckForm {
        host: None,
        database: Some("db".to_string()),
        user: Some("user".to_string()),
        pass: None,
    });
    // only the host complaint; an empty password is legitimate
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].ids, vec!["#databasehost".to_string()]);
}

#[test]
fn sqlite_check_reports_missing_file_field() {
    let response = sqlite_check(None);
    assert_eq!(response.status, 0);
    assert_eq!(response.errors[0].ids, vec!["#databasefile".to_string()]);

    let response = sqlite_check(Some("   "));
    assert_eq!(response.status, 0);
}

#[test]
fn sqlite_check_probe_cleans_up_created_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("probe.db");

    let response = sqlite_check(Some(path.to_str().unwrap()));
    assert_eq!(response.status, 1);
    // the probe created the file, so it must remove it again
    assert!(!path.exists());
}

#[test]
fn sqlite_check_keeps_existing_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("existing.db");
    fs::write(&path, b"").unwrap();

    let response = sqlite_check(Some(path.to_str().unwrap()));
    assert_eq!(response.status, 1);
    assert!(path.exists());
}

#[test]
fn check_responses_serialize_to_xml() {
    let ok = crate::install::checks::AjaxResponse::ok().to_xml();
    assert!(ok.starts_with("<response>"));
    assert!(ok.contains("<status>1</status>"));
    assert!(!ok.contains("<error>"));

    let response = mysql_check(&MysqlCheckForm {
        host: None,
        database: Some("db".to_string()),
        user: Some("u".to_string()),
        pass: None,
    });
    let xml = response.to_xml();
    assert!(xml.contains("<status>0</status>"));
    assert!(xml.contains("<error>"));
    assert!(xml.contains("<id>#databasehost</id>"));
    assert!(xml.contains("<message>The database host field was left empty.</message>"));
}

// ═══════════════════════════════════════════════════════════
// Rewrite block
// ═══════════════════════════════════════════════════════════

#[test]
fn rewrite_block_shape() {
    let lines = rewrite::block_lines("", "http://127.0.0.1:8000");
    assert_eq!(lines.first().unwrap(), rewrite::OPEN_MARK);
    assert_eq!(lines.last().unwrap(), rewrite::CLOSE_MARK);
    assert!(lines.contains(&"#RewriteBase /".to_string()));
    assert!(lines
        .iter()
        .any(|l| l.contains("RewriteRule ^(.*)$ http://127.0.0.1:8000/$1")));

    let lines = rewrite::block_lines("blog", "http://127.0.0.1:8000/");
    assert!(lines.contains(&"RewriteBase /blog".to_string()));
}

#[test]
fn rewrite_splice_preserves_surrounding_content() {
    let old_block = rewrite::render_block("", "http://127.0.0.1:8000/");
    let existing = format!("# user rules\n{}\n# trailing\n", old_block);

    let new_block = rewrite::render_block("blog", "http://127.0.0.1:9000/");
    let updated = rewrite::splice_block(&existing, &new_block);

    assert!(updated.starts_with("# user rules\n"));
    assert!(updated.contains("# trailing"));
    assert!(updated.contains("RewriteBase /blog"));
    assert!(!updated.contains("http://127.0.0.1:8000/"));
    // still exactly one block
    assert_eq!(updated.matches(rewrite::OPEN_MARK).count(), 1);
}

fn apache_config(base_url: &str) -> SiteConfig {
    SiteConfig {
        database: DatabaseConfig::default(),
        server: ServerConfig {
            front: "apache".to_string(),
            upstream: "http://127.0.0.1:8000/".to_string(),
            base_url: base_url.to_string(),
        },
    }
}

#[test]
fn rewrite_check_skipped_without_front_server() {
    let tmp = TempDir::new().unwrap();
    let cfg = SiteConfig::default();
    assert_eq!(
        rewrite::check(&cfg, &tmp.path().join(".htaccess")),
        RewriteStatus::NotNeeded
    );
}

#[test]
fn rewrite_check_creates_missing_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(".htaccess");
    let cfg = apache_config("http://example.com/");

    assert_eq!(rewrite::check(&cfg, &path), RewriteStatus::Wrote);
    let contents = fs::read_to_string(&path).unwrap();
    assert!(rewrite::has_block(&contents));

    // second pass finds the block in place
    assert_eq!(rewrite::check(&cfg, &path), RewriteStatus::Present);
}

#[test]
fn rewrite_check_appends_to_foreign_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(".htaccess");
    fs::write(&path, "# someone else's rules\n").unwrap();
    let cfg = apache_config("http://example.com/");

    assert_eq!(rewrite::check(&cfg, &path), RewriteStatus::Wrote);
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("# someone else's rules\n"));
    assert!(rewrite::has_block(&contents));
}

#[test]
fn rewrite_repair_updates_base() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(".htaccess");
    let cfg = apache_config("http://example.com/");
    assert_eq!(rewrite::check(&cfg, &path), RewriteStatus::Wrote);

    let moved = apache_config("http://example.com/blog/");
    assert_eq!(rewrite::repair(&moved, &path), RewriteStatus::Wrote);
    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("RewriteBase /blog"));
    assert_eq!(contents.matches(rewrite::OPEN_MARK).count(), 1);
}

// ═══════════════════════════════════════════════════════════
// Admin chrome
// ═══════════════════════════════════════════════════════════

#[test]
fn menu_marks_selection_and_parent() {
    let menu = main_menu("manage-groups");
    let manage = menu.iter().find(|m| m.id == "manage").unwrap();
    assert!(manage.selected);
    assert!(manage.submenu.iter().find(|s| s.id == "manage-groups").unwrap().selected);
    assert!(!menu.iter().find(|m| m.id == "dashboard").unwrap().selected);

    let menu = main_menu("dashboard");
    assert!(menu.iter().find(|m| m.id == "dashboard").unwrap().selected);
    assert!(!menu.iter().find(|m| m.id == "manage").unwrap().selected);
}

#[test]
fn menu_items_have_hotkeys() {
    let menu = main_menu("dashboard");
    assert!(menu.iter().all(|m| m.hotkey.is_some()));
}

#[test]
fn and_list_formats_names() {
    assert_eq!(and_list(&[]), "");
    assert_eq!(and_list(&["Ann".to_string()]), "Ann");
    assert_eq!(
        and_list(&["Ann".to_string(), "Ben".to_string()]),
        "Ann and Ben"
    );
    assert_eq!(
        and_list(&["Ann".to_string(), "Ben".to_string(), "Cas".to_string()]),
        "Ann, Ben and Cas"
    );
}

// ═══════════════════════════════════════════════════════════
// Auth
// ═══════════════════════════════════════════════════════════

#[test]
fn password_verification() {
    let hash = fast_hash("correct horse");
    assert!(auth::verify_password("correct horse", &hash));
    assert!(!auth::verify_password("wrong", &hash));
    assert!(!auth::verify_password("anything", "not a hash"));
}

#[test]
fn needs_setup_until_installed() {
    let store = test_store();
    assert!(auth::needs_setup(&store));

    store.option_set("installed", "true").unwrap();
    // still no users
    assert!(auth::needs_setup(&store));

    store.user_create("admin", "a@example.org", "h").unwrap();
    assert!(!auth::needs_setup(&store));
}

#[test]
fn writable_dir_probe() {
    let tmp = TempDir::new().unwrap();
    assert!(boot::writable_dir(tmp.path()));
    assert!(!boot::writable_dir(&tmp.path().join("missing")));
}
