use rand::Rng;
use rocket::form::Form;
use rocket::response::Redirect;
use rocket::State;
use rocket_dyn_templates::Template;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::auth;
use crate::boot;
use crate::config::{DatabaseConfig, ServerConfig, SiteConfig};
use crate::models::group::BASE_PERMISSIONS;
use crate::models::NewPost;
use crate::rewrite::{self, RewriteStatus};
use crate::store::{self, Store, DB_VERSION};
use crate::SiteState;

/// Errors shown on the current wizard step, keyed by the field (or step)
/// they belong to.
pub type FormErrors = BTreeMap<String, String>;

pub fn one_error(key: &str, message: &str) -> FormErrors {
    let mut errors = FormErrors::new();
    errors.insert(key.to_string(), message.to_string());
    errors
}

const WELCOME_POST: &str = "This site is running <a href=\"https://example.org/tidings\">Tidings</a>, \
a lightweight self-hosted publishing platform. Log into the admin area to write your first entry.";

// ── The form ────────────────────────────────────────────

#[derive(Debug, Clone, FromForm, Serialize)]
pub struct InstallForm {
    #[field(default = String::new())]
    pub admin_username: String,
    #[field(default = String::new())]
    pub admin_pass1: String,
    #[field(default = String::new())]
    pub admin_pass2: String,
    #[field(default = String::new())]
    pub admin_email: String,
    #[field(default = String::new())]
    pub db_type: String,
    #[field(default = String::new())]
    pub db_host: String,
    #[field(default = String::new())]
    pub db_user: String,
    #[field(default = String::new())]
    pub db_pass: String,
    #[field(default = String::new())]
    pub db_schema: String,
    #[field(default = String::new())]
    pub db_file: String,
    #[field(default = String::new())]
    pub table_prefix: String,
    #[field(default = String::new())]
    pub blog_title: String,
}

fn take(dst: &mut String, src: &str) {
    if !src.is_empty() {
        *dst = src.to_string();
    }
}

impl InstallForm {
    /// Starting values for the db_setup step, overridden by the config file
    /// and then by whatever the user submits.
    pub fn defaults() -> InstallForm {
        InstallForm {
            admin_username: "admin".to_string(),
            admin_pass1: String::new(),
            admin_pass2: String::new(),
            admin_email: String::new(),
            db_type: "sqlite".to_string(),
            db_host: "localhost".to_string(),
            db_user: String::new(),
            db_pass: String::new(),
            db_schema: "tidings".to_string(),
            db_file: "website/db/tidings.db".to_string(),
            table_prefix: "tidings__".to_string(),
            blog_title: "My Tidings".to_string(),
        }
    }

    /// Non-empty fields of `other` win.
    pub fn overlay(&mut self, other: &InstallForm) {
        take(&mut self.admin_username, &other.admin_username);
        take(&mut self.admin_pass1, &other.admin_pass1);
        take(&mut self.admin_pass2, &other.admin_pass2);
        take(&mut self.admin_email, &other.admin_email);
        take(&mut self.db_type, &other.db_type);
        take(&mut self.db_host, &other.db_host);
        take(&mut self.db_user, &other.db_user);
        take(&mut self.db_pass, &other.db_pass);
        take(&mut self.db_schema, &other.db_schema);
        take(&mut self.db_file, &other.db_file);
        take(&mut self.table_prefix, &other.table_prefix);
        take(&mut self.blog_title, &other.blog_title);
    }

    /// Pre-fills database fields from an existing config file, re-deriving
    /// the backend fields from the connection string it encodes.
    pub fn from_config(cfg: &SiteConfig) -> InstallForm {
        let mut form = InstallForm {
            admin_username: String::new(),
            admin_pass1: String::new(),
            admin_pass2: String::new(),
            admin_email: String::new(),
            db_type: String::new(),
            db_host: String::new(),
            db_user: cfg.database.user.clone(),
            db_pass: cfg.database.password.clone(),
            db_schema: String::new(),
            db_file: String::new(),
            table_prefix: cfg.database.table_prefix.clone(),
            blog_title: String::new(),
        };
        if let Some(parsed) =
            DatabaseConfig::parse_connection_string(&cfg.database.connection_string())
        {
            form.db_type = parsed.backend;
            form.db_host = parsed.host;
            form.db_schema = parsed.schema;
            form.db_file = parsed.file;
        }
        form
    }

    pub fn admin_fields_complete(&self) -> bool {
        !self.admin_username.is_empty()
            && !self.admin_pass1.is_empty()
            && !self.admin_pass2.is_empty()
            && !self.admin_email.is_empty()
    }

    pub fn to_database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            backend: self.db_type.clone(),
            file: self.db_file.clone(),
            host: self.db_host.clone(),
            user: self.db_user.clone(),
            password: self.db_pass.clone(),
            schema: self.db_schema.clone(),
            table_prefix: self.table_prefix.clone(),
        }
    }
}

// ── Validation ──────────────────────────────────────────

fn writable_file(path: &Path) -> bool {
    fs::OpenOptions::new().append(true).open(path).is_ok()
}

/// Checks that the SQLite data file exists and is writable, or can be
/// created. The messages distinguish the three ways this goes wrong.
pub fn check_sqlite_file(db_file: &str) -> Result<(), String> {
    let path = Path::new(db_file);
    let dir = match path.parent() {
        Some(p) if p != Path::new("") => p,
        _ => Path::new("."),
    };

    if path.exists() {
        if !writable_file(path) {
            return Err("The SQLite data file is not writable.".to_string());
        }
        if !boot::writable_dir(dir) {
            return Err(
                "The directory holding the SQLite data file must be writable.".to_string(),
            );
        }
        return Ok(());
    }

    if !boot::writable_dir(dir) {
        return Err(
            "The SQLite data file does not exist, and it cannot be created in the \
             specified directory. The directory containing the database file must be writable."
                .to_string(),
        );
    }
    Ok(())
}

/// Per-backend field validation for the db_setup step.
pub fn validate_db_fields(form: &InstallForm) -> FormErrors {
    let mut errors = FormErrors::new();
    if !store::valid_table_prefix(&form.table_prefix) {
        errors.insert(
            "table_prefix".to_string(),
            "Table prefix may only contain letters, numbers and underscores.".to_string(),
        );
    }
    match form.db_type.as_str() {
        "mysql" => {
            if form.db_user.is_empty() {
                errors.insert("db_user".to_string(), "User is required.".to_string());
            }
            if form.db_schema.is_empty() {
                errors.insert(
                    "db_schema".to_string(),
                    "Name for database is required.".to_string(),
                );
            }
            if form.db_host.is_empty() {
                errors.insert("db_host".to_string(), "Host is required.".to_string());
            }
        }
        "sqlite" => {
            if let Err(msg) = check_sqlite_file(&form.db_file) {
                errors.insert("db_file".to_string(), msg);
            }
        }
        other => {
            errors.insert(
                "db_type".to_string(),
                format!("Unknown database type '{}'.", other),
            );
        }
    }
    errors
}

pub fn looks_like_bcrypt(s: &str) -> bool {
    s.starts_with("$2a$") || s.starts_with("$2b$") || s.starts_with("$2y$")
}

#[derive(Debug, PartialEq)]
pub enum SubmissionCheck {
    /// Admin details are missing; show the form again without complaints.
    Incomplete,
    /// Something is wrong; re-render the step with these errors.
    Invalid(FormErrors),
    Ready,
}

/// The gatekeeping the db_setup step does before any side effect happens.
pub fn validate_submission(form: &InstallForm) -> SubmissionCheck {
    if !form.admin_fields_complete() {
        return SubmissionCheck::Incomplete;
    }
    if form.admin_pass1 != form.admin_pass2 {
        return SubmissionCheck::Invalid(one_error("password_mismatch", "Password mismatch!"));
    }
    let errors = validate_db_fields(form);
    if !errors.is_empty() {
        return SubmissionCheck::Invalid(errors);
    }
    SubmissionCheck::Ready
}

// ── Installation steps ──────────────────────────────────

fn install_guid(base_url: &str) -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(base_url.as_bytes());
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}

fn create_default_options(
    store: &dyn Store,
    form: &InstallForm,
    server: &ServerConfig,
) -> Result<(), String> {
    store.option_set("installed", "true")?;
    store.option_set("title", &form.blog_title)?;
    store.option_set("base_url", &server.base_url)?;
    store.option_set("pagination", "5")?;
    store.option_set("comments_require_id", "1")?;
    store.option_set("session_expiry_hours", "24")?;
    // Unique identifier for this installation, also used in cookies
    store.option_set("guid", &install_guid(&server.base_url))?;

    for kind in ["default", "user", "authentication", "content", "comment"] {
        store.log_type_register(kind, "tidings")?;
    }

    // Keep the event log from growing without bound
    store.task_register_daily("truncate_log", "Truncate the event log")?;
    Ok(())
}

fn create_admin_user(store: &dyn Store, form: &InstallForm) -> Result<i64, String> {
    // An already-hashed password is taken as-is, so configs migrated from
    // another install keep their credentials
    let password_hash = if looks_like_bcrypt(&form.admin_pass1) {
        form.admin_pass1.clone()
    } else {
        auth::hash_password(&form.admin_pass1)?
    };
    let user_id = store.user_create(&form.admin_username, &form.admin_email, &password_hash)?;

    let group_id = store.group_create("admin")?;
    store.group_add_member(group_id, user_id)?;
    for permission in BASE_PERMISSIONS {
        store.group_grant(group_id, permission)?;
    }
    Ok(user_id)
}

fn create_first_post(store: &dyn Store, user_id: i64) -> Result<(), String> {
    store.post_type_register("entry")?;
    store.post_type_register("page")?;

    store.post_status_register("draft", false)?;
    store.post_status_register("published", false)?;
    store.post_status_register("scheduled", true)?;

    store.post_create(&NewPost {
        title: "Welcome to Tidings".to_string(),
        content: WELCOME_POST.to_string(),
        user_id,
        status: "published".to_string(),
        content_type: "entry".to_string(),
        tags: "tidings".to_string(),
    })?;
    Ok(())
}

/// Provisions the schema and seeds the initial data. Every seeding step is
/// guarded so a retried install converges instead of duplicating rows.
pub fn perform_install(
    store: &dyn Store,
    form: &InstallForm,
    server: &ServerConfig,
) -> Result<(), FormErrors> {
    let statements =
        store::load_schema_statements(&form.db_type, &form.table_prefix, &form.db_schema)
            .map_err(|e| one_error("db_host", &format!("Could not create schema tables: {}", e)))?;
    store
        .provision(&statements)
        .map_err(|e| one_error("db_host", &format!("Could not create schema tables: {}", e)))?;

    if store.option_get("installed").is_none() {
        create_default_options(store, form, server).map_err(|e| {
            one_error("options", &format!("Problem creating default options: {}", e))
        })?;
    }

    let mut admin_id = None;
    if store.user_count() < 1 {
        let id = create_admin_user(store, form)
            .map_err(|e| one_error("admin_user", &format!("Problem creating admin user: {}", e)))?;
        admin_id = Some(id);
    }

    if store.post_count() < 1 {
        create_first_post(store, admin_id.unwrap_or(1))
            .map_err(|e| one_error("post", &format!("Problem creating first post: {}", e)))?;
    }

    store
        .option_set("db_version", &DB_VERSION.to_string())
        .map_err(|e| one_error("options", &e))?;
    Ok(())
}

/// Marks a theme active: the only installed one, or a random pick when the
/// user dropped in several.
pub fn activate_theme(store: &dyn Store, designs_dir: &Path) -> Result<String, String> {
    let mut themes: Vec<String> = fs::read_dir(designs_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    themes.sort();

    let name = match themes.len() {
        0 => "default".to_string(),
        1 => themes.remove(0),
        n => themes.remove(rand::thread_rng().gen_range(0..n)),
    };
    store.option_set("theme_name", &name)?;
    store.option_set("theme_dir", &name)?;
    Ok(name)
}

/// Brings an existing database up to the current schema version. Safe to run
/// on every start.
pub fn upgrade(store: &dyn Store, db: &DatabaseConfig) -> Result<(), String> {
    let statements = store::load_schema_statements(&db.backend, &db.table_prefix, &db.schema)?;
    store.provision(&statements)?;

    let version: i64 = store
        .option_get("db_version")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if version < 2 && store.task_get("truncate_log").is_none() {
        store.task_register_daily("truncate_log", "Truncate the event log")?;
    }
    store.option_set("db_version", &DB_VERSION.to_string())
}

// ── Routes ──────────────────────────────────────────────

fn render_db_setup(form: &InstallForm, errors: &FormErrors) -> Template {
    Template::render(
        "install/db_setup",
        &json!({ "form": form, "form_errors": errors }),
    )
}

#[get("/")]
pub fn begin_install(state: &State<SiteState>) -> Result<Template, Redirect> {
    if let Some(store) = state.store() {
        if !auth::needs_setup(&*store) {
            return Err(Redirect::to("/admin/login"));
        }
    }

    let cfg = state.config_or_default();

    // Rewrite rules come first: with a misconfigured front server not even
    // the installer's own requests would arrive.
    match rewrite::check(&cfg, Path::new(rewrite::REWRITE_FILE)) {
        RewriteStatus::Unwritable { expected } => {
            return Ok(Template::render(
                "install/rewrite",
                &json!({ "rewrite_file": rewrite::REWRITE_FILE, "file_contents": expected }),
            ));
        }
        RewriteStatus::NotNeeded => {}
        _ => {
            // The block is on disk; make sure the front server actually
            // applies it, and splice it fresh if not.
            let probe = format!(
                "{}/check-rewrite",
                cfg.server.base_url.trim_end_matches('/')
            );
            if !rewrite::verify(&probe) {
                let _ = rewrite::repair(&cfg, Path::new(rewrite::REWRITE_FILE));
            }
        }
    }

    let report = boot::check();
    if !report.satisfied {
        return Ok(Template::render(
            "install/requirements",
            &json!({ "report": report }),
        ));
    }

    let mut form = InstallForm::defaults();
    if let Some(existing) = state.config() {
        form.overlay(&InstallForm::from_config(&existing));
    }
    Ok(render_db_setup(&form, &FormErrors::new()))
}

#[post("/", data = "<form>")]
pub fn submit_install(
    form: Form<InstallForm>,
    state: &State<SiteState>,
) -> Result<Redirect, Template> {
    if let Some(store) = state.store() {
        if !auth::needs_setup(&*store) {
            return Ok(Redirect::to("/admin/login"));
        }
    }

    // defaults < config file < submitted values
    let mut merged = InstallForm::defaults();
    if let Some(existing) = state.config() {
        merged.overlay(&InstallForm::from_config(&existing));
    }
    merged.overlay(&form);

    match validate_submission(&merged) {
        // without complete admin details, just show the form again
        SubmissionCheck::Incomplete => {
            return Err(render_db_setup(&merged, &FormErrors::new()))
        }
        SubmissionCheck::Invalid(errors) => return Err(render_db_setup(&merged, &errors)),
        SubmissionCheck::Ready => {}
    }

    let server = state
        .config()
        .map(|c| c.server)
        .unwrap_or_default();
    let site_cfg = SiteConfig {
        database: merged.to_database_config(),
        server,
    };

    if let Err(e) = site_cfg.write(Path::new(".")) {
        log::error!("Could not write config file: {}", e);
        let contents = site_cfg.rendered().unwrap_or_default();
        return Err(Template::render(
            "install/config",
            &json!({
                "form_errors": one_error("write_file", "Could not write the configuration file."),
                "config_file": crate::config::CONFIG_FILE,
                "file_contents": contents,
            }),
        ));
    }

    let store = match store::open_store(&site_cfg.database) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Installer could not connect to the database: {}", e);
            return Err(render_db_setup(
                &merged,
                &one_error(
                    "db_user",
                    "Problem connecting to supplied database credentials",
                ),
            ));
        }
    };

    if let Err(errors) = perform_install(&*store, &merged, &site_cfg.server) {
        return Err(render_db_setup(&merged, &errors));
    }

    match activate_theme(&*store, Path::new("website/designs")) {
        Ok(name) => log::info!("Activated theme '{}'", name),
        Err(e) => log::warn!("No theme activated: {}", e),
    }

    // With a front server, confirm requests actually travel through the
    // rewrite rules; splice the block once more if they don't.
    if site_cfg.server.front == "apache" {
        let probe = format!(
            "{}/check-rewrite",
            site_cfg.server.base_url.trim_end_matches('/')
        );
        if !rewrite::verify(&probe) {
            let _ = rewrite::repair(&site_cfg, Path::new(rewrite::REWRITE_FILE));
        }
    }

    store.event_log("Tidings successfully installed.", "info", "default", "tidings");
    state.set_config(site_cfg);
    state.set_store(store);
    Ok(Redirect::to("/admin/login"))
}
