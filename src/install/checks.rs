use rocket::form::Form;
use rocket::response::content::RawXml;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::boot;
use crate::store::mysql::{check_credentials, MysqlFailure};

/// Body of a credential-check response:
/// `<response><status>…</status><error><id>…</id><message>…</message></error></response>`
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename = "response")]
pub struct AjaxResponse {
    pub status: u8,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AjaxError>,
}

/// `ids` are the CSS selectors of the form fields the message belongs to.
#[derive(Debug, Serialize, PartialEq)]
pub struct AjaxError {
    #[serde(rename = "id")]
    pub ids: Vec<String>,
    pub message: String,
}

impl AjaxResponse {
    pub fn ok() -> AjaxResponse {
        AjaxResponse {
            status: 1,
            errors: Vec::new(),
        }
    }

    pub fn failure(errors: Vec<AjaxError>) -> AjaxResponse {
        AjaxResponse { status: 0, errors }
    }

    pub fn to_xml(&self) -> String {
        quick_xml::se::to_string(self)
            .unwrap_or_else(|_| "<response><status>0</status></response>".to_string())
    }
}

fn field_error(ids: &[&str], message: &str) -> AjaxError {
    AjaxError {
        ids: ids.iter().map(|s| s.to_string()).collect(),
        message: message.to_string(),
    }
}

fn missing(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

// ── MySQL ───────────────────────────────────────────────

#[derive(Debug, FromForm)]
pub struct MysqlCheckForm {
    pub host: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// Validates MySQL credentials: complains about empty fields first, then
/// tries to connect and maps the server's answer onto the fields at fault.
pub fn mysql_check(form: &MysqlCheckForm) -> AjaxResponse {
    let mut errors = Vec::new();
    if missing(&form.host) {
        errors.push(field_error(
            &["#databasehost"],
            "The database host field was left empty.",
        ));
    }
    if missing(&form.database) {
        errors.push(field_error(
            &["#databasename"],
            "The database name field was left empty.",
        ));
    }
    if missing(&form.user) {
        errors.push(field_error(
            &["#databaseuser"],
            "The database user field was left empty.",
        ));
    }
    if !errors.is_empty() {
        return AjaxResponse::failure(errors);
    }

    let result = check_credentials(
        form.host.as_deref().unwrap_or(""),
        form.database.as_deref().unwrap_or(""),
        form.user.as_deref().unwrap_or(""),
        form.pass.as_deref().unwrap_or(""),
    );
    match result {
        Ok(()) => AjaxResponse::ok(),
        Err(failure) => {
            let ids: &[&str] = match failure {
                MysqlFailure::AccessDenied => &["#databaseuser", "#databasepass"],
                MysqlFailure::UnknownDatabase => &["#databasename"],
                MysqlFailure::Unreachable(_) => &["#databasehost"],
                MysqlFailure::Other(_) => {
                    &["#databaseuser", "#databasepass", "#databasename", "#databasehost"]
                }
            };
            AjaxResponse::failure(vec![field_error(ids, &failure.message())])
        }
    }
}

#[post("/check/mysql", data = "<form>")]
pub fn check_mysql(form: Form<MysqlCheckForm>) -> RawXml<String> {
    RawXml(mysql_check(&form).to_xml())
}

// ── SQLite ──────────────────────────────────────────────

#[derive(Debug, FromForm)]
pub struct SqliteCheckForm {
    pub file: Option<String>,
}

/// Validates the SQLite data file path. Opens the database to prove it is
/// usable, then removes the file again if the probe had to create it.
pub fn sqlite_check(file: Option<&str>) -> AjaxResponse {
    let db_file = match file.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => f,
        None => {
            return AjaxResponse::failure(vec![field_error(
                &["#databasefile"],
                "The database file was left empty.",
            )])
        }
    };

    let path = Path::new(db_file);
    let dir = match path.parent() {
        Some(p) if p != Path::new("") => p,
        _ => Path::new("."),
    };

    if !boot::writable_dir(dir) {
        return AjaxResponse::failure(vec![field_error(
            &["#databasefile"],
            "SQLite requires that the directory that holds the DB file be writable by the server.",
        )]);
    }
    if path.exists()
        && fs::OpenOptions::new()
            .append(true)
            .open(path)
            .is_err()
    {
        return AjaxResponse::failure(vec![field_error(
            &["#databasefile"],
            "The SQLite data file is not writable by the server.",
        )]);
    }

    let existed = path.exists();
    let result = rusqlite::Connection::open(path);

    // Don't leave empty files laying around
    if !existed && path.exists() {
        let _ = fs::remove_file(path);
    }

    match result {
        Ok(_) => AjaxResponse::ok(),
        Err(e) => AjaxResponse::failure(vec![field_error(&["#databasefile"], &e.to_string())]),
    }
}

#[post("/check/sqlite", data = "<form>")]
pub fn check_sqlite(form: Form<SqliteCheckForm>) -> RawXml<String> {
    RawXml(sqlite_check(form.file.as_deref()).to_xml())
}
