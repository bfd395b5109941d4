use log::{error, info, warn};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process;

use crate::store;

/// Required directories that will be created if missing
const REQUIRED_DIRS: &[&str] = &[
    "website",
    "website/db",
    "website/static",
    "website/templates",
    "website/templates/admin",
    "website/templates/install",
    "website/designs",
];

/// Critical template files — the installer and admin UI cannot render
/// without these
const CRITICAL_TEMPLATES: &[&str] = &[
    "website/templates/base.html.tera",
    "website/templates/admin/login.html.tera",
    "website/templates/admin/dashboard.html.tera",
    "website/templates/admin/groups.html.tera",
    "website/templates/install/requirements.html.tera",
    "website/templates/install/db_setup.html.tera",
    "website/templates/install/rewrite.html.tera",
    "website/templates/install/config.html.tera",
];

const SUPPORTED_BACKENDS: &[&str] = &["sqlite", "mysql"];

/// One row of the requirements report shown by the installer.
#[derive(Debug, Serialize)]
pub struct Requirement {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct RequirementsReport {
    pub items: Vec<Requirement>,
    pub satisfied: bool,
}

pub fn writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let probe = dir.join(".write_test");
    match fs::write(&probe, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

/// Gathers everything the installer needs to know about the environment.
/// Mirrors the startup checks but never aborts; the wizard renders the
/// result as its requirements step.
pub fn check() -> RequirementsReport {
    let mut items = Vec::new();

    let config_ok = writable_dir(Path::new("."));
    items.push(Requirement {
        name: "Config directory writable".to_string(),
        ok: config_ok,
        detail: if config_ok {
            "The installer can write tidings.toml here.".to_string()
        } else {
            "The working directory must be writable so the configuration file can be created."
                .to_string()
        },
    });

    let db_dir = Path::new("website/db");
    let db_ok = writable_dir(db_dir);
    items.push(Requirement {
        name: "Data directory writable".to_string(),
        ok: db_ok,
        detail: if db_ok {
            "website/db is writable.".to_string()
        } else {
            "website/db must exist and be writable to hold the SQLite database.".to_string()
        },
    });

    let mut have_schema = false;
    for backend in SUPPORTED_BACKENDS {
        let path = store::schema_template_path(backend);
        let ok = path.is_file();
        have_schema = have_schema || ok;
        items.push(Requirement {
            name: format!("Schema template ({})", backend),
            ok,
            detail: if ok {
                format!("{} found.", path.display())
            } else {
                format!("{} is missing; the {} backend cannot be provisioned.", path.display(), backend)
            },
        });
    }

    let mut templates_ok = true;
    for file in CRITICAL_TEMPLATES {
        if !Path::new(file).exists() {
            templates_ok = false;
        }
    }
    items.push(Requirement {
        name: "Templates present".to_string(),
        ok: templates_ok,
        detail: if templates_ok {
            "All critical templates found.".to_string()
        } else {
            "One or more critical templates under website/templates are missing.".to_string()
        },
    });

    // Schema templates for unsupported backends are merely warnings; the
    // install can proceed as long as one backend is provisionable and the
    // filesystem cooperates.
    let satisfied = config_ok && db_ok && have_schema && templates_ok;
    RequirementsReport { items, satisfied }
}

/// Run all boot checks. Call this before Rocket launches.
/// Creates missing directories, warns about missing files, and
/// aborts if critical dependencies are absent.
pub fn run() {
    info!("Tidings boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    // ── 1. Directories ─────────────────────────────────
    for dir in REQUIRED_DIRS {
        let path = Path::new(dir);
        if !path.exists() {
            match fs::create_dir_all(path) {
                Ok(_) => info!("  Created directory: {}", dir),
                Err(e) => {
                    error!("  FAILED to create directory {}: {}", dir, e);
                    errors += 1;
                }
            }
        }
    }

    // ── 2. Critical templates ──────────────────────────
    for file in CRITICAL_TEMPLATES {
        if !Path::new(file).exists() {
            error!("  MISSING critical template: {}", file);
            errors += 1;
        }
    }

    // ── 3. Schema templates ────────────────────────────
    let mut have_schema = false;
    for backend in SUPPORTED_BACKENDS {
        let path = store::schema_template_path(backend);
        if path.is_file() {
            have_schema = true;
        } else {
            warn!("  Missing schema template: {}", path.display());
            warnings += 1;
        }
    }
    if !have_schema {
        error!("  No schema template found under schema/; installation is impossible.");
        errors += 1;
    }

    // ── 4. Database directory writable ──────────────────
    let db_dir = Path::new("website/db");
    if db_dir.exists() && !writable_dir(db_dir) {
        error!("  Database directory not writable: website/db");
        errors += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            errors, warnings
        );
        process::exit(1);
    }

    if warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            warnings
        );
    } else {
        info!("Boot check passed. All systems go.");
    }
}
