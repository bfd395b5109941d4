#[macro_use]
extern crate rocket;

use rocket::fs::FileServer;
use rocket::response::content::RawHtml;
use rocket_dyn_templates::Template;
use std::path::Path;
use std::sync::{Arc, RwLock};

mod admin;
mod auth;
mod boot;
mod config;
mod install;
mod models;
mod rewrite;
mod routes;
mod store;
mod tests;

use config::SiteConfig;
use store::Store;

/// Shared site state. The store appears once a working config exists —
/// either found at startup or produced by the installer mid-flight.
pub struct SiteState {
    store: RwLock<Option<Arc<dyn Store>>>,
    config: RwLock<Option<SiteConfig>>,
}

impl SiteState {
    pub fn new() -> SiteState {
        SiteState {
            store: RwLock::new(None),
            config: RwLock::new(None),
        }
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        match self.store.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    pub fn set_store(&self, store: Arc<dyn Store>) {
        if let Ok(mut guard) = self.store.write() {
            *guard = Some(store);
        }
    }

    pub fn config(&self) -> Option<SiteConfig> {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    pub fn config_or_default(&self) -> SiteConfig {
        self.config().unwrap_or_default()
    }

    pub fn set_config(&self, config: SiteConfig) {
        if let Ok(mut guard) = self.config.write() {
            *guard = Some(config);
        }
    }
}

/// Bounced back through the front server to prove the rewrite rules forward
/// requests to us.
#[get("/check-rewrite")]
fn check_rewrite() -> &'static str {
    "ok"
}

#[catch(404)]
fn not_found() -> RawHtml<String> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>404</h1><p>Page not found.</p><a href='/admin'>← Admin</a></body></html>".to_string())
}

#[catch(500)]
fn server_error() -> RawHtml<String> {
    RawHtml("<html><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>500</h1><p>Internal server error.</p><a href='/admin'>← Admin</a></body></html>".to_string())
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    // Boot check — verify/create directories, validate critical files
    boot::run();

    let state = SiteState::new();
    match SiteConfig::load(Path::new(config::CONFIG_FILE)) {
        Some(cfg) => {
            match store::open_store(&cfg.database) {
                Ok(s) => {
                    if auth::needs_setup(&*s) {
                        log::info!(
                            "Database reachable but site not installed; the installer will finish setup."
                        );
                    } else if let Err(e) = install::wizard::upgrade(&*s, &cfg.database) {
                        log::warn!("Schema upgrade failed: {}", e);
                    }
                    state.set_store(s);
                }
                Err(e) => {
                    log::warn!(
                        "Could not open the configured database ({}); the installer will run.",
                        e
                    );
                }
            }
            state.set_config(cfg);
        }
        None => {
            log::info!("No {} found; starting the installer.", config::CONFIG_FILE);
        }
    }

    rocket::build()
        .manage(state)
        .attach(Template::fairing())
        .mount("/static", FileServer::from("website/static"))
        .mount("/", routes![check_rewrite])
        .mount("/install", install::routes())
        .mount("/admin", routes::admin::routes())
        .mount("/admin", auth::routes())
        .register("/", catchers![not_found, server_error])
}
