use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Site configuration file, written by the installer.
pub const CONFIG_FILE: &str = "tidings.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// "sqlite" or "mysql"
    pub backend: String,
    /// SQLite database file path
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// MySQL database name
    #[serde(default)]
    pub schema: String,
    #[serde(default = "default_prefix")]
    pub table_prefix: String,
}

fn default_prefix() -> String {
    "tidings__".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Front server in charge of rewrites: "none" or "apache"
    #[serde(default = "default_front")]
    pub front: String,
    /// Address the front server proxies to
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// Public URL of the site, path component included
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_front() -> String {
    "none".to_string()
}

fn default_upstream() -> String {
    "http://127.0.0.1:8000/".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000/".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            backend: "sqlite".to_string(),
            file: "website/db/tidings.db".to_string(),
            host: String::new(),
            user: String::new(),
            password: String::new(),
            schema: String::new(),
            table_prefix: default_prefix(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            front: default_front(),
            upstream: default_upstream(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl DatabaseConfig {
    /// Canonical connection string, used to compare an existing config file
    /// against the values the installer is about to write.
    pub fn connection_string(&self) -> String {
        match self.backend.as_str() {
            "mysql" => format!("mysql:host={};dbname={}", self.host, self.schema),
            _ => format!("sqlite:{}", self.file),
        }
    }

    /// Splits a connection string back into backend fields. Used to pre-fill
    /// the installer form from a config file written by an earlier attempt.
    pub fn parse_connection_string(s: &str) -> Option<DatabaseConfig> {
        let (backend, remainder) = s.split_once(':')?;
        let mut cfg = DatabaseConfig {
            backend: backend.to_string(),
            file: String::new(),
            host: String::new(),
            user: String::new(),
            password: String::new(),
            schema: String::new(),
            table_prefix: default_prefix(),
        };
        match backend {
            "sqlite" => {
                cfg.file = remainder.to_string();
            }
            "mysql" => {
                for part in remainder.split(';') {
                    match part.split_once('=') {
                        Some(("host", v)) => cfg.host = v.to_string(),
                        Some(("dbname", v)) => cfg.schema = v.to_string(),
                        _ => {}
                    }
                }
            }
            _ => return None,
        }
        Some(cfg)
    }
}

impl SiteConfig {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Option<SiteConfig> {
        let raw = fs::read_to_string(path).ok()?;
        match toml::from_str(&raw) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!("Ignoring unparseable config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// The file contents the installer writes, also shown to the user when
    /// the config directory is not writable so they can create it by hand.
    pub fn rendered(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    /// Writes the config file into `dir`. Returns Ok(false) when an existing
    /// file already holds the same effective connection values, in which case
    /// it is left untouched.
    pub fn write(&self, dir: &Path) -> Result<bool, String> {
        let path = Self::path_in(dir);
        if path.exists() {
            if let Some(existing) = SiteConfig::load(&path) {
                if existing.database.connection_string() == self.database.connection_string()
                    && existing.database.user == self.database.user
                    && existing.database.password == self.database.password
                    && existing.database.table_prefix == self.database.table_prefix
                {
                    return Ok(false);
                }
            }
        }
        let rendered = self.rendered()?;
        fs::write(&path, rendered)
            .map_err(|e| format!("could not write {}: {}", path.display(), e))?;
        Ok(true)
    }

    /// Path portion of the public base URL, without surrounding slashes.
    /// Empty for sites served at the domain root.
    pub fn base_path(&self) -> String {
        let url = &self.server.base_url;
        let after_scheme = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        match after_scheme.split_once('/') {
            Some((_, path)) => path.trim_matches('/').to_string(),
            None => String::new(),
        }
    }
}
