use log::warn;
use regex::RegexBuilder;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use crate::config::SiteConfig;

pub const OPEN_MARK: &str = "### TIDINGS START";
pub const CLOSE_MARK: &str = "### TIDINGS END";

/// Default rewrite file, relative to the site root.
pub const REWRITE_FILE: &str = ".htaccess";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The rewrite declarations Tidings owns, in file order. `base_path` is the
/// path component the site is served under ("" for the domain root);
/// `upstream` is the address the front server proxies to.
pub fn block_lines(base_path: &str, upstream: &str) -> Vec<String> {
    let rewrite_base = if base_path.is_empty() {
        "#RewriteBase /".to_string()
    } else {
        format!("RewriteBase /{}", base_path)
    };
    vec![
        OPEN_MARK.to_string(),
        "RewriteEngine On".to_string(),
        "RewriteCond %{REQUEST_FILENAME} !-f".to_string(),
        "RewriteCond %{REQUEST_FILENAME} !-d".to_string(),
        rewrite_base,
        format!("RewriteRule ^(.*)$ {}$1 [P,QSA]", ensure_trailing_slash(upstream)),
        CLOSE_MARK.to_string(),
    ]
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

pub fn render_block(base_path: &str, upstream: &str) -> String {
    format!("\n{}\n", block_lines(base_path, upstream).join("\n"))
}

pub fn has_block(contents: &str) -> bool {
    contents.contains("TIDINGS")
}

/// Replaces the existing marker-delimited section with `block`, leaving the
/// rest of the file untouched.
pub fn splice_block(existing: &str, block: &str) -> String {
    let re = RegexBuilder::new(r"### TIDINGS START.*?### TIDINGS END")
        .dot_matches_new_line(true)
        .case_insensitive(true)
        .build()
        .unwrap();
    re.replace(existing, block.trim_matches('\n')).to_string()
}

#[derive(Debug, PartialEq)]
pub enum RewriteStatus {
    /// No front server configured; rewrite rules are someone else's problem.
    NotNeeded,
    /// The block is already in place.
    Present,
    /// The file was created or the block appended/replaced.
    Wrote,
    /// The file cannot be written; carries the contents the user should put
    /// there by hand.
    Unwritable { expected: String },
}

/// Ensures the rewrite file contains the Tidings block.
/// A file without our markers gets the block appended; a missing file is
/// created outright.
pub fn check(cfg: &SiteConfig, path: &Path) -> RewriteStatus {
    if cfg.server.front != "apache" {
        return RewriteStatus::NotNeeded;
    }
    let block = render_block(&cfg.base_path(), &cfg.server.upstream);

    match fs::read_to_string(path) {
        Ok(existing) => {
            if has_block(&existing) {
                return RewriteStatus::Present;
            }
            // append our section to the user's file
            match fs::OpenOptions::new().append(true).open(path) {
                Ok(mut fh) => match fh.write_all(block.as_bytes()) {
                    Ok(_) => RewriteStatus::Wrote,
                    Err(e) => {
                        warn!("Could not append rewrite block to {}: {}", path.display(), e);
                        RewriteStatus::Unwritable { expected: block }
                    }
                },
                Err(e) => {
                    warn!("Could not open {} for append: {}", path.display(), e);
                    RewriteStatus::Unwritable { expected: block }
                }
            }
        }
        Err(_) => match fs::write(path, &block) {
            Ok(_) => RewriteStatus::Wrote,
            Err(e) => {
                warn!("Could not create {}: {}", path.display(), e);
                RewriteStatus::Unwritable { expected: block }
            }
        },
    }
}

/// Rewrites the block in place after a failed verification, regenerating the
/// RewriteBase from the configured URL.
pub fn repair(cfg: &SiteConfig, path: &Path) -> RewriteStatus {
    let block = render_block(&cfg.base_path(), &cfg.server.upstream);
    let existing = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return RewriteStatus::Unwritable { expected: block },
    };
    let updated = if has_block(&existing) {
        splice_block(&existing, &block)
    } else {
        format!("{}{}", existing, block)
    };
    match fs::write(path, updated) {
        Ok(_) => RewriteStatus::Wrote,
        Err(e) => {
            warn!("Could not update {}: {}", path.display(), e);
            RewriteStatus::Unwritable { expected: block }
        }
    }
}

/// Splits "http://host[:port]/path" into connectable pieces. Only plain
/// http URLs can be probed.
fn parse_probe_url(url: &str) -> Option<(String, u16, String)> {
    let stripped = url.strip_prefix("http://")?;
    let (host_part, path) = match stripped.split_once('/') {
        Some((h, p)) => (h, format!("/{}", p)),
        None => (stripped, "/".to_string()),
    };
    if let Some((host, port)) = host_part.rsplit_once(':') {
        Some((host.to_string(), port.parse().ok()?, path))
    } else {
        Some((host_part.to_string(), 80, path))
    }
}

/// Asks the front server for the probe endpoint and checks the answer made
/// it through the rewrite rules. Any network failure counts as "not
/// verified" — during a first install the front server may not be up yet.
pub fn verify(probe_url: &str) -> bool {
    let (host, port, path) = match parse_probe_url(probe_url) {
        Some(parts) => parts,
        None => return false,
    };

    let addr = format!("{}:{}", host, port);
    let sockaddr = match std::net::ToSocketAddrs::to_socket_addrs(&addr.as_str())
        .ok()
        .and_then(|mut addrs| addrs.next())
    {
        Some(a) => a,
        None => return false,
    };

    let mut stream = match TcpStream::connect_timeout(&sockaddr, PROBE_TIMEOUT) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let _ = stream.set_read_timeout(Some(PROBE_TIMEOUT));
    let _ = stream.set_write_timeout(Some(PROBE_TIMEOUT));

    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    if stream.write_all(request.as_bytes()).is_err() {
        return false;
    }

    let mut response = String::new();
    if stream.read_to_string(&mut response).is_err() {
        return false;
    }
    response.starts_with("HTTP/1.") && response.contains(" 200 ") && response.ends_with("ok")
}
