//! Password lookup in the libpq password file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::EnvSnapshot;

pub fn pgpass_path(env: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(custom) = env.get("PGPASSFILE") {
        return Some(PathBuf::from(custom));
    }
    if cfg!(windows) {
        dirs::config_dir().map(|dir| dir.join("postgresql").join("pgpass.conf"))
    } else {
        dirs::home_dir().map(|home| home.join(".pgpass"))
    }
}

/// First matching password for the connection, or `None`.
pub fn lookup(path: &Path, host: &str, port: u16, database: &str, username: &str) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let port = port.to_string();
    let wanted = [host, port.as_str(), database, username];

    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = split_fields(line);
        if fields.len() != 5 {
            continue;
        }
        let matches = fields[..4]
            .iter()
            .zip(wanted.iter())
            .all(|(pattern, value)| pattern == "*" || pattern == value);
        if matches {
            debug!("Using password from {}", path.display());
            return Some(fields[4].clone());
        }
    }
    None
}

fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(5);
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' if fields.len() < 4 => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
