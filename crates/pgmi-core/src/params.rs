//! Session parameters exposed to SQL as `pgmi.<key>` settings.

use std::collections::BTreeMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::Error;

lazy_static! {
    static ref KEY_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_]{1,63}$").unwrap();
}

/// Checks the key and returns its lower-cased form.
pub fn validate_key(key: &str) -> Result<String, Error> {
    if !KEY_PATTERN.is_match(key) {
        return Err(Error::Config(format!(
            "invalid parameter key '{}': keys must be 1-63 characters of letters, digits or underscore",
            key
        )));
    }
    Ok(key.to_lowercase())
}

/// Parses a `key=value` flag. The value may be empty and may contain `=`.
pub fn parse_cli_param(raw: &str) -> Result<(String, String), Error> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        Error::Config(format!("invalid parameter '{}': expected key=value", raw))
    })?;
    Ok((validate_key(key.trim())?, value.to_string()))
}

/// Reads a dotenv-syntax parameters file.
pub fn load_params_file(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let iter = dotenv::from_path_iter(path).map_err(|err| {
        Error::Config(format!("cannot read params file {}: {}", path.display(), err))
    })?;
    let mut params = BTreeMap::new();
    for item in iter {
        let (key, value) = item.map_err(|err| {
            Error::Config(format!("invalid params file {}: {}", path.display(), err))
        })?;
        params.insert(validate_key(&key)?, value);
    }
    Ok(params)
}

/// Later layers win: project config, then each params file in order, then CLI flags.
pub fn merge(
    project: &BTreeMap<String, String>,
    files: &[BTreeMap<String, String>],
    cli: &[(String, String)],
) -> Result<BTreeMap<String, String>, Error> {
    let mut merged = BTreeMap::new();
    for (key, value) in project {
        merged.insert(validate_key(key)?, value.clone());
    }
    for file in files {
        for (key, value) in file {
            merged.insert(validate_key(key)?, value.clone());
        }
    }
    for (key, value) in cli {
        merged.insert(validate_key(key)?, value.clone());
    }
    Ok(merged)
}
