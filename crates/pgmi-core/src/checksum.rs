//! Raw and normalized SHA-256 digests for project files.
//!
//! The normalized digest ignores case, comments and whitespace layout:
//! lowercase, strip `/* ... */` (non-greedy, may span lines), strip `--` to
//! end of line, collapse whitespace runs to one space, trim. Comment markers
//! inside string literals are treated as comments too.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"--[^\n]*").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Digest of the exact bytes.
pub fn raw_checksum(content: &[u8]) -> String {
    hash_data(content)
}

/// Digest of the normalized text.
pub fn normalized_checksum(content: &[u8]) -> String {
    hash_data(normalize(content).as_bytes())
}

pub fn normalize(content: &[u8]) -> String {
    let text = String::from_utf8_lossy(content).to_lowercase();
    let text = BLOCK_COMMENT.replace_all(&text, " ");
    let text = LINE_COMMENT.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
