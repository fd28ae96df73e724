use lazy_static::lazy_static;
use uuid::Uuid;

lazy_static! {
    /// Namespace for path-derived identities. Changing it changes every fallback id.
    static ref FILE_IDENTITY_NAMESPACE: Uuid =
        Uuid::new_v5(&Uuid::NAMESPACE_URL, b"pgmi.com/file-identity/v1");
}

/// Lowercase, forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/").to_lowercase();
    match unified.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => unified,
    }
}

/// Deterministic UUID v5 for a file without an explicit id.
pub fn fallback_id(path: &str) -> Uuid {
    Uuid::new_v5(&FILE_IDENTITY_NAMESPACE, normalize_path(path).as_bytes())
}
