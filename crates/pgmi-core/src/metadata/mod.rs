pub mod identity;
pub mod parser;

use uuid::Uuid;

pub use identity::fallback_id;
pub use parser::{parse_metadata, MetadataError};

/// Identity of a deployment script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub id: Uuid,
    pub idempotent: bool,
    pub description: String,
    /// Grouping hints only; deploy.sql owns the execution order.
    pub sort_keys: Vec<String>,
    pub source: MetadataSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Explicit,
    Fallback,
}

impl Metadata {
    pub fn fallback(path: &str) -> Self {
        Metadata {
            id: fallback_id(path),
            idempotent: true,
            description: String::new(),
            sort_keys: vec![basename(path).to_string()],
            source: MetadataSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == MetadataSource::Fallback
    }
}

/// Outcome of [`extract`]. A malformed block still yields usable fallback
/// metadata; the problem is kept for validation.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub metadata: Metadata,
    pub error: Option<MetadataError>,
}

pub fn extract(content: &str, path: &str) -> Extraction {
    match parse_metadata(content) {
        Ok(Some(raw)) => {
            let sort_keys = if raw.sort_keys.is_empty() {
                vec![basename(path).to_string()]
            } else {
                raw.sort_keys
            };
            Extraction {
                metadata: Metadata {
                    id: raw.id,
                    idempotent: raw.idempotent,
                    description: raw.description,
                    sort_keys,
                    source: MetadataSource::Explicit,
                },
                error: None,
            }
        }
        Ok(None) => Extraction {
            metadata: Metadata::fallback(path),
            error: None,
        },
        Err(err) => Extraction {
            metadata: Metadata::fallback(path),
            error: Some(err),
        },
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
