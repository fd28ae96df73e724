use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Process exit codes produced from the error taxonomy.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const PANIC: i32 = 2;
    pub const USAGE: i32 = 3;
    pub const CONFIG: i32 = 10;
    pub const CONNECTION: i32 = 11;
    pub const APPROVAL_DENIED: i32 = 12;
    pub const EXECUTION_FAILED: i32 = 13;
    pub const DEPLOY_SQL_MISSING: i32 = 14;
    pub const CANCELLED: i32 = 130;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed with {} issue(s):\n{}", .0.len(), format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Deployment approval denied for database '{0}'")]
    ApprovalDenied(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    /// The orchestration script is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The project directory itself is missing or unreadable.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Validation(_) | Error::ProjectNotFound(_) => {
                exit_code::CONFIG
            }
            Error::Connection(_) | Error::Auth(_) => exit_code::CONNECTION,
            Error::ApprovalDenied(_) => exit_code::APPROVAL_DENIED,
            Error::Execution(_) => exit_code::EXECUTION_FAILED,
            Error::NotFound(_) => exit_code::DEPLOY_SQL_MISSING,
            Error::Cancelled(_) => exit_code::CANCELLED,
            Error::Io(_) | Error::Other(_) => exit_code::GENERAL,
        }
    }

    /// Denials and cancellations are outcomes the user chose, not defects.
    pub fn is_user_outcome(&self) -> bool {
        matches!(self, Error::ApprovalDenied(_) | Error::Cancelled(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// A single problem found while validating a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    DuplicateId { id: Uuid, paths: Vec<String> },
    InvalidMetadata { path: String, reason: String },
    ReservedDirectory { path: String, segment: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::DuplicateId { id, paths } => {
                write!(f, "duplicate id {} used by: {}", id, paths.join(", "))
            }
            ValidationIssue::InvalidMetadata { path, reason } => {
                write!(f, "invalid metadata in {}: {}", path, reason)
            }
            ValidationIssue::ReservedDirectory { path, segment } => write!(
                f,
                "directory '{}' in {} uses the reserved __name__ form; only __test__ and __tests__ are allowed",
                segment, path
            ),
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_taxonomy() {
        assert_eq!(Error::Config("x".into()).exit_code(), 10);
        assert_eq!(Error::Validation(vec![]).exit_code(), 10);
        assert_eq!(Error::Connection("x".into()).exit_code(), 11);
        assert_eq!(Error::Auth("x".into()).exit_code(), 11);
        assert_eq!(Error::ApprovalDenied("db".into()).exit_code(), 12);
        assert_eq!(Error::Execution("x".into()).exit_code(), 13);
        assert_eq!(Error::NotFound("deploy.sql".into()).exit_code(), 14);
        assert_eq!(Error::ProjectNotFound("./missing".into()).exit_code(), 10);
        assert_eq!(Error::Cancelled("signal".into()).exit_code(), 130);
        assert_eq!(Error::Other("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_validation_message_lists_every_issue() {
        let err = Error::Validation(vec![
            ValidationIssue::DuplicateId {
                id: Uuid::nil(),
                paths: vec!["./a.sql".into(), "./b.sql".into()],
            },
            ValidationIssue::InvalidMetadata {
                path: "./c.sql".into(),
                reason: "missing id".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 issue(s)"));
        assert!(text.contains("./a.sql, ./b.sql"));
        assert!(text.contains("./c.sql: missing id"));
    }

    #[test]
    fn test_user_outcomes() {
        assert!(Error::ApprovalDenied("db".into()).is_user_outcome());
        assert!(Error::Cancelled("deadline".into()).is_user_outcome());
        assert!(!Error::Execution("boom".into()).is_user_outcome());
    }
}
