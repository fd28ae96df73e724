pub mod approval;
pub mod auth;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod scanner;
pub mod session;
pub mod testing;

pub use approval::{Approver, ForcedApprover, InteractiveApprover};
pub use cancel::{CancelReason, CancelToken};
pub use config::{DeploymentConfig, ProjectConfig, TestConfig};
pub use connection::{ConnectionConfig, EnvSnapshot};
pub use error::Error;
pub use orchestrator::{DeployOutcome, Orchestrator, TestOutcome, TestSummary};
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::{scan_directory, ScanResult};
