use crate::db::Notice;
use crate::scanner::ScanStats;
use crate::testing::TraceEvent;

/// Trait for reporting deploy and test progress.
///
/// The CLI implements it with indicatif/colored output.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _stats: &ScanStats, _duration_secs: f64) {}
    fn on_connect_start(&self, _host: &str, _database: &str) {}
    fn on_connect_complete(&self, _database: &str) {}
    fn on_database_created(&self, _database: &str) {}
    fn on_database_recreated(&self, _database: &str) {}
    fn on_execute_start(&self) {}
    fn on_execute_complete(&self, _duration_secs: f64) {}
    fn on_notice(&self, _notice: &Notice) {}
    fn on_trace(&self, _event: &TraceEvent) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
