//! Session-scoped materialisation of a scanned project.
//!
//! Every object lives in `pg_temp`, so a prepared session leaves nothing
//! behind once it closes.

pub mod loader;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::db::Session;
use crate::error::Error;
use crate::scanner::ScanResult;
use crate::testing::{self, TestPlan};

pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// What was loaded into the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    pub sources: usize,
    pub test_sources: usize,
    pub parameters: usize,
    pub plan: TestPlan,
}

pub async fn prepare(
    session: &Session,
    scan: &ScanResult,
    parameters: &BTreeMap<String, String>,
    verbose: bool,
    cancel: &CancelToken,
) -> Result<Materialized, Error> {
    let start = Instant::now();
    session.batch_execute(SCHEMA_SQL, cancel).await?;
    debug!("Session schema created");

    if verbose {
        session
            .batch_execute("SET client_min_messages = 'debug'", cancel)
            .await?;
    }

    let sources = loader::load_sources(session, scan, cancel).await?;

    let directories = testing::test_directories(scan);
    let test_sources = loader::load_test_sources(session, scan, &directories, cancel).await?;
    let plan = testing::build_plan(scan);
    loader::load_test_plan(session, &plan, cancel).await?;

    loader::load_parameters(session, parameters, cancel).await?;

    info!(
        "Session prepared in {:.2}s: {} files, {} test files, {} parameters",
        start.elapsed().as_secs_f64(),
        sources,
        test_sources,
        parameters.len()
    );

    Ok(Materialized {
        sources,
        test_sources,
        parameters: parameters.len(),
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_session_objects() {
        for object in [
            "pg_temp._pgmi_source ",
            "pg_temp._pgmi_source_metadata ",
            "pg_temp._pgmi_parameter ",
            "pg_temp._pgmi_test_directory ",
            "pg_temp._pgmi_test_source ",
            "pg_temp._pgmi_test_plan ",
            "TYPE pg_temp.pgmi_test_event",
            "VIEW pg_temp.pgmi_plan_view",
            "VIEW pg_temp.pgmi_source_view",
            "VIEW pg_temp.pgmi_source_metadata_view",
            "VIEW pg_temp.pgmi_parameter_view",
            "VIEW pg_temp.pgmi_test_source_view",
            "VIEW pg_temp.pgmi_test_directory_view",
            "FUNCTION pg_temp.pgmi_test_plan(pattern text DEFAULT '.*')",
            "FUNCTION pg_temp.pgmi_param(",
            "FUNCTION pg_temp.pgmi_trace_callback(",
        ] {
            assert!(SCHEMA_SQL.contains(object), "missing {}", object);
        }
    }

    #[test]
    fn test_trace_notice_shape() {
        assert!(SCHEMA_SQL.contains("RAISE NOTICE '[TRACE]%|%|%|%|%'"));
        assert!(SCHEMA_SQL.contains("current_setting('pgmi.' || lower(p_key), true)"));
    }
}
