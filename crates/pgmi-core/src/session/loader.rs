//! Inserts scanned files, parameters and the test plan into the session tables.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::db::Session;
use crate::error::Error;
use crate::scanner::{Classification, ScanResult};
use crate::testing::{TestDirectory, TestPlan};

pub async fn load_sources(
    session: &Session,
    scan: &ScanResult,
    cancel: &CancelToken,
) -> Result<usize, Error> {
    let mut count = 0;
    for file in scan.deployment_files() {
        let depth = file.depth as i32;
        let size = file.size_bytes() as i64;
        let content = file.content_text();
        session
            .execute(
                "INSERT INTO pg_temp._pgmi_source \
                 (path, name, directory, extension, depth, content, size_bytes, checksum, checksum_raw, is_sql_file) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &file.path,
                    &file.name,
                    &file.directory,
                    &file.extension,
                    &depth,
                    &content,
                    &size,
                    &file.normalized_checksum,
                    &file.raw_checksum,
                    &file.is_sql,
                ],
                cancel,
            )
            .await?;

        if let Some(meta) = &file.metadata {
            let description = (!meta.description.is_empty()).then_some(meta.description.as_str());
            let fallback = meta.is_fallback();
            session
                .execute(
                    "INSERT INTO pg_temp._pgmi_source_metadata \
                     (path, id, idempotent, description, sort_keys, is_fallback_id) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &file.path,
                        &meta.id,
                        &meta.idempotent,
                        &description,
                        &meta.sort_keys,
                        &fallback,
                    ],
                    cancel,
                )
                .await?;
        }
        count += 1;
    }
    debug!("Loaded {} source files", count);
    Ok(count)
}

pub async fn load_test_sources(
    session: &Session,
    scan: &ScanResult,
    directories: &[TestDirectory],
    cancel: &CancelToken,
) -> Result<usize, Error> {
    for dir in directories {
        let depth = dir.depth as i32;
        session
            .execute(
                "INSERT INTO pg_temp._pgmi_test_directory (path, parent_path, depth) VALUES ($1, $2, $3)",
                &[&dir.path, &dir.parent_path, &depth],
                cancel,
            )
            .await?;
    }

    let mut count = 0;
    for file in scan.test_files() {
        let depth = crate::scanner::classify::test_directory_depth(&file.directory) as i32;
        let content = file.content_text();
        let is_fixture = file.classification == Classification::Setup;
        session
            .execute(
                "INSERT INTO pg_temp._pgmi_test_source (path, directory, depth, content, is_fixture) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[&file.path, &file.directory, &depth, &content, &is_fixture],
                cancel,
            )
            .await?;
        count += 1;
    }
    debug!(
        "Loaded {} test files in {} directories",
        count,
        directories.len()
    );
    Ok(count)
}

pub async fn load_test_plan(
    session: &Session,
    plan: &TestPlan,
    cancel: &CancelToken,
) -> Result<(), Error> {
    for step in &plan.steps {
        let ordinal = step.ordinal as i32;
        let depth = step.depth as i32;
        let step_type = step.step_type.as_str();
        session
            .execute(
                "INSERT INTO pg_temp._pgmi_test_plan (ordinal, step_type, script_path, directory, depth) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[&ordinal, &step_type, &step.script_path, &step.directory, &depth],
                cancel,
            )
            .await?;
    }
    debug!("Loaded test plan with {} steps", plan.steps.len());
    Ok(())
}

/// Keys are expected to be validated and lower-cased already.
pub async fn load_parameters(
    session: &Session,
    parameters: &BTreeMap<String, String>,
    cancel: &CancelToken,
) -> Result<(), Error> {
    for (key, value) in parameters {
        session
            .execute(
                "INSERT INTO pg_temp._pgmi_parameter (key, value) VALUES (lower($1), $2)",
                &[key, value],
                cancel,
            )
            .await?;
        session
            .query(
                "SELECT pg_catalog.set_config('pgmi.' || lower($1), $2, false)",
                &[key, value],
                cancel,
            )
            .await?;
    }
    debug!("Loaded {} parameters", parameters.len());
    Ok(())
}
