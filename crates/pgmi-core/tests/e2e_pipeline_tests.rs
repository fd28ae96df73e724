use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use uuid::Uuid;

use pgmi_core::config::{DEFAULT_TEST_FILTER, DEFAULT_TIMEOUT};
use pgmi_core::error::{exit_code, ValidationIssue};
use pgmi_core::{
    scan_directory, Approver, CancelToken, ConnectionConfig, DeploymentConfig, Error,
    ForcedApprover, Orchestrator, SilentReporter, TestConfig, TestOutcome,
};

const FIRST_MIGRATION: &str = "/*\n<pgmi-meta\n    id=\"550e8400-e29b-41d4-a716-446655440000\"\n    idempotent=\"true\">\n  <description>First migration</description>\n  <sortKeys><key>01</key></sortKeys>\n</pgmi-meta>\n*/\nCREATE TABLE users (id int);\n";

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

/// Layout:
///   deploy.sql
///   migrations/001.sql            (explicit metadata)
///   migrations/002.sql            (no metadata, fallback identity)
///   README.md                     (non-SQL)
///   __test__/_setup.sql
///   __test__/test_users.sql
///   __test__/orders/test_orders.sql
fn create_project(root: &Path) {
    write(root, "deploy.sql", "SELECT 1;");
    write(root, "migrations/001.sql", FIRST_MIGRATION);
    write(root, "migrations/002.sql", "CREATE TABLE orders (id int);");
    write(root, "README.md", "# project");
    write(root, "__test__/_setup.sql", "INSERT INTO users VALUES (1);");
    write(root, "__test__/test_users.sql", "SELECT 1/count(*) FROM users;");
    write(root, "__test__/orders/test_orders.sql", "SELECT 1;");
}

fn unreachable_connection() -> ConnectionConfig {
    ConnectionConfig {
        host: "localhost".into(),
        port: 1,
        username: "nobody".into(),
        database: "app".into(),
        ..Default::default()
    }
}

fn deployment(root: &Path) -> DeploymentConfig {
    DeploymentConfig {
        source_path: root.to_path_buf(),
        connection: unreachable_connection(),
        database_name: "app".into(),
        maintenance_database: "postgres".into(),
        parameters: BTreeMap::new(),
        timeout: DEFAULT_TIMEOUT,
        overwrite: false,
        force: false,
        verbose: false,
    }
}

fn test_config(root: &Path, filter: &str) -> TestConfig {
    TestConfig {
        source_path: root.to_path_buf(),
        connection: unreachable_connection(),
        database_name: "app".into(),
        parameters: BTreeMap::new(),
        timeout: Duration::from_secs(30),
        filter_pattern: filter.into(),
        list_only: true,
        callback: None,
        verbose: false,
    }
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(Arc::new(SilentReporter), CancelToken::new())
}

#[test]
fn test_scan_pipeline_with_explicit_metadata() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());

    let scan = scan_directory(tmp.path()).unwrap();
    scan.validate().unwrap();
    assert!(scan.duplicate_ids.is_empty());

    let first = scan
        .deployment_files()
        .find(|f| f.path == "./migrations/001.sql")
        .expect("migration is scanned");
    let meta = first.metadata.as_ref().unwrap();
    assert_eq!(
        meta.id,
        Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
    );
    assert!(meta.idempotent);
    assert_eq!(meta.description, "First migration");
    assert_eq!(meta.sort_keys, vec!["01".to_string()]);

    let second = scan
        .deployment_files()
        .find(|f| f.path == "./migrations/002.sql")
        .unwrap();
    assert!(second.metadata.as_ref().unwrap().is_fallback());

    let readme = scan.files.iter().find(|f| f.path == "./README.md").unwrap();
    assert!(!readme.is_sql);
    assert!(readme.metadata.is_none());

    assert!(
        scan.files.iter().all(|f| !f.path.ends_with("deploy.sql")),
        "deploy.sql is never part of the file set"
    );

    let stats = scan.stats();
    assert_eq!(stats.deployment, 2);
    assert_eq!(stats.setup, 1);
    assert_eq!(stats.test, 2);
    assert_eq!(stats.explicit_ids, 1);
}

#[test]
fn test_duplicate_ids_fail_validation_with_both_paths() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());
    write(tmp.path(), "migrations/copy_of_001.sql", FIRST_MIGRATION);

    let scan = scan_directory(tmp.path()).unwrap();
    let err = scan.validate().unwrap_err();
    assert_eq!(err.exit_code(), exit_code::CONFIG);
    let Error::Validation(issues) = err else {
        panic!("expected validation error");
    };
    let paths = issues
        .iter()
        .find_map(|issue| match issue {
            ValidationIssue::DuplicateId { paths, .. } => Some(paths.clone()),
            _ => None,
        })
        .unwrap();
    assert!(paths.contains(&"./migrations/001.sql".to_string()));
    assert!(paths.contains(&"./migrations/copy_of_001.sql".to_string()));
}

#[test]
fn test_rescan_is_stable() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());

    let first = scan_directory(tmp.path()).unwrap();
    let second = scan_directory(tmp.path()).unwrap();
    let checksums = |scan: &pgmi_core::ScanResult| {
        scan.files
            .iter()
            .map(|f| (f.path.clone(), f.raw_checksum.clone(), f.normalized_checksum.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(checksums(&first), checksums(&second));
}

#[tokio::test]
async fn test_deploy_without_deploy_sql_is_not_found() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());
    fs::remove_file(tmp.path().join("deploy.sql")).unwrap();

    let approver = Approver::Forced(ForcedApprover::with_output(Box::new(std::io::sink())));
    let err = orchestrator()
        .deploy(&deployment(tmp.path()), &approver)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.exit_code(), exit_code::DEPLOY_SQL_MISSING);
}

#[tokio::test]
async fn test_deploy_validation_fails_before_connecting() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());
    write(tmp.path(), "__fixtures__/seed.sql", "SELECT 1;");

    let approver = Approver::Forced(ForcedApprover::with_output(Box::new(std::io::sink())));
    let err = orchestrator()
        .deploy(&deployment(tmp.path()), &approver)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_deploy_force_without_overwrite_is_config_error() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());
    let mut config = deployment(tmp.path());
    config.force = true;

    let approver = Approver::Forced(ForcedApprover::with_output(Box::new(std::io::sink())));
    let err = orchestrator().deploy(&config, &approver).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_deploy_observes_cancellation_before_database_contact() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());
    let cancel = CancelToken::new();
    cancel.cancel(pgmi_core::CancelReason::Interrupted);

    let approver = Approver::Forced(ForcedApprover::with_output(Box::new(std::io::sink())));
    let err = Orchestrator::new(Arc::new(SilentReporter), cancel)
        .deploy(&deployment(tmp.path()), &approver)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), exit_code::CANCELLED);
}

#[tokio::test]
async fn test_list_only_plan_needs_no_database() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());

    let outcome = orchestrator()
        .run_tests(&test_config(tmp.path(), DEFAULT_TEST_FILTER))
        .await
        .unwrap();
    let TestOutcome::Listed(plan) = outcome else {
        panic!("expected a listing");
    };
    let listing = plan.listing();
    assert!(listing.contains("1. Setup:   ./__test__/_setup.sql"));
    assert!(listing.contains("2. Test:    ./__test__/test_users.sql"));
    assert!(listing.contains("3. Test:    ./__test__/orders/test_orders.sql"));
    assert!(listing.contains("Total: 2 tests (with 1 setup, 2 teardown)"));
}

#[tokio::test]
async fn test_list_only_applies_filter() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());

    let outcome = orchestrator()
        .run_tests(&test_config(tmp.path(), "orders"))
        .await
        .unwrap();
    let TestOutcome::Listed(plan) = outcome else {
        panic!("expected a listing");
    };
    let counts = plan.counts();
    assert_eq!(counts.tests, 1);
    assert_eq!(counts.fixtures, 1);
    assert_eq!(plan.steps[1].script_path.as_deref(), Some("./__test__/orders/test_orders.sql"));
}

#[tokio::test]
async fn test_invalid_filter_is_config_error() {
    let tmp = tempdir().unwrap();
    create_project(tmp.path());

    let err = orchestrator()
        .run_tests(&test_config(tmp.path(), "(unclosed"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
