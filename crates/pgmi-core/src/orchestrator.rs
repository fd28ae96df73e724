//! Deploy and test pipelines.
//!
//! Both run under one cancel token. Only one database session is open at a
//! time: the maintenance session is closed before the target session opens.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::approval::Approver;
use crate::cancel::CancelToken;
use crate::config::{DeploymentConfig, TestConfig};
use crate::db::{Connector, DatabaseAdmin, DatabaseManager, Session};
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::scanner::{self, ScanResult};
use crate::session::prepare as prepare_session;
use crate::testing::{self, PlanCounts, TestPlan, TraceEvent};

#[derive(Debug)]
pub struct DeployOutcome {
    pub database: String,
    pub files: usize,
    pub created: bool,
    pub recreated: bool,
    pub duration_secs: f64,
}

#[derive(Debug)]
pub enum TestOutcome {
    /// `--list`: the filtered plan, nothing executed.
    Listed(TestPlan),
    Ran(TestSummary),
}

#[derive(Debug, Default)]
pub struct TestSummary {
    pub counts: PlanCounts,
    pub passed: usize,
    pub duration_secs: f64,
}

pub struct Orchestrator {
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(reporter: Arc<dyn ProgressReporter>, cancel: CancelToken) -> Self {
        Self { reporter, cancel }
    }

    /// Run the deployment pipeline:
    /// 1. Read deploy.sql and scan the project (no database contact)
    /// 2. Ensure the target database exists, recreating it when approved
    /// 3. Materialise the project into a session and run deploy.sql
    pub async fn deploy(
        &self,
        config: &DeploymentConfig,
        approver: &Approver,
    ) -> Result<DeployOutcome, Error> {
        let start = Instant::now();
        config.validate()?;

        let deploy_sql = scanner::read_deploy_script(&config.source_path)?;
        let scan = self.scan(&config.source_path)?;
        self.cancel.check()?;

        let base = Connector::new(config.connection.clone());
        let (created, recreated) = self.prepare_database(&base, config, approver).await?;

        let mut session = self.open(&base, &config.database_name).await?;
        let loaded =
            prepare_session(&session, &scan, &config.parameters, config.verbose, &self.cancel)
                .await?;
        self.forward_notices(&mut session);

        info!("Executing deploy.sql against {}", config.database_name);
        self.reporter.on_execute_start();
        let exec_start = Instant::now();
        let result = session.batch_execute(&deploy_sql, &self.cancel).await;
        self.forward_notices(&mut session);
        result.map_err(|err| match err {
            Error::Execution(message) => {
                Error::Execution(format!("deploy.sql failed: {}", message))
            }
            other => other,
        })?;
        let exec_secs = exec_start.elapsed().as_secs_f64();
        self.reporter.on_execute_complete(exec_secs);
        debug!("deploy.sql completed in {:.2}s", exec_secs);

        Ok(DeployOutcome {
            database: config.database_name.clone(),
            files: loaded.sources,
            created,
            recreated,
            duration_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Run the test pipeline. Everything a test does is rolled back.
    pub async fn run_tests(&self, config: &TestConfig) -> Result<TestOutcome, Error> {
        let start = Instant::now();
        config.validate()?;
        let pattern = Regex::new(&config.filter_pattern).map_err(|err| {
            Error::Config(format!(
                "invalid filter pattern '{}': {}",
                config.filter_pattern, err
            ))
        })?;

        let scan = self.scan(&config.source_path)?;
        let plan = selected_plan(&scan, &pattern);
        if config.list_only {
            info!("Listing {} plan steps", plan.steps.len());
            return Ok(TestOutcome::Listed(plan));
        }
        if let Some(name) = &config.callback {
            testing::validate_callback_name(name)?;
        }
        self.cancel.check()?;

        let base = Connector::new(config.connection.clone());
        let mut session = self.open(&base, &config.database_name).await?;
        prepare_session(&session, &scan, &config.parameters, config.verbose, &self.cancel)
            .await?;
        self.forward_notices(&mut session);

        let callback = match &config.callback {
            Some(name) => {
                self.check_callback(&session, name).await?;
                name.as_str()
            }
            None => testing::DEFAULT_CALLBACK,
        };

        let counts = plan.counts();
        if counts.tests == 0 {
            warn!("No tests match '{}'", config.filter_pattern);
        }

        let statements = testing::generate(&plan.steps, callback);
        info!(
            "Running {} tests ({} statements)",
            counts.tests,
            statements.len()
        );

        session.batch_execute("BEGIN", &self.cancel).await?;
        let mut passed = 0;
        for statement in &statements {
            let result = session.batch_execute(&statement.sql, &self.cancel).await;
            passed += self.forward_notices(&mut session);
            if let Err(err) = result {
                self.abort(&session).await;
                return Err(match (err, &statement.script) {
                    (Error::Execution(message), Some(script)) => {
                        Error::Execution(format!("{} failed: {}", script, message))
                    }
                    (other, _) => other,
                });
            }
        }
        session.batch_execute("ROLLBACK", &self.cancel).await?;

        // Custom callbacks may not emit trace lines; reaching the end means every test passed.
        if callback != testing::DEFAULT_CALLBACK {
            passed = counts.tests;
        }
        Ok(TestOutcome::Ran(TestSummary {
            counts,
            passed,
            duration_secs: start.elapsed().as_secs_f64(),
        }))
    }

    fn scan(&self, root: &std::path::Path) -> Result<ScanResult, Error> {
        self.reporter.on_scan_start();
        let scan_start = Instant::now();
        let scan = scanner::scan_directory(root)?;
        let stats = scan.stats();
        self.reporter
            .on_scan_complete(&stats, scan_start.elapsed().as_secs_f64());
        scan.validate()?;
        Ok(scan)
    }

    async fn open(&self, base: &Connector, database: &str) -> Result<Session, Error> {
        let connector = base.for_database(database);
        self.reporter
            .on_connect_start(&connector.config().host, database);
        let session = connector.connect(&self.cancel).await?;
        self.reporter.on_connect_complete(database);
        Ok(session)
    }

    /// Returns `(created, recreated)`. The maintenance session is dropped on return.
    async fn prepare_database(
        &self,
        base: &Connector,
        config: &DeploymentConfig,
        approver: &Approver,
    ) -> Result<(bool, bool), Error> {
        let maintenance = self.open(base, &config.maintenance_database).await?;
        let manager = DatabaseManager::new(&maintenance, &self.cancel);
        self.ensure_database(&manager, &config.database_name, config.overwrite, approver)
            .await
    }

    /// Creates a missing target without asking. An existing target is only
    /// recreated with `overwrite` and after approval.
    async fn ensure_database<A: DatabaseAdmin>(
        &self,
        admin: &A,
        target: &str,
        overwrite: bool,
        approver: &Approver,
    ) -> Result<(bool, bool), Error> {
        if !admin.exists(target).await? {
            admin.create(target).await?;
            self.reporter.on_database_created(target);
            return Ok((true, false));
        }
        if !overwrite {
            debug!("Database {} exists; deploying in place", target);
            return Ok((false, false));
        }

        if !approver.request_approval(target, &self.cancel).await? {
            return Err(Error::ApprovalDenied(target.to_string()));
        }
        self.cancel.check()?;
        admin.recreate(target).await?;
        self.reporter.on_database_recreated(target);
        Ok((false, true))
    }

    async fn check_callback(&self, session: &Session, name: &str) -> Result<(), Error> {
        session
            .query("SELECT $1::text::regproc", &[&name], &self.cancel)
            .await
            .map_err(|err| match err {
                Error::Execution(message) => Error::Config(format!(
                    "callback function '{}' is not usable: {}",
                    name, message
                )),
                other => other,
            })?;
        Ok(())
    }

    async fn abort(&self, session: &Session) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(err) = session.batch_execute("ROLLBACK", &self.cancel).await {
            warn!("Rollback after failure did not complete: {}", err);
        }
    }

    /// Hands pending notices to the reporter. Returns the number of passed tests seen.
    fn forward_notices(&self, session: &mut Session) -> usize {
        let mut passed = 0;
        for notice in session.drain_notices() {
            match TraceEvent::parse(&notice.message) {
                Some(event) => {
                    if event.is_pass() {
                        passed += 1;
                    }
                    self.reporter.on_trace(&event);
                }
                None => self.reporter.on_notice(&notice),
            }
        }
        passed
    }
}

/// The plan both `--list` and execution use, so they always agree on which
/// tests a pattern selects.
fn selected_plan(scan: &ScanResult, pattern: &Regex) -> TestPlan {
    testing::build_plan(scan).filter(pattern)
}
