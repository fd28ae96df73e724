mod commands;
mod logging;
mod progress;
mod resolve;
mod signals;

use std::backtrace::Backtrace;
use std::env;
use std::future::Future;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, DeployArgs, TestArgs};
use dotenv::dotenv;
use pgmi_core::error::exit_code;
use pgmi_core::{
    Approver, CancelToken, EnvSnapshot, Error, ForcedApprover, InteractiveApprover, Orchestrator,
    TestOutcome,
};
use progress::CliReporter;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

/// How long shutdown waits for blocking tasks, such as a stdin read left
/// behind by a cancelled prompt.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() {
    dotenv().ok();
    install_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_code::USAGE
            } else {
                exit_code::SUCCESS
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    let code = {
        let _guard = logging::init_logger(cli.verbose());

        if env::var("PGMI_TEST_PANIC").as_deref() == Ok("1") {
            panic!("PGMI_TEST_PANIC=1 is set, panicking on purpose");
        }

        match build_runtime() {
            Ok(runtime) => run_to_exit(runtime, run(cli)),
            Err(err) => {
                error!("{:#}", err);
                exit_code::GENERAL
            }
        }
    };
    process::exit(code);
}

fn build_runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}

fn run_to_exit<F>(runtime: Runtime, future: F) -> i32
where
    F: Future<Output = i32>,
{
    let code = runtime.block_on(future);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("{} {}", "pgmi panicked:".red().bold(), info);
        eprintln!("{}", Backtrace::force_capture());
        process::exit(exit_code::PANIC);
    }));
}

async fn run(cli: Cli) -> i32 {
    let Some(command) = cli.command else {
        let _ = Cli::command().print_long_help();
        return exit_code::USAGE;
    };

    let cancel = CancelToken::new();
    let watcher = signals::spawn_watcher(cancel.clone());
    let result = match command {
        Commands::Deploy(args) => run_deploy(args, &cancel).await,
        Commands::Test(args) => run_test(args, &cancel).await,
    };
    watcher.abort();

    match result {
        Ok(()) => exit_code::SUCCESS,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    }
}

async fn run_deploy(args: DeployArgs, cancel: &CancelToken) -> Result<(), Error> {
    let config = resolve::deployment_config(&args, &EnvSnapshot::from_process())?;
    info!(
        "Deploying {} to {}",
        config.source_path.display(),
        config.connection.with_database(&config.database_name).redacted()
    );

    let approver = if config.force {
        Approver::Forced(ForcedApprover::new())
    } else {
        Approver::Interactive(InteractiveApprover::stdin())
    };
    let reporter = Arc::new(CliReporter::new(config.verbose));
    let deadline = cancel.spawn_deadline(config.timeout);
    let result = Orchestrator::new(reporter.clone(), cancel.clone())
        .deploy(&config, &approver)
        .await;
    deadline.abort();
    reporter.finish();

    let outcome = result?;
    println!(
        "{} Deployed {} files to {} in {:.2}s",
        "✓".green().bold(),
        outcome.files,
        outcome.database.bold(),
        outcome.duration_secs
    );
    Ok(())
}

async fn run_test(args: TestArgs, cancel: &CancelToken) -> Result<(), Error> {
    let config = resolve::test_config(&args, &EnvSnapshot::from_process())?;
    let reporter = Arc::new(CliReporter::new(config.verbose));
    let deadline = cancel.spawn_deadline(config.timeout);
    let result = Orchestrator::new(reporter.clone(), cancel.clone())
        .run_tests(&config)
        .await;
    deadline.abort();
    reporter.finish();

    match result? {
        TestOutcome::Listed(plan) => {
            print!("{}", plan.listing());
        }
        TestOutcome::Ran(summary) => {
            if summary.counts.tests == 0 {
                println!("{} No tests matched '{}'", "!".yellow().bold(), config.filter_pattern);
            } else {
                println!(
                    "{} {} of {} tests passed in {:.2}s (all changes rolled back)",
                    "✓".green().bold(),
                    summary.passed,
                    summary.counts.tests,
                    summary.duration_secs
                );
            }
        }
    }
    Ok(())
}

fn report_error(err: &Error) {
    if err.is_user_outcome() {
        warn!("{}", err.to_string().yellow());
    } else {
        error!("Error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufReader, Read};
    use std::time::Instant;

    /// Never returns, like a terminal nobody types into.
    struct StalledInput;

    impl Read for StalledInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[test]
    fn test_cancelled_prompt_does_not_block_exit() {
        let runtime = build_runtime().unwrap();
        let approver = InteractiveApprover::new(
            Box::new(BufReader::new(StalledInput)),
            Box::new(io::sink()),
        );
        let cancel = CancelToken::new();

        let start = Instant::now();
        let code = run_to_exit(runtime, async move {
            let _deadline = cancel.spawn_deadline(Duration::from_millis(50));
            match approver.request_approval("app", &cancel).await {
                Ok(_) => exit_code::SUCCESS,
                Err(err) => err.exit_code(),
            }
        });

        assert_eq!(code, exit_code::CANCELLED);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
