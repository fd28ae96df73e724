//! Turns parsed flags into the immutable run configurations.

use std::collections::BTreeMap;
use std::time::Duration;

use pgmi_core::config::{self, ProjectConfig, DEFAULT_TIMEOUT};
use pgmi_core::connection::{self, EnvSnapshot};
use pgmi_core::{params, DeploymentConfig, Error, TestConfig};
use tracing::debug;

use crate::commands::{ConnectionArgs, DeployArgs, RunArgs, TestArgs};

pub fn deployment_config(args: &DeployArgs, env: &EnvSnapshot) -> Result<DeploymentConfig, Error> {
    let project = config::load_project_config(&args.path)?;
    let (resolution, database_name) = resolve_connection(&args.connection, env, &project)?;
    Ok(DeploymentConfig {
        source_path: args.path.clone(),
        connection: resolution.config,
        database_name,
        maintenance_database: resolution.maintenance_database,
        parameters: parameters(&args.run, &project)?,
        timeout: timeout(&args.run, &project)?,
        overwrite: args.overwrite,
        force: args.force,
        verbose: args.run.verbose,
    })
}

pub fn test_config(args: &TestArgs, env: &EnvSnapshot) -> Result<TestConfig, Error> {
    let project = config::load_project_config(&args.path)?;
    let (resolution, database_name) = resolve_connection(&args.connection, env, &project)?;
    Ok(TestConfig {
        source_path: args.path.clone(),
        connection: resolution.config,
        database_name,
        parameters: parameters(&args.run, &project)?,
        timeout: timeout(&args.run, &project)?,
        filter_pattern: args.filter.clone(),
        list_only: args.list,
        callback: args.callback.clone(),
        verbose: args.run.verbose,
    })
}

fn resolve_connection(
    args: &ConnectionArgs,
    env: &EnvSnapshot,
    project: &ProjectConfig,
) -> Result<(connection::Resolution, String), Error> {
    let resolution = connection::resolve(&args.flags(), env, project)?;
    let database = connection::resolve_target_database(
        args.database.as_deref().unwrap_or(""),
        &resolution.config.database,
        true,
    )?;
    debug!(
        "Target database {}, maintenance database {}",
        database, resolution.maintenance_database
    );
    Ok((resolution, database))
}

fn parameters(run: &RunArgs, project: &ProjectConfig) -> Result<BTreeMap<String, String>, Error> {
    let files = run
        .params_files
        .iter()
        .map(|path| params::load_params_file(path))
        .collect::<Result<Vec<_>, _>>()?;
    let cli = run
        .params
        .iter()
        .map(|raw| params::parse_cli_param(raw))
        .collect::<Result<Vec<_>, _>>()?;
    params::merge(&project.params, &files, &cli)
}

fn timeout(run: &RunArgs, project: &ProjectConfig) -> Result<Duration, Error> {
    match &run.timeout {
        Some(raw) => config::parse_duration(raw),
        None => Ok(project.timeout()?.unwrap_or(DEFAULT_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    fn env() -> EnvSnapshot {
        EnvSnapshot::from_pairs(vec![("PGPASSFILE", "/nonexistent/pgpass")])
    }

    fn deploy_args(argv: &[&str]) -> DeployArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Commands::Deploy(args)) => args,
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_deployment_config_merges_project_file() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("pgmi.yaml"),
            "connection:\n  host: db.internal\n  database: app\nparams:\n  env: prod\n  tier: \"1\"\ntimeout: 5m\n",
        )
        .unwrap();
        fs::write(tmp.path().join("dev.env"), "ENV=staging\n").unwrap();
        let dir = tmp.path().to_str().unwrap();
        let args = deploy_args(&[
            "pgmi", "deploy", dir, "--params-file", &format!("{}/dev.env", dir), "-P", "tier=2",
        ]);

        let config = deployment_config(&args, &env()).unwrap();
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.database_name, "app");
        assert_eq!(config.maintenance_database, "postgres");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.parameters.get("env").map(String::as_str), Some("staging"));
        assert_eq!(config.parameters.get("tier").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_missing_database_is_config_error() {
        let tmp = tempdir().unwrap();
        let args = deploy_args(&["pgmi", "deploy", tmp.path().to_str().unwrap()]);
        let err = deployment_config(&args, &env()).unwrap_err();
        assert!(err.to_string().contains("database name is required"));
        assert_eq!(err.exit_code(), pgmi_core::error::exit_code::CONFIG);
    }

    #[test]
    fn test_timeout_flag_wins() {
        let tmp = tempdir().unwrap();
        let args = deploy_args(&[
            "pgmi", "deploy", tmp.path().to_str().unwrap(), "-d", "app", "--timeout", "1h30m",
        ]);
        let config = deployment_config(&args, &env()).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5400));
    }
}
