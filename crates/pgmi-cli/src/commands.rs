use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pgmi_core::connection::{AwsFlags, AzureFlags, ConnectionFlags, GoogleFlags};
use pgmi_core::config::DEFAULT_TEST_FILTER;

#[derive(Debug, Parser)]
#[command(name = "pgmi")]
#[command(about = "PostgreSQL-native deployments and SQL tests", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        match &self.command {
            Some(Commands::Deploy(args)) => args.run.verbose,
            Some(Commands::Test(args)) => args.run.verbose,
            None => false,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a project, load it into a session and run its deploy.sql
    Deploy(DeployArgs),
    /// Run the project's __test__ scripts; every change is rolled back
    Test(TestArgs),
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Project directory containing deploy.sql
    pub path: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub run: RunArgs,

    /// Drop and recreate the target database first
    #[arg(long)]
    pub overwrite: bool,

    /// Skip the typed confirmation and use a countdown instead (requires --overwrite)
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct TestArgs {
    /// Project directory
    pub path: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub run: RunArgs,

    /// POSIX regular expression selecting test paths
    #[arg(long, default_value = DEFAULT_TEST_FILTER)]
    pub filter: String,

    /// Print the test plan without running it
    #[arg(long)]
    pub list: bool,

    /// Function receiving test events, e.g. my_schema.on_test_event
    #[arg(long)]
    pub callback: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Connection string (postgresql://... or Key=Value;...)
    #[arg(short = 'c', long)]
    pub connection: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    #[arg(short = 'U', long)]
    pub username: Option<String>,

    /// Target database
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// disable, allow, prefer, require, verify-ca or verify-full
    #[arg(long)]
    pub sslmode: Option<String>,

    #[arg(long)]
    pub sslcert: Option<String>,

    #[arg(long)]
    pub sslkey: Option<String>,

    #[arg(long)]
    pub sslrootcert: Option<String>,

    /// Authenticate with an Azure Entra ID token
    #[arg(long)]
    pub azure: bool,

    #[arg(long)]
    pub azure_tenant_id: Option<String>,

    #[arg(long)]
    pub azure_client_id: Option<String>,

    /// Authenticate with an AWS RDS IAM token
    #[arg(long)]
    pub aws: bool,

    #[arg(long)]
    pub aws_region: Option<String>,

    /// Authenticate with a Google Cloud SQL IAM token
    #[arg(long)]
    pub google: bool,

    /// Cloud SQL instance as project:region:instance
    #[arg(long)]
    pub google_instance: Option<String>,
}

impl ConnectionArgs {
    pub fn flags(&self) -> ConnectionFlags {
        ConnectionFlags {
            connection: self.connection.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            database: self.database.clone(),
            sslmode: self.sslmode.clone(),
            sslcert: self.sslcert.clone(),
            sslkey: self.sslkey.clone(),
            sslrootcert: self.sslrootcert.clone(),
            azure: AzureFlags {
                enabled: self.azure,
                tenant_id: self.azure_tenant_id.clone(),
                client_id: self.azure_client_id.clone(),
            },
            aws: AwsFlags {
                enabled: self.aws,
                region: self.aws_region.clone(),
            },
            google: GoogleFlags {
                enabled: self.google,
                instance: self.google_instance.clone(),
            },
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Session parameter, readable in SQL as pgmi.<key>
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// File of KEY=VALUE lines, applied in order before --param
    #[arg(long = "params-file", value_name = "FILE")]
    pub params_files: Vec<PathBuf>,

    /// Hard limit for the whole run, e.g. 90s, 3m, 1h30m
    #[arg(long)]
    pub timeout: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy_flags() {
        let cli = Cli::try_parse_from([
            "pgmi", "deploy", "./proj", "-d", "app", "--overwrite", "--force", "-P", "env=dev",
            "--param", "tier=1", "--params-file", "a.env", "--timeout", "90s", "-v",
        ])
        .unwrap();
        let Some(Commands::Deploy(args)) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.path, PathBuf::from("./proj"));
        assert_eq!(args.connection.database.as_deref(), Some("app"));
        assert!(args.overwrite && args.force && args.run.verbose);
        assert_eq!(args.run.params, vec!["env=dev", "tier=1"]);
        assert_eq!(args.run.params_files, vec![PathBuf::from("a.env")]);
        assert_eq!(args.run.timeout.as_deref(), Some("90s"));
    }

    #[test]
    fn test_parse_test_defaults() {
        let cli = Cli::try_parse_from(["pgmi", "test", "."]).unwrap();
        let Some(Commands::Test(args)) = cli.command else {
            panic!("expected test");
        };
        assert_eq!(args.filter, ".*");
        assert!(!args.list);
        assert_eq!(args.callback, None);
    }

    #[test]
    fn test_cloud_flags_map_to_groups() {
        let cli = Cli::try_parse_from([
            "pgmi", "test", ".", "--aws", "--aws-region", "eu-west-1", "-U", "deployer",
        ])
        .unwrap();
        let Some(Commands::Test(args)) = cli.command else {
            panic!("expected test");
        };
        let flags = args.connection.flags();
        assert!(flags.aws.enabled);
        assert_eq!(flags.aws.region.as_deref(), Some("eu-west-1"));
        assert!(flags.azure.is_empty() && flags.google.is_empty());
        assert_eq!(flags.username.as_deref(), Some("deployer"));
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["pgmi", "deploy", ".", "-p", "70000"]).is_err());
    }
}
