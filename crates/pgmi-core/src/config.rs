use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File as ConfigFile, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::error::Error;

pub const PROJECT_CONFIG_FILE: &str = "pgmi.yaml";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_TEST_FILTER: &str = ".*";

/// Connection section of `pgmi.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConnection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub database: Option<String>,
    pub management_database: Option<String>,
    pub sslmode: Option<String>,
    pub sslcert: Option<String>,
    pub sslkey: Option<String>,
    pub sslrootcert: Option<String>,
    pub auth_method: Option<String>,
    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub aws_region: Option<String>,
    pub google_instance: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub connection: ProjectConnection,
    pub params: BTreeMap<String, String>,
    pub timeout: Option<String>,
}

impl ProjectConfig {
    pub fn timeout(&self) -> Result<Option<Duration>, Error> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// Loads `pgmi.yaml` from the project root. A missing file yields defaults.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig, Error> {
    let path = project_root.join(PROJECT_CONFIG_FILE);
    debug!("Loading project configuration from {}", path.display());
    let settings = Config::builder()
        .add_source(
            ConfigFile::from(path.as_path())
                .format(FileFormat::Yaml)
                .required(false),
        )
        .build()?;
    let project: ProjectConfig = settings.try_deserialize()?;
    Ok(project)
}

/// Parses `500ms`, `90s`, `3m`, `1h30m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let text = input.trim();
    if text.is_empty() {
        return Err(Error::Config("empty duration".into()));
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || {
        Error::Config(format!(
            "invalid duration '{}'; use forms like 90s, 3m, 1h30m or 500ms",
            input
        ))
    };

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let part = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            _ => return Err(invalid()),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| Error::Config(format!("duration '{}' is too large", input)))?;
    }
    Ok(total)
}

/// Everything a deploy run needs, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub source_path: PathBuf,
    pub connection: ConnectionConfig,
    pub database_name: String,
    pub maintenance_database: String,
    pub parameters: BTreeMap<String, String>,
    pub timeout: Duration,
    pub overwrite: bool,
    pub force: bool,
    pub verbose: bool,
}

impl DeploymentConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Config("source path is required".into()));
        }
        if self.database_name.trim().is_empty() {
            return Err(Error::Config("database name is required".into()));
        }
        if self.connection.host.trim().is_empty() {
            return Err(Error::Config("host is required".into()));
        }
        if self.force && !self.overwrite {
            return Err(Error::Config("--force requires --overwrite".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    pub source_path: PathBuf,
    pub connection: ConnectionConfig,
    pub database_name: String,
    pub parameters: BTreeMap<String, String>,
    pub timeout: Duration,
    pub filter_pattern: String,
    pub list_only: bool,
    pub callback: Option<String>,
    pub verbose: bool,
}

impl TestConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Config("source path is required".into()));
        }
        if self.database_name.trim().is_empty() {
            return Err(Error::Config("database name is required".into()));
        }
        if self.connection.host.trim().is_empty() {
            return Err(Error::Config("host is required".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        Regex::new(&self.filter_pattern).map_err(|err| {
            Error::Config(format!(
                "invalid filter pattern '{}': {}",
                self.filter_pattern, err
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            ..Default::default()
        }
    }

    fn deployment() -> DeploymentConfig {
        DeploymentConfig {
            source_path: PathBuf::from("./project"),
            connection: connection(),
            database_name: "app".into(),
            maintenance_database: "postgres".into(),
            parameters: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            overwrite: false,
            force: false,
            verbose: false,
        }
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3 minutes").is_err());
        assert!(parse_duration("m3").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_config_error() {
        let huge = format!("{}h", u64::MAX / 1000);
        let err = parse_duration(&huge).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("too large"));

        let sum = format!("{}s{}s", u64::MAX, u64::MAX);
        assert!(matches!(parse_duration(&sum), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_project_config_is_default() {
        let tmp = tempdir().unwrap();
        let project = load_project_config(tmp.path()).unwrap();
        assert_eq!(project, ProjectConfig::default());
    }

    #[test]
    fn test_load_project_config() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(PROJECT_CONFIG_FILE),
            "connection:\n  host: db.internal\n  port: 6432\n  management_database: admin\n  auth_method: aws\n  aws_region: eu-west-1\nparams:\n  env: staging\ntimeout: 5m\n",
        )
        .unwrap();
        let project = load_project_config(tmp.path()).unwrap();
        assert_eq!(project.connection.host.as_deref(), Some("db.internal"));
        assert_eq!(project.connection.port, Some(6432));
        assert_eq!(project.connection.management_database.as_deref(), Some("admin"));
        assert_eq!(project.connection.aws_region.as_deref(), Some("eu-west-1"));
        assert_eq!(project.params.get("env").map(String::as_str), Some("staging"));
        assert_eq!(project.timeout().unwrap(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_deployment_validate() {
        assert!(deployment().validate().is_ok());

        let mut cfg = deployment();
        cfg.force = true;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        cfg.overwrite = true;
        assert!(cfg.validate().is_ok());

        let mut cfg = deployment();
        cfg.database_name.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("database name is required"));

        let mut cfg = deployment();
        cfg.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_test_config_rejects_bad_filter() {
        let cfg = TestConfig {
            source_path: PathBuf::from("./project"),
            connection: connection(),
            database_name: "app".into(),
            parameters: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            filter_pattern: "(unclosed".into(),
            list_only: false,
            callback: None,
            verbose: false,
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
