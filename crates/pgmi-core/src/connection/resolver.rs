//! Merges every connection source into one [`ConnectionConfig`].
//!
//! Each field is resolved on its own, highest precedence first:
//! connection-string flag, granular and cloud flags, connection string from
//! the environment (`PGMI_CONNECTION_STRING`, then `DATABASE_URL`), standard
//! `PG*` variables, `pgmi.yaml`, built-in defaults.

use tracing::debug;

use super::parser::{parse_connection_string, parse_port, ConnectionParams};
use super::{pgpass, AuthMethod, ConnectionConfig, EnvSnapshot, SslMode};
use super::{DEFAULT_HOST, DEFAULT_MAINTENANCE_DB, DEFAULT_PORT};
use crate::config::ProjectConfig;
use crate::error::Error;

pub const DEFAULT_APPLICATION_NAME: &str = "pgmi";

#[derive(Debug, Clone, Default)]
pub struct AzureFlags {
    pub enabled: bool,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
}

impl AzureFlags {
    pub fn is_empty(&self) -> bool {
        !self.enabled && self.tenant_id.is_none() && self.client_id.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AwsFlags {
    pub enabled: bool,
    pub region: Option<String>,
}

impl AwsFlags {
    pub fn is_empty(&self) -> bool {
        !self.enabled && self.region.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoogleFlags {
    pub enabled: bool,
    pub instance: Option<String>,
}

impl GoogleFlags {
    pub fn is_empty(&self) -> bool {
        !self.enabled && self.instance.is_none()
    }
}

/// Connection-related command line values. Built once per invocation.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFlags {
    pub connection: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub database: Option<String>,
    pub sslmode: Option<String>,
    pub sslcert: Option<String>,
    pub sslkey: Option<String>,
    pub sslrootcert: Option<String>,
    pub azure: AzureFlags,
    pub aws: AwsFlags,
    pub google: GoogleFlags,
}

impl ConnectionFlags {
    /// Granular server flags. The database flag is deliberately excluded; it
    /// may override the database of a connection string.
    fn has_granular(&self) -> bool {
        self.host.is_some() || self.port.is_some() || self.username.is_some() || self.sslmode.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: ConnectionConfig,
    pub maintenance_database: String,
    /// Database named by the connection string in effect, if any.
    pub connection_string_database: Option<String>,
}

pub fn resolve(
    flags: &ConnectionFlags,
    env: &EnvSnapshot,
    project: &ProjectConfig,
) -> Result<Resolution, Error> {
    let cloud_groups = [!flags.azure.is_empty(), !flags.aws.is_empty(), !flags.google.is_empty()]
        .iter()
        .filter(|set| **set)
        .count();
    if cloud_groups > 1 {
        return Err(Error::Config(
            "cannot use multiple cloud authentication methods; choose one of --azure, --aws or --google".into(),
        ));
    }

    if flags.connection.is_some() && flags.has_granular() {
        return Err(Error::Config(
            "cannot combine --connection with --host, --port, --username or --sslmode; \
             use either a connection string or granular flags"
                .into(),
        ));
    }

    let flag_cs = flags
        .connection
        .as_deref()
        .map(parse_connection_string)
        .transpose()?
        .unwrap_or_default();
    let env_cs = match env.first_of(&["PGMI_CONNECTION_STRING", "DATABASE_URL"]) {
        Some(raw) => parse_connection_string(raw).map_err(|err| {
            Error::Config(format!("invalid connection string in environment: {}", err))
        })?,
        None => ConnectionParams::default(),
    };
    let pc = &project.connection;

    let host = flag_cs
        .host
        .clone()
        .or_else(|| flags.host.clone())
        .or_else(|| env_cs.host.clone())
        .or_else(|| env.get("PGHOST").map(str::to_string))
        .or_else(|| pc.host.clone());

    let port = match (flag_cs.port, flags.port, env_cs.port) {
        (Some(port), _, _) => port,
        (None, Some(port), _) => validate_port(port, "--port")?,
        (None, None, Some(port)) => port,
        (None, None, None) => match env.get("PGPORT") {
            Some(raw) => parse_port(raw)
                .map_err(|_| Error::Config(format!("invalid $PGPORT value '{}': must be an integer between 1 and 65535", raw)))?,
            None => match pc.port {
                Some(port) => validate_port(port, "pgmi.yaml connection.port")?,
                None => DEFAULT_PORT,
            },
        },
    };

    let username = flag_cs
        .username
        .clone()
        .or_else(|| flags.username.clone())
        .or_else(|| env_cs.username.clone())
        .or_else(|| env.get("PGUSER").map(str::to_string))
        .or_else(|| pc.username.clone())
        .or_else(|| env.first_of(&["USER", "USERNAME"]).map(str::to_string))
        .unwrap_or_default();

    let connection_string_database = flag_cs.database.clone().or_else(|| env_cs.database.clone());
    let database = flags
        .database
        .clone()
        .or_else(|| flag_cs.database.clone())
        .or_else(|| env_cs.database.clone())
        .or_else(|| env.get("PGDATABASE").map(str::to_string))
        .or_else(|| pc.database.clone())
        .unwrap_or_default();

    let auth_method = select_auth_method(flags, project)?;
    // An unset host lets the Cloud SQL instance address be looked up later.
    let host = match host {
        Some(host) => host,
        None if auth_method == AuthMethod::GoogleIam => String::new(),
        None => DEFAULT_HOST.to_string(),
    };

    let ssl_mode = match flag_cs.ssl_mode {
        Some(mode) => mode,
        None => {
            let text = flags
                .sslmode
                .clone()
                .or_else(|| env_cs.ssl_mode.map(|m| m.as_str().to_string()))
                .or_else(|| env.get("PGSSLMODE").map(str::to_string))
                .or_else(|| pc.sslmode.clone());
            match text {
                Some(text) => text.parse()?,
                None if auth_method != AuthMethod::Standard => SslMode::Require,
                None => SslMode::default(),
            }
        }
    };

    let ssl_cert = flag_cs
        .ssl_cert
        .clone()
        .or_else(|| flags.sslcert.clone())
        .or_else(|| env_cs.ssl_cert.clone())
        .or_else(|| env.get("PGSSLCERT").map(str::to_string))
        .or_else(|| pc.sslcert.clone());
    let ssl_key = flag_cs
        .ssl_key
        .clone()
        .or_else(|| flags.sslkey.clone())
        .or_else(|| env_cs.ssl_key.clone())
        .or_else(|| env.get("PGSSLKEY").map(str::to_string))
        .or_else(|| pc.sslkey.clone());
    let ssl_root_cert = flag_cs
        .ssl_root_cert
        .clone()
        .or_else(|| flags.sslrootcert.clone())
        .or_else(|| env_cs.ssl_root_cert.clone())
        .or_else(|| env.get("PGSSLROOTCERT").map(str::to_string))
        .or_else(|| pc.sslrootcert.clone());

    let mut extra_params = env_cs.extra_params.clone();
    extra_params.extend(flag_cs.extra_params.clone());

    let mut config = ConnectionConfig {
        host,
        port,
        username,
        password: None,
        database,
        ssl_mode,
        ssl_cert,
        ssl_key,
        ssl_root_cert,
        application_name: flag_cs
            .application_name
            .clone()
            .or_else(|| env_cs.application_name.clone())
            .or_else(|| Some(DEFAULT_APPLICATION_NAME.to_string())),
        connect_timeout: flag_cs.connect_timeout.or(env_cs.connect_timeout),
        auth_method,
        extra_params,
        ..Default::default()
    };

    apply_cloud_fields(&mut config, flags, env, project)?;

    if config.auth_method == AuthMethod::Standard {
        let explicit = flag_cs
            .password
            .clone()
            .or_else(|| env_cs.password.clone())
            .or_else(|| env.get("PGPASSWORD").map(str::to_string));
        match explicit {
            Some(password) => config.password = Some(password),
            None => {
                config.pgpass_file = pgpass::pgpass_path(env);
                config.password = config.pgpass_file.as_ref().and_then(|path| {
                    pgpass::lookup(path, &config.host, config.port, &config.database, &config.username)
                });
            }
        }
    }

    let maintenance = connection_string_database
        .clone()
        .or_else(|| pc.management_database.clone())
        .unwrap_or_else(|| DEFAULT_MAINTENANCE_DB.to_string());
    let maintenance_database = determine_maintenance_db(
        flags.database.as_deref().unwrap_or(""),
        connection_string_database.as_deref().unwrap_or(""),
        &maintenance,
    );

    debug!(
        "Resolved connection {} (auth: {}, maintenance db: {})",
        config.redacted(),
        config.auth_method,
        maintenance_database
    );

    Ok(Resolution {
        config,
        maintenance_database,
        connection_string_database,
    })
}

fn validate_port(port: u16, source: &str) -> Result<u16, Error> {
    if port == 0 {
        return Err(Error::Config(format!(
            "invalid {} value 0: must be between 1 and 65535",
            source
        )));
    }
    Ok(port)
}

fn select_auth_method(flags: &ConnectionFlags, project: &ProjectConfig) -> Result<AuthMethod, Error> {
    if flags.azure.enabled {
        return Ok(AuthMethod::AzureEntraId);
    }
    if flags.aws.enabled {
        return Ok(AuthMethod::AwsIam);
    }
    if flags.google.enabled {
        return Ok(AuthMethod::GoogleIam);
    }
    match project.connection.auth_method.as_deref() {
        Some(method) => method.parse(),
        None => Ok(AuthMethod::Standard),
    }
}

fn apply_cloud_fields(
    config: &mut ConnectionConfig,
    flags: &ConnectionFlags,
    env: &EnvSnapshot,
    project: &ProjectConfig,
) -> Result<(), Error> {
    let pc = &project.connection;
    match config.auth_method {
        AuthMethod::Standard => {}
        AuthMethod::AzureEntraId => {
            config.azure_tenant_id = flags
                .azure
                .tenant_id
                .clone()
                .or_else(|| env.get("AZURE_TENANT_ID").map(str::to_string))
                .or_else(|| pc.azure_tenant_id.clone());
            config.azure_client_id = flags
                .azure
                .client_id
                .clone()
                .or_else(|| env.get("AZURE_CLIENT_ID").map(str::to_string))
                .or_else(|| pc.azure_client_id.clone());
            config.azure_client_secret = env.get("AZURE_CLIENT_SECRET").map(str::to_string);
            require_username(config, "Azure Entra ID")?;
        }
        AuthMethod::AwsIam => {
            config.aws_region = flags
                .aws
                .region
                .clone()
                .or_else(|| env.first_of(&["AWS_REGION", "AWS_DEFAULT_REGION"]).map(str::to_string))
                .or_else(|| pc.aws_region.clone());
            if config.aws_region.is_none() {
                return Err(Error::Config(
                    "AWS IAM authentication requires a region; use --aws-region or set AWS_REGION".into(),
                ));
            }
            require_username(config, "AWS IAM")?;
        }
        AuthMethod::GoogleIam => {
            let instance = flags
                .google
                .instance
                .clone()
                .or_else(|| pc.google_instance.clone())
                .ok_or_else(|| {
                    Error::Config(
                        "Google Cloud SQL IAM authentication requires --google-instance project:region:instance".into(),
                    )
                })?;
            if instance.split(':').filter(|part| !part.is_empty()).count() != 3 {
                return Err(Error::Config(format!(
                    "invalid Google Cloud SQL instance '{}': expected project:region:instance",
                    instance
                )));
            }
            config.google_instance = Some(instance);
            require_username(config, "Google Cloud SQL IAM")?;
        }
    }
    Ok(())
}

fn require_username(config: &ConnectionConfig, method: &str) -> Result<(), Error> {
    if config.username.is_empty() {
        return Err(Error::Config(format!(
            "{} authentication requires a username",
            method
        )));
    }
    Ok(())
}

/// The database flag always wins; otherwise the connection's own database.
pub fn resolve_target_database(
    flag_database: &str,
    conn_database: &str,
    require_database: bool,
) -> Result<String, Error> {
    let target = if flag_database.is_empty() {
        conn_database
    } else {
        if !conn_database.is_empty() && conn_database != flag_database {
            debug!(
                "Using --database ({}) instead of connection database ({})",
                flag_database, conn_database
            );
        }
        flag_database
    };
    if require_database && target.is_empty() {
        return Err(Error::Config(
            "database name is required; provide it with --database/-d, in the connection string, or via PGDATABASE".into(),
        ));
    }
    Ok(target.to_string())
}

/// `CREATE DATABASE` cannot run against the database being created, so a
/// target taken from the connection string forces `postgres` for maintenance.
pub fn determine_maintenance_db(
    flag_database: &str,
    connection_string_database: &str,
    current: &str,
) -> String {
    if flag_database.is_empty()
        && !connection_string_database.is_empty()
        && connection_string_database != DEFAULT_MAINTENANCE_DB
    {
        DEFAULT_MAINTENANCE_DB.to_string()
    } else {
        current.to_string()
    }
}
