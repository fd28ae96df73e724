pub mod env;
pub mod parser;
pub mod pgpass;
pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::Error;

pub use env::EnvSnapshot;
pub use parser::{parse_connection_string, ConnectionParams};
pub use resolver::{
    determine_maintenance_db, resolve, resolve_target_database, AwsFlags, AzureFlags,
    ConnectionFlags, GoogleFlags, Resolution,
};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_MAINTENANCE_DB: &str = "postgres";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    Standard,
    AzureEntraId,
    AwsIam,
    GoogleIam,
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "standard" | "password" => Ok(AuthMethod::Standard),
            "azure" | "entra" | "azure-entra-id" => Ok(AuthMethod::AzureEntraId),
            "aws" | "aws-iam" => Ok(AuthMethod::AwsIam),
            "google" | "gcp" | "google-iam" => Ok(AuthMethod::GoogleIam),
            other => Err(Error::Config(format!(
                "unknown auth method '{}'; expected standard, azure, aws or google",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::Standard => "standard",
            AuthMethod::AzureEntraId => "azure",
            AuthMethod::AwsIam => "aws",
            AuthMethod::GoogleIam => "google",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    pub fn verifies_server(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

impl FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(Error::Config(format!(
                "invalid sslmode '{}'; expected disable, allow, prefer, require, verify-ca or verify-full",
                other
            ))),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved connection settings for one invocation.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Never taken from a CLI flag.
    pub password: Option<String>,
    pub database: String,
    pub ssl_mode: SslMode,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_root_cert: Option<String>,
    pub application_name: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub auth_method: AuthMethod,
    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    pub aws_region: Option<String>,
    pub google_instance: Option<String>,
    pub extra_params: BTreeMap<String, String>,
    /// Set when the password comes from the password file, which is keyed by
    /// database and so is consulted again for every database connected to.
    pub pgpass_file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Same server and credentials, different database.
    pub fn with_database(&self, database: &str) -> Self {
        let mut copy = self.clone();
        copy.database = database.to_string();
        if let Some(path) = &copy.pgpass_file {
            copy.password = pgpass::lookup(path, &copy.host, copy.port, database, &copy.username);
        }
        copy
    }

    /// Display form with the password masked.
    pub fn redacted(&self) -> String {
        let mut shown = self.clone();
        if shown.password.is_some() {
            shown.password = Some("****".into());
        }
        build_connection_string(&shown)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

/// Renders a `postgresql://` URI. The password is percent-encoded.
pub fn build_connection_string(config: &ConnectionConfig) -> String {
    let fallback = format!("postgresql://{}:{}/{}", config.host, config.port, config.database);
    let mut url = match Url::parse("postgresql://localhost") {
        Ok(url) => url,
        Err(_) => return fallback,
    };
    if url.set_host(Some(&config.host)).is_err() {
        return fallback;
    }
    let _ = url.set_port(Some(config.port));
    if !config.username.is_empty() {
        let _ = url.set_username(&config.username);
    }
    if let Some(password) = &config.password {
        let _ = url.set_password(Some(password));
    }
    url.set_path(&format!("/{}", config.database));

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("sslmode", config.ssl_mode.as_str());
        if let Some(name) = &config.application_name {
            query.append_pair("application_name", name);
        }
        if let Some(timeout) = config.connect_timeout {
            query.append_pair("connect_timeout", &timeout.as_secs().to_string());
        }
        for (key, value) in [
            ("sslcert", &config.ssl_cert),
            ("sslkey", &config.ssl_key),
            ("sslrootcert", &config.ssl_root_cert),
        ] {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
        for (key, value) in &config.extra_params {
            query.append_pair(key, value);
        }
    }
    url.to_string()
}
