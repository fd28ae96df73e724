//! Cloud IAM token acquisition. The token becomes the session password.

pub mod aws;
pub mod azure;
pub mod google;

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::connection::{AuthMethod, ConnectionConfig};
use crate::error::Error;

pub use aws::AwsTokenProvider;
pub use azure::AzureTokenProvider;
pub use google::GoogleTokenProvider;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub trait TokenProvider {
    fn name(&self) -> &'static str;

    fn token(&self) -> impl Future<Output = Result<String, Error>> + Send;
}

/// The cloud method selected for this invocation.
#[derive(Debug)]
pub enum CloudAuth {
    Azure(AzureTokenProvider),
    Aws(AwsTokenProvider),
    Google(GoogleTokenProvider),
}

impl CloudAuth {
    /// `None` for password authentication.
    pub fn for_config(config: &ConnectionConfig) -> Result<Option<Self>, Error> {
        let provider = match config.auth_method {
            AuthMethod::Standard => return Ok(None),
            AuthMethod::AzureEntraId => CloudAuth::Azure(AzureTokenProvider::new(
                config.azure_tenant_id.clone(),
                config.azure_client_id.clone(),
                config.azure_client_secret.clone(),
            )?),
            AuthMethod::AwsIam => CloudAuth::Aws(AwsTokenProvider::from_environment(
                &config.host,
                config.port,
                config.aws_region.as_deref().unwrap_or_default(),
                &config.username,
            )?),
            AuthMethod::GoogleIam => CloudAuth::Google(GoogleTokenProvider::new(
                config.google_instance.clone().unwrap_or_default(),
            )?),
        };
        Ok(Some(provider))
    }

    pub async fn token(&self) -> Result<String, Error> {
        match self {
            CloudAuth::Azure(p) => p.token().await,
            CloudAuth::Aws(p) => p.token().await,
            CloudAuth::Google(p) => p.token().await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CloudAuth::Azure(p) => p.name(),
            CloudAuth::Aws(p) => p.name(),
            CloudAuth::Google(p) => p.name(),
        }
    }
}

/// Replaces the password with a fresh token when a cloud method is selected.
/// For Google Cloud SQL without any configured host, the instance's primary
/// address is looked up first. An explicit host, `localhost` included, is kept.
pub async fn apply_cloud_auth(config: &mut ConnectionConfig) -> Result<(), Error> {
    let Some(auth) = CloudAuth::for_config(config)? else {
        return Ok(());
    };
    info!("Acquiring {} token", auth.name());
    let token = auth.token().await?;

    if let CloudAuth::Google(google) = &auth {
        if config.host.is_empty() {
            config.host = google.instance_address(&token).await?;
            debug!("Resolved Cloud SQL instance address {}", config.host);
        }
    }

    config.password = Some(token);
    Ok(())
}

pub(crate) fn http_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::Auth(format!("failed to build HTTP client: {}", e)))
}

/// Pulls `access_token` out of an OAuth token response body.
pub(crate) fn parse_token_response(body: &str) -> Result<String, Error> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| Error::Auth(format!("invalid token response: {}", e)))?;
    if let Some(error) = parsed.get("error").and_then(|v| v.as_str()) {
        let description = parsed
            .get("error_description")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        return Err(Error::Auth(format!("{}: {}", error, description)));
    }
    parsed
        .get("access_token")
        .and_then(|v| v.as_str())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Auth("no access_token in token response".into()))
}

/// Runs a cloud CLI and returns its trimmed stdout.
pub(crate) async fn run_cli(program: &str, args: &[&str]) -> Result<String, Error> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Auth(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(Error::Auth(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(Error::Auth(format!("{} returned an empty token", program)));
    }
    Ok(token)
}
