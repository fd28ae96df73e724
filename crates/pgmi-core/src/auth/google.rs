use serde::Deserialize;
use tracing::debug;

use super::{http_client, parse_token_response, run_cli, TokenProvider};
use crate::error::Error;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SQLADMIN_URL: &str = "https://sqladmin.googleapis.com/sql/v1beta4";

/// Cloud SQL IAM database authentication.
#[derive(Debug)]
pub struct GoogleTokenProvider {
    /// `project:region:instance`
    instance: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectSettings {
    #[serde(default)]
    ip_addresses: Vec<IpMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpMapping {
    #[serde(rename = "type", default)]
    kind: String,
    ip_address: String,
}

impl GoogleTokenProvider {
    pub fn new(instance: String) -> Result<Self, Error> {
        Ok(Self {
            instance,
            http: http_client()?,
        })
    }

    async fn metadata_server(&self) -> Result<String, Error> {
        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Auth(format!("metadata server unavailable: {}", e)))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("failed to read metadata server response: {}", e)))?;
        parse_token_response(&text)
    }

    /// Primary IP of the instance from the Cloud SQL Admin API.
    pub async fn instance_address(&self, token: &str) -> Result<String, Error> {
        let (project, instance) = split_instance(&self.instance)?;
        let url = format!(
            "{}/projects/{}/instances/{}/connectSettings",
            SQLADMIN_URL, project, instance
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Cloud SQL Admin request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "Cloud SQL Admin API returned {} for instance {}",
                response.status(),
                self.instance
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| Error::Connection(format!("failed to read connectSettings: {}", e)))?;
        primary_address(&text)
    }
}

impl TokenProvider for GoogleTokenProvider {
    fn name(&self) -> &'static str {
        "Google Cloud SQL IAM"
    }

    async fn token(&self) -> Result<String, Error> {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.is_empty() {
                return Ok(token);
            }
        }
        match self.metadata_server().await {
            Ok(token) => return Ok(token),
            Err(err) => debug!("GCE metadata server unavailable: {}", err),
        }
        run_cli("gcloud", &["auth", "print-access-token"])
            .await
            .map_err(|err| {
                Error::Auth(format!(
                    "no Google credential available (GOOGLE_OAUTH_ACCESS_TOKEN, metadata server, gcloud): {}",
                    err
                ))
            })
    }
}

fn split_instance(name: &str) -> Result<(&str, &str), Error> {
    let parts: Vec<&str> = name.split(':').collect();
    match parts.as_slice() {
        [project, _region, instance] if !project.is_empty() && !instance.is_empty() => {
            Ok((*project, *instance))
        }
        _ => Err(Error::Config(format!(
            "invalid Google Cloud SQL instance '{}': expected project:region:instance",
            name
        ))),
    }
}

fn primary_address(body: &str) -> Result<String, Error> {
    let settings: ConnectSettings = serde_json::from_str(body)
        .map_err(|e| Error::Connection(format!("invalid connectSettings response: {}", e)))?;
    settings
        .ip_addresses
        .iter()
        .find(|ip| ip.kind == "PRIMARY")
        .or_else(|| settings.ip_addresses.first())
        .map(|ip| ip.ip_address.clone())
        .ok_or_else(|| Error::Connection("Cloud SQL instance has no IP address".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_instance() {
        assert_eq!(split_instance("proj:us-central1:db").unwrap(), ("proj", "db"));
        assert!(split_instance("proj:db").is_err());
        assert!(split_instance(":r:db").is_err());
    }

    #[test]
    fn test_primary_address() {
        let body = r#"{"kind":"sql#connectSettings","ipAddresses":[
            {"type":"PRIVATE","ipAddress":"10.0.0.3"},
            {"type":"PRIMARY","ipAddress":"34.1.2.3"}]}"#;
        assert_eq!(primary_address(body).unwrap(), "34.1.2.3");
        assert_eq!(
            primary_address(r#"{"ipAddresses":[{"type":"PRIVATE","ipAddress":"10.0.0.3"}]}"#).unwrap(),
            "10.0.0.3"
        );
        assert!(primary_address(r#"{"ipAddresses":[]}"#).is_err());
    }
}
