use tracing::{debug, warn};
use url::form_urlencoded;

use super::{http_client, parse_token_response, run_cli, TokenProvider};
use crate::error::Error;

const SCOPE: &str = "https://ossrdbms-aad.database.windows.net/.default";
const RESOURCE: &str = "https://ossrdbms-aad.database.windows.net";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Entra ID tokens for Azure Database for PostgreSQL.
///
/// With tenant, client id and secret a service-principal grant is used.
/// Otherwise managed identity is tried, then the Azure CLI.
#[derive(Debug)]
pub struct AzureTokenProvider {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl AzureTokenProvider {
    pub fn new(
        tenant_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            http: http_client()?,
        })
    }

    fn service_principal(&self) -> Option<(&str, &str, &str)> {
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(t), Some(c), Some(s)) => Some((t.as_str(), c.as_str(), s.as_str())),
            _ => None,
        }
    }

    async fn client_credentials(&self, tenant: &str, client: &str, secret: &str) -> Result<String, Error> {
        let url = format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant);
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", client)
            .append_pair("client_secret", secret)
            .append_pair("scope", SCOPE)
            .finish();
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Entra ID token request failed: {}", e)))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("failed to read Entra ID token response: {}", e)))?;
        parse_token_response(&text)
    }

    async fn managed_identity(&self) -> Result<String, Error> {
        let mut request = self
            .http
            .get(IMDS_ENDPOINT)
            .header("Metadata", "true")
            .query(&[("api-version", "2018-02-01"), ("resource", RESOURCE)]);
        if let Some(client) = &self.client_id {
            request = request.query(&[("client_id", client.as_str())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Auth(format!("managed identity endpoint unavailable: {}", e)))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Auth(format!("failed to read managed identity response: {}", e)))?;
        parse_token_response(&text)
    }
}

impl TokenProvider for AzureTokenProvider {
    fn name(&self) -> &'static str {
        "Azure Entra ID"
    }

    async fn token(&self) -> Result<String, Error> {
        if let Some((tenant, client, secret)) = self.service_principal() {
            debug!("Using service principal {} in tenant {}", client, tenant);
            return self.client_credentials(tenant, client, secret).await;
        }

        match self.managed_identity().await {
            Ok(token) => return Ok(token),
            Err(err) => debug!("Managed identity unavailable: {}", err),
        }

        run_cli(
            "az",
            &[
                "account",
                "get-access-token",
                "--resource",
                RESOURCE,
                "--query",
                "accessToken",
                "-o",
                "tsv",
            ],
        )
        .await
        .map_err(|err| {
            warn!("Azure CLI token acquisition failed");
            Error::Auth(format!(
                "no Azure credential available (service principal, managed identity, az login): {}",
                err
            ))
        })
    }
}
