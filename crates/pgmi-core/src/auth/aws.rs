//! RDS IAM authentication tokens, presigned locally with SigV4.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use config::{Config, File as ConfigFile, FileFormat};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::TokenProvider;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "rds-db";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const EXPIRES_SECS: u32 = 900;

/// RFC 3986 unreserved characters stay literal.
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"****")
            .finish()
    }
}

impl AwsCredentials {
    /// Environment first, then the shared credentials file.
    pub fn load() -> Result<Self, Error> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        if let (Some(access_key_id), Some(secret_access_key)) =
            (env("AWS_ACCESS_KEY_ID"), env("AWS_SECRET_ACCESS_KEY"))
        {
            return Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: env("AWS_SESSION_TOKEN"),
            });
        }

        let path = env("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join("credentials")))
            .ok_or_else(|| Error::Auth("cannot locate AWS shared credentials file".into()))?;
        let profile = env("AWS_PROFILE").unwrap_or_else(|| "default".to_string());
        Self::from_shared_file(&path, &profile)
    }

    pub fn from_shared_file(path: &std::path::Path, profile: &str) -> Result<Self, Error> {
        debug!("Reading AWS profile '{}' from {}", profile, path.display());
        let settings = Config::builder()
            .add_source(ConfigFile::from(path).format(FileFormat::Ini).required(false))
            .build()
            .map_err(|e| Error::Auth(format!("cannot read {}: {}", path.display(), e)))?;
        let get = |key: &str| settings.get_string(&format!("{}.{}", profile, key)).ok();
        match (get("aws_access_key_id"), get("aws_secret_access_key")) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: get("aws_session_token"),
            }),
            _ => Err(Error::Auth(format!(
                "no AWS credentials found; set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or configure profile '{}' in {}",
                profile,
                path.display()
            ))),
        }
    }
}

#[derive(Debug)]
pub struct AwsTokenProvider {
    endpoint: String,
    region: String,
    username: String,
    credentials: AwsCredentials,
}

impl AwsTokenProvider {
    pub fn new(host: &str, port: u16, region: &str, username: &str, credentials: AwsCredentials) -> Self {
        Self {
            endpoint: format!("{}:{}", host, port),
            region: region.to_string(),
            username: username.to_string(),
            credentials,
        }
    }

    pub fn from_environment(host: &str, port: u16, region: &str, username: &str) -> Result<Self, Error> {
        Ok(Self::new(host, port, region, username, AwsCredentials::load()?))
    }

    /// Presigned `connect` URL (without scheme) valid for 15 minutes from `now`.
    pub fn presign(&self, now: DateTime<Utc>) -> Result<String, Error> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);

        let mut query = vec![
            ("Action".to_string(), "connect".to_string()),
            ("DBUser".to_string(), self.username.clone()),
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.credentials.access_key_id, scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), EXPIRES_SECS.to_string()),
        ];
        if let Some(token) = &self.credentials.session_token {
            query.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        query.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
        query.sort();

        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n/\n{}\nhost:{}\n\nhost\n{}",
            canonical_query,
            self.endpoint,
            hex::encode(Sha256::digest(b""))
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "{}/?{}&X-Amz-Signature={}",
            self.endpoint, canonical_query, signature
        ))
    }
}

impl TokenProvider for AwsTokenProvider {
    fn name(&self) -> &'static str {
        "AWS IAM"
    }

    async fn token(&self) -> Result<String, Error> {
        self.presign(Utc::now())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    fn provider(session_token: Option<&str>) -> AwsTokenProvider {
        AwsTokenProvider::new(
            "mydb.abc123.us-east-1.rds.amazonaws.com",
            5432,
            "us-east-1",
            "iam_user",
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
                session_token: session_token.map(str::to_string),
            },
        )
    }

    #[test]
    fn test_presign_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let token = provider(None).presign(now).unwrap();
        assert!(token.starts_with(
            "mydb.abc123.us-east-1.rds.amazonaws.com:5432/?Action=connect&DBUser=iam_user&X-Amz-Algorithm=AWS4-HMAC-SHA256"
        ));
        assert!(token.contains("X-Amz-Credential=AKIDEXAMPLE%2F20240301%2Fus-east-1%2Frds-db%2Faws4_request"));
        assert!(token.contains("X-Amz-Date=20240301T120000Z"));
        assert!(token.contains("X-Amz-Expires=900"));
        assert!(token.contains("X-Amz-SignedHeaders=host"));
        assert!(!token.contains("X-Amz-Security-Token"));

        let signature = token.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_presign_is_deterministic_per_instant() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap();
        let p = provider(Some("session/token+="));
        assert_eq!(p.presign(now).unwrap(), p.presign(now).unwrap());
        assert_ne!(p.presign(now).unwrap(), p.presign(later).unwrap());
        assert!(p
            .presign(now)
            .unwrap()
            .contains("X-Amz-Security-Token=session%2Ftoken%2B%3D"));
    }

    #[test]
    fn test_shared_credentials_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("credentials");
        fs::write(
            &path,
            "[default]\naws_access_key_id = AKIDDEFAULT\naws_secret_access_key = secret1\n\n[deploy]\naws_access_key_id = AKIDDEPLOY\naws_secret_access_key = secret2\naws_session_token = tok\n",
        )
        .unwrap();

        let creds = AwsCredentials::from_shared_file(&path, "deploy").unwrap();
        assert_eq!(creds.access_key_id, "AKIDDEPLOY");
        assert_eq!(creds.session_token.as_deref(), Some("tok"));
        assert!(AwsCredentials::from_shared_file(&path, "missing").is_err());
    }
}
