use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerName};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use crate::connection::{ConnectionConfig, SslMode};
use crate::error::Error;

/// Transport for a session and for its cancel requests.
#[derive(Clone)]
pub enum Tls {
    Plain(NoTls),
    Rustls(MakeRustlsConnect),
}

impl Tls {
    pub fn for_config(config: &ConnectionConfig) -> Result<Self, Error> {
        if config.ssl_mode == SslMode::Disable {
            return Ok(Tls::Plain(NoTls));
        }
        Ok(Tls::Rustls(MakeRustlsConnect::new(client_config(config)?)))
    }
}

fn client_config(config: &ConnectionConfig) -> Result<ClientConfig, Error> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let root_path = config
        .ssl_root_cert
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| {
            if config.ssl_mode.verifies_server() {
                dirs::home_dir().map(|home| home.join(".postgresql").join("root.crt"))
            } else {
                None
            }
        });

    let verifier: Arc<dyn ServerCertVerifier> = match root_path {
        Some(path) => {
            debug!("Verifying server certificate against {}", path.display());
            let mut roots = RootCertStore::empty();
            for cert in load_certs(&path)? {
                roots
                    .add(&cert)
                    .map_err(|e| tls_error(&path, &e.to_string()))?;
            }
            Arc::new(WebPkiVerifier::new(roots, None))
        }
        None => Arc::new(AcceptAnyServerCert),
    };
    let builder = builder.with_custom_certificate_verifier(verifier);

    match (&config.ssl_cert, &config.ssl_key) {
        (Some(cert), Some(key)) => {
            let certs = load_certs(Path::new(cert))?;
            let key = load_key(Path::new(key))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))
        }
        (Some(_), None) | (None, Some(_)) => Err(Error::Config(
            "client certificate authentication needs both sslcert and sslkey".into(),
        )),
        (None, None) => Ok(builder.with_no_client_auth()),
    }
}

/// Encrypts without authenticating the server (`allow`, `prefer`, `require`).
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path).map_err(|e| tls_error(path, &e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| tls_error(path, &e.to_string()))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found"));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, Error> {
    let file = File::open(path).map_err(|e| tls_error(path, &e.to_string()))?;
    let items = rustls_pemfile::read_all(&mut BufReader::new(file))
        .map_err(|e| tls_error(path, &e.to_string()))?;
    for item in items {
        match item {
            rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::ECKey(key) => return Ok(PrivateKey(key)),
            _ => continue,
        }
    }
    Err(tls_error(path, "no private key found"))
}

fn tls_error(path: &Path, reason: &str) -> Error {
    Error::Config(format!("cannot load TLS material from {}: {}", path.display(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_disable_uses_plain_transport() {
        let config = ConnectionConfig {
            ssl_mode: SslMode::Disable,
            ..Default::default()
        };
        assert!(matches!(Tls::for_config(&config).unwrap(), Tls::Plain(_)));
    }

    #[test]
    fn test_require_without_root_cert() {
        let config = ConnectionConfig {
            ssl_mode: SslMode::Require,
            ..Default::default()
        };
        assert!(matches!(Tls::for_config(&config).unwrap(), Tls::Rustls(_)));
    }

    #[test]
    fn test_missing_root_cert_is_config_error() {
        let tmp = tempdir().unwrap();
        let config = ConnectionConfig {
            ssl_mode: SslMode::VerifyFull,
            ssl_root_cert: Some(tmp.path().join("absent.crt").display().to_string()),
            ..Default::default()
        };
        assert!(matches!(Tls::for_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let tmp = tempdir().unwrap();
        let cert = tmp.path().join("client.crt");
        fs::write(&cert, "not a pem").unwrap();
        let config = ConnectionConfig {
            ssl_mode: SslMode::Require,
            ssl_cert: Some(cert.display().to_string()),
            ..Default::default()
        };
        assert!(Tls::for_config(&config).is_err());
    }
}
