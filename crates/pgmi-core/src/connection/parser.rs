use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::Url;

use super::SslMode;
use crate::error::Error;

/// Fields present in a connection string. Absent fields stay `None` so the
/// resolver can fill them from lower-precedence sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: Option<SslMode>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_root_cert: Option<String>,
    pub application_name: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub extra_params: BTreeMap<String, String>,
}

/// Accepts `postgres://` / `postgresql://` URIs and `Key=Value;` strings.
pub fn parse_connection_string(input: &str) -> Result<ConnectionParams, Error> {
    let text = input.trim();
    if text.is_empty() {
        return Err(Error::Config("connection string is empty".into()));
    }
    let lower = text.to_lowercase();
    if lower.starts_with("postgresql://") || lower.starts_with("postgres://") {
        parse_uri(text)
    } else if text.contains('=') {
        parse_key_value(text)
    } else {
        Err(Error::Config(
            "unrecognized connection string format; expected postgresql://user@host:5432/db or Host=...;Database=...".into(),
        ))
    }
}

fn parse_uri(text: &str) -> Result<ConnectionParams, Error> {
    let url = Url::parse(text)
        .map_err(|err| Error::Config(format!("invalid connection string: {}", err)))?;
    let mut params = ConnectionParams::default();

    params.host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .map(|host| decode(host, "host"))
        .transpose()?;
    params.port = url
        .port()
        .map(|port| parse_port(&port.to_string()))
        .transpose()?;

    if !url.username().is_empty() {
        params.username = Some(decode(url.username(), "username")?);
    }
    if let Some(password) = url.password() {
        params.password = Some(decode(password, "password")?);
    }

    let path = url.path().trim_start_matches('/');
    if !path.is_empty() {
        params.database = Some(decode(path, "database")?);
    }

    for (key, value) in url.query_pairs() {
        apply_option(&mut params, &key, &value)?;
    }
    Ok(params)
}

fn parse_key_value(text: &str) -> Result<ConnectionParams, Error> {
    let mut params = ConnectionParams::default();
    for part in text.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once('=') else {
            return Err(Error::Config(format!(
                "invalid connection string segment '{}': expected Key=Value",
                part
            )));
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "host" | "server" | "data source" => match value.split_once(',') {
                Some((host, port)) => {
                    params.host = Some(host.trim().to_string());
                    params.port = Some(parse_port(port.trim())?);
                }
                None => params.host = Some(value.to_string()),
            },
            "port" => params.port = Some(parse_port(value)?),
            "database" | "initial catalog" => params.database = Some(value.to_string()),
            "username" | "user id" | "uid" | "user" => params.username = Some(value.to_string()),
            "password" | "pwd" => params.password = Some(value.to_string()),
            "ssl mode" => params.ssl_mode = Some(value.parse()?),
            "application name" => params.application_name = Some(value.to_string()),
            "timeout" | "connect timeout" => {
                params.connect_timeout = value.parse().ok().map(Duration::from_secs)
            }
            "ssl certificate" => params.ssl_cert = Some(value.to_string()),
            "ssl key" => params.ssl_key = Some(value.to_string()),
            "root certificate" => params.ssl_root_cert = Some(value.to_string()),
            _ => apply_option(&mut params, &key, value)?,
        }
    }
    Ok(params)
}

fn apply_option(params: &mut ConnectionParams, key: &str, value: &str) -> Result<(), Error> {
    match key.to_lowercase().as_str() {
        "sslmode" => params.ssl_mode = Some(value.parse()?),
        "application_name" | "applicationname" => {
            params.application_name = Some(value.to_string())
        }
        "connect_timeout" | "connecttimeout" => {
            params.connect_timeout = value.parse().ok().map(Duration::from_secs)
        }
        "sslcert" => params.ssl_cert = Some(value.to_string()),
        "sslkey" => params.ssl_key = Some(value.to_string()),
        "sslrootcert" => params.ssl_root_cert = Some(value.to_string()),
        "host" => params.host = Some(value.to_string()),
        "port" => params.port = Some(parse_port(value)?),
        "user" => params.username = Some(value.to_string()),
        "password" => params.password = Some(value.to_string()),
        "dbname" => params.database = Some(value.to_string()),
        _ => {
            params.extra_params.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

pub(crate) fn parse_port(value: &str) -> Result<u16, Error> {
    match value.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err(Error::Config(format!(
            "invalid port '{}': must be between 1 and 65535",
            value
        ))),
    }
}

fn decode(value: &str, field: &str) -> Result<String, Error> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::Config(format!("connection string {} is not valid UTF-8", field)))
}
