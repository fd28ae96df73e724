use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{AsyncMessage, Client, Config, Socket};
use tracing::{debug, error, info, warn};

use super::errors::{connection_error, full_message, is_transient_error};
use super::{Notice, Session, Tls};
use crate::auth;
use crate::cancel::{cancelled_error, CancelToken};
use crate::connection::{ConnectionConfig, SslMode};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (1-based `attempt`).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Opens sessions. Connect failures that look transient are retried; SQL never is.
#[derive(Debug, Clone)]
pub struct Connector {
    config: ConnectionConfig,
    policy: RetryPolicy,
}

impl Connector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connector for another database on the same server.
    pub fn for_database(&self, database: &str) -> Self {
        Self {
            config: self.config.with_database(database),
            policy: self.policy,
        }
    }

    pub async fn connect(&self, cancel: &CancelToken) -> Result<Session, Error> {
        let mut config = self.config.clone();
        cancel.run(auth::apply_cloud_auth(&mut config)).await?;
        let tls = Tls::for_config(&config)?;
        let pg = pg_config(&config);

        info!(
            "Connecting to {}:{}/{}",
            config.host, config.port, config.database
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                reason = cancel.cancelled() => return Err(cancelled_error(reason)),
                result = open_with(&pg, &tls) => result,
            };

            let err = match outcome {
                Ok((client, notices, driver)) => {
                    debug!("Connected on attempt {}", attempt);
                    return Ok(Session::new(
                        client,
                        tls,
                        notices,
                        driver,
                        config.database.clone(),
                    ));
                }
                Err(err) => err,
            };

            let message = full_message(&err);
            if is_transient_error(&err) && attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                warn!(
                    "Connection attempt {} failed ({}); retrying in {:?}",
                    attempt, message, delay
                );
                tokio::select! {
                    biased;
                    reason = cancel.cancelled() => return Err(cancelled_error(reason)),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
            return Err(connection_error(
                &message,
                &config.host,
                config.port,
                &config.database,
            ));
        }
    }
}

fn pg_config(config: &ConnectionConfig) -> Config {
    let mut pg = Config::new();
    pg.host(&config.host)
        .port(config.port)
        .user(&config.username)
        .dbname(&config.database)
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow | SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
        });
    if let Some(password) = &config.password {
        pg.password(password);
    }
    if let Some(name) = &config.application_name {
        pg.application_name(name);
    }
    if let Some(timeout) = config.connect_timeout {
        pg.connect_timeout(timeout);
    }
    pg
}

type Opened = (Client, mpsc::UnboundedReceiver<Notice>, JoinHandle<()>);

async fn open_with(pg: &Config, tls: &Tls) -> Result<Opened, tokio_postgres::Error> {
    match tls {
        Tls::Plain(t) => open(pg, *t).await,
        Tls::Rustls(t) => open(pg, t.clone()).await,
    }
}

/// Connects and spawns the driver task that forwards notices.
async fn open<T>(pg: &Config, tls: T) -> Result<Opened, tokio_postgres::Error>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, mut connection) = pg.connect(tls).await?;
    let (tx, rx) = mpsc::unbounded_channel();

    let driver = tokio::spawn(async move {
        let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notice(notice)) => {
                    let _ = tx.send(Notice {
                        severity: notice.severity().to_string(),
                        message: notice.message().to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Database connection error: {}", e);
                    break;
                }
            }
        }
    });

    Ok((client, rx, driver))
}
