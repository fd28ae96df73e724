//! Server-level database operations, issued on the maintenance session.

use std::future::Future;

use tracing::{info, warn};

use super::{quote_identifier, Session};
use crate::cancel::CancelToken;
use crate::error::Error;

/// What the deploy pipeline needs from the server before it opens the target.
pub trait DatabaseAdmin {
    fn exists(&self, name: &str) -> impl Future<Output = Result<bool, Error>>;

    fn create(&self, name: &str) -> impl Future<Output = Result<(), Error>>;

    /// Drop and create, with other sessions disconnected first.
    fn recreate(&self, name: &str) -> impl Future<Output = Result<(), Error>>;
}

pub struct DatabaseManager<'a> {
    session: &'a Session,
    cancel: &'a CancelToken,
}

impl<'a> DatabaseManager<'a> {
    pub fn new(session: &'a Session, cancel: &'a CancelToken) -> Self {
        Self { session, cancel }
    }

    pub async fn drop(&self, name: &str) -> Result<(), Error> {
        warn!("Dropping database {}", name);
        self.session
            .batch_execute(
                &format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)),
                self.cancel,
            )
            .await
    }

    /// Disconnects every other backend attached to `name`. Returns how many were signalled.
    pub async fn terminate_connections(&self, name: &str) -> Result<u64, Error> {
        let rows = self
            .session
            .query(
                "SELECT pg_catalog.pg_terminate_backend(pid) \
                 FROM pg_catalog.pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_catalog.pg_backend_pid()",
                &[&name],
                self.cancel,
            )
            .await?;
        if !rows.is_empty() {
            info!("Terminated {} connection(s) to {}", rows.len(), name);
        }
        Ok(rows.len() as u64)
    }
}

impl DatabaseAdmin for DatabaseManager<'_> {
    async fn exists(&self, name: &str) -> Result<bool, Error> {
        let rows = self
            .session
            .query(
                "SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1",
                &[&name],
                self.cancel,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn create(&self, name: &str) -> Result<(), Error> {
        info!("Creating database {}", name);
        self.session
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(name)), self.cancel)
            .await
    }

    async fn recreate(&self, name: &str) -> Result<(), Error> {
        self.terminate_connections(name).await?;
        self.drop(name).await?;
        self.create(name).await
    }
}
