pub mod connector;
pub mod errors;
pub mod manager;
pub mod tls;

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};
use tracing::{debug, warn};

use crate::cancel::{cancelled_error, CancelToken};
use crate::error::Error;

pub use connector::{Connector, RetryPolicy};
pub use manager::{DatabaseAdmin, DatabaseManager};
pub use tls::Tls;

/// A server notice (`RAISE NOTICE`, warnings, debug output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: String,
    pub message: String,
}

/// One open database connection. Every call races the cancel token; a
/// cancelled call sends a protocol cancel request to the server.
pub struct Session {
    client: Client,
    tls: Tls,
    notices: mpsc::UnboundedReceiver<Notice>,
    driver: JoinHandle<()>,
    database: String,
}

impl Session {
    pub(crate) fn new(
        client: Client,
        tls: Tls,
        notices: mpsc::UnboundedReceiver<Notice>,
        driver: JoinHandle<()>,
        database: String,
    ) -> Self {
        Self {
            client,
            tls,
            notices,
            driver,
            database,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn batch_execute(&self, sql: &str, cancel: &CancelToken) -> Result<(), Error> {
        self.guarded(cancel, self.client.batch_execute(sql)).await
    }

    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        cancel: &CancelToken,
    ) -> Result<u64, Error> {
        self.guarded(cancel, self.client.execute(sql, params)).await
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        cancel: &CancelToken,
    ) -> Result<Vec<Row>, Error> {
        self.guarded(cancel, self.client.query(sql, params)).await
    }

    /// Notices received so far, in arrival order.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            drained.push(notice);
        }
        drained
    }

    async fn guarded<F, T>(&self, cancel: &CancelToken, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        tokio::select! {
            biased;
            reason = cancel.cancelled() => {
                self.send_cancel().await;
                Err(cancelled_error(reason))
            }
            result = work => result.map_err(|e| Error::Execution(describe_db_error(&e))),
        }
    }

    async fn send_cancel(&self) {
        debug!("Sending cancel request to the server");
        let token = self.client.cancel_token();
        let result = match &self.tls {
            Tls::Plain(tls) => token.cancel_query(*tls).await,
            Tls::Rustls(tls) => token.cancel_query(tls.clone()).await,
        };
        if let Err(err) = result {
            warn!("Cancel request failed: {}", err);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Server error text with SQLSTATE, detail, hint and position preserved.
pub fn describe_db_error(err: &tokio_postgres::Error) -> String {
    let Some(db) = err.as_db_error() else {
        return errors::full_message(err);
    };
    let mut text = format!(
        "{}: {} (SQLSTATE {})",
        db.severity(),
        db.message(),
        db.code().code()
    );
    if let Some(detail) = db.detail() {
        text.push_str(&format!("\nDETAIL: {}", detail));
    }
    if let Some(hint) = db.hint() {
        text.push_str(&format!("\nHINT: {}", hint));
    }
    if let Some(position) = db.position() {
        let pos = match position {
            tokio_postgres::error::ErrorPosition::Original(p) => *p,
            tokio_postgres::error::ErrorPosition::Internal { position, .. } => *position,
        };
        text.push_str(&format!("\nPOSITION: {}", pos));
    }
    if let Some(context) = db.where_() {
        text.push_str(&format!("\nCONTEXT: {}", context));
    }
    text
}

/// `"name"` with embedded quotes doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `'text'` with embedded quotes doubled.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
