//! Classification and wording of connection failures.

use crate::error::Error;

const TRANSIENT_SQLSTATES: [&str; 13] = [
    "08000", "08003", "08006", "08001", "08004", // connection exceptions
    "53000", "53100", "53200", "53300", "53400", // insufficient resources
    "57P01", "57P02", "57P03", // admin/crash shutdown, cannot connect now
];

const TRANSIENT_PATTERNS: [&str; 12] = [
    "connection refused",
    "connection reset",
    "connection timeout",
    "connection failure",
    "no such host",
    "network is unreachable",
    "i/o timeout",
    "broken pipe",
    "too many connections",
    "server closed the connection",
    "unexpected eof",
    "timed out",
];

/// Worth another connect attempt.
pub fn is_transient(sqlstate: Option<&str>, message: &str) -> bool {
    if let Some(code) = sqlstate {
        if TRANSIENT_SQLSTATES.contains(&code) {
            return true;
        }
    }
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn is_transient_error(err: &tokio_postgres::Error) -> bool {
    let code = err.code().map(|c| c.code());
    is_transient(code, &full_message(err))
}

/// The error text including its source chain (io errors hide there).
pub fn full_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Wraps a failed connect with an actionable explanation.
pub fn connection_error(message: &str, host: &str, port: u16, database: &str) -> Error {
    let lower = message.to_lowercase();
    let addr = format!("{}:{}", host, port);

    if lower.contains("connection refused") || lower.contains("actively refused") {
        Error::Connection(format!(
            "connection refused to {addr}\n\nPossible causes:\n  - PostgreSQL is not running (check: pg_isready -h {host} -p {port})\n  - Wrong host or port\n  - Firewall blocking the connection\n\nOriginal error: {message}"
        ))
    } else if lower.contains("no such host")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
    {
        Error::Connection(format!(
            "cannot resolve host \"{host}\"\n\nPossible causes:\n  - Hostname is misspelled\n  - DNS is not configured or reachable\n  - Network connection issue\n\nOriginal error: {message}"
        ))
    } else if lower.contains("password authentication failed") {
        Error::Auth(format!(
            "password authentication failed for database \"{database}\"\n\nPossible causes:\n  - Wrong password (check $PGPASSWORD or ~/.pgpass)\n  - Wrong username\n  - User does not have access to the database\n\nOriginal error: {message}"
        ))
    } else if lower.contains("does not exist") {
        Error::Connection(format!(
            "database \"{database}\" does not exist\n\nTo create it:\n  createdb {database}\n\nOr use --overwrite to let pgmi create it.\n\nOriginal error: {message}"
        ))
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Error::Connection(format!(
            "connection timed out to {addr}\n\nPossible causes:\n  - Server is overloaded or unresponsive\n  - Network latency or packet loss\n  - Firewall silently dropping packets\n  - Wrong host/port (server not listening)\n\nOriginal error: {message}"
        ))
    } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
        Error::Connection(format!(
            "SSL/TLS connection error\n\nPossible causes:\n  - Server requires SSL but --sslmode is wrong\n  - Certificate verification failed (try --sslmode=require)\n  - Client certificates missing (check --sslcert, --sslkey)\n\nOriginal error: {message}"
        ))
    } else if lower.contains("too many connections") {
        Error::Connection(format!(
            "too many connections to database \"{database}\"\n\nPossible causes:\n  - Connection slots exhausted on server\n  - max_connections limit reached in postgresql.conf\n  - Stale connections from previous deployments\n\nTry: SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{database}';\n\nOriginal error: {message}"
        ))
    } else {
        Error::Connection(format!("failed to connect to database: {message}"))
    }
}
