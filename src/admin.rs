//! ProxySQL admin interface access.
//!
//! The exporter only needs two capabilities from the admin database: run a
//! fixed query and return its rows as text, and check that the connection is
//! alive. [`AdminDb`] captures that; [`Connector`] opens new handles.
//! [`MySqlConnector`] is the production implementation on top of `sqlx`,
//! and [`crate::mock`] provides a scripted one for tests.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Connection, Executor, Row as _};
use tracing::debug;

use crate::config::{AdminAddress, AdminDsn};

/// Error type for admin interface access.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminError {
    /// Connection could not be opened or is no longer usable.
    ConnectionError(String),
    /// Query execution failed.
    QueryError(String),
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminError::ConnectionError(msg) => write!(f, "ProxySQL: {}", msg),
            AdminError::QueryError(msg) => write!(f, "ProxySQL query error: {}", msg),
        }
    }
}

impl std::error::Error for AdminError {}

/// One result row: ordered (column name, text value) pairs.
///
/// SQL NULL is represented as the empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    /// Builds a row from column names and values of equal length.
    pub fn from_columns<S: AsRef<str>, V: AsRef<str>>(names: &[S], values: &[V]) -> Self {
        Self {
            columns: names
                .iter()
                .zip(values)
                .map(|(n, v)| (n.as_ref().to_string(), v.as_ref().to_string()))
                .collect(),
        }
    }

    /// Value of the first column whose name matches ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Column at `index` as (name, value).
    pub fn column(&self, index: usize) -> Option<(&str, &str)> {
        self.columns
            .get(index)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Read-only queryable handle to the admin interface.
pub trait AdminDb: Send + Sync {
    /// Executes `sql` and returns all rows.
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, AdminError>>;

    /// Checks that the handle is still usable.
    fn ping(&self) -> BoxFuture<'_, Result<(), AdminError>>;
}

/// Opens admin handles.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AdminDb>, AdminError>>;
}

/// `sqlx` MySQL handle holding a single-connection pool.
pub struct MySqlAdmin {
    pool: MySqlPool,
}

impl AdminDb for MySqlAdmin {
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, AdminError>> {
        Box::pin(async move {
            // A plain &str runs over the text protocol; the admin interface
            // does not support prepared statements.
            let rows = (&self.pool)
                .fetch_all(sql)
                .await
                .map_err(|e| AdminError::QueryError(format_mysql_error(&e)))?;
            rows.iter().map(convert_row).collect()
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), AdminError>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| AdminError::ConnectionError(format_mysql_error(&e)))?;
            conn.ping()
                .await
                .map_err(|e| AdminError::ConnectionError(format_mysql_error(&e)))
        })
    }
}

fn convert_row(row: &MySqlRow) -> Result<Row, AdminError> {
    let mut columns = Vec::with_capacity(row.len());
    for column in row.columns() {
        let value: Option<String> = row
            .try_get_unchecked(column.ordinal())
            .map_err(|e| AdminError::QueryError(format_mysql_error(&e)))?;
        columns.push((column.name().to_string(), value.unwrap_or_default()));
    }
    Ok(Row::new(columns))
}

/// Opens [`MySqlAdmin`] handles from a parsed DSN.
pub struct MySqlConnector {
    dsn: AdminDsn,
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(dsn: AdminDsn, connect_timeout: Duration) -> Self {
        Self {
            dsn,
            connect_timeout,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new().username(&self.dsn.user);
        if let Some(ref password) = self.dsn.password {
            options = options.password(password);
        }
        options = match &self.dsn.address {
            AdminAddress::Tcp { host, port } => options.host(host).port(*port),
            AdminAddress::Socket(path) => options.socket(path),
        };
        if let Some(ref database) = self.dsn.database {
            options = options.database(database);
        }
        // The admin interface rejects session variable changes, so skip the
        // SET statements sqlx issues after the handshake.
        options
            .pipes_as_concat(false)
            .no_engine_substitution(false)
            .timezone(None::<String>)
            .set_names(false)
    }
}

impl Connector for MySqlConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AdminDb>, AdminError>> {
        Box::pin(async move {
            let pool = MySqlPoolOptions::new()
                .max_connections(1)
                .min_connections(0)
                .acquire_timeout(self.connect_timeout)
                .connect_with(self.connect_options())
                .await
                .map_err(|e| AdminError::ConnectionError(format_mysql_error(&e)))?;
            debug!(dsn = %self.dsn, "admin connection established");
            Ok(Arc::new(MySqlAdmin { pool }) as Arc<dyn AdminDb>)
        })
    }
}

/// Formats a MySQL error message for logs.
pub(crate) fn format_mysql_error(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db_error) => match db_error.code() {
            Some(code) => format!("{}: {}", code, db_error.message()),
            None => db_error.message().to_string(),
        },
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            "connection refused".to_string()
        }
        sqlx::Error::PoolTimedOut => "timed out waiting for a connection".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_ignores_case() {
        let row = Row::from_columns(&["hostgroup", "srv_host", "ConnUsed"], &["0", "db1", "7"]);
        assert_eq!(row.get("connused"), Some("7"));
        assert_eq!(row.get("SRV_HOST"), Some("db1"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.column(0), Some(("hostgroup", "0")));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_format_mysql_error() {
        let refused = sqlx::Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert_eq!(format_mysql_error(&refused), "connection refused");
        assert_eq!(
            format_mysql_error(&sqlx::Error::PoolTimedOut),
            "timed out waiting for a connection"
        );
    }

    #[test]
    fn test_admin_error_display() {
        let e = AdminError::QueryError("no such table: stats_mysql_global".to_string());
        assert_eq!(
            e.to_string(),
            "ProxySQL query error: no such table: stats_mysql_global"
        );
    }
}
