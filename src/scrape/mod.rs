//! Table scrapers.
//!
//! One scraper per admin table group:
//! - `stats_mysql_global` - global status counters
//! - `stats_mysql_connection_pool` - per-backend pool statistics
//! - `stats_mysql_processlist` - client/server hosts of active sessions
//!
//! A scraper runs its fixed query under a timeout, fetches every row, then
//! maps fields through the group's registry and sends samples to the output
//! channel. A failed query emits nothing for the group. Field-level problems
//! skip only that field (or row) and are returned in the [`ScrapeSummary`].

mod global;
mod pool;
mod processlist;
pub mod queries;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::admin::{AdminDb, Row};
use crate::coerce::CoerceError;
use crate::registry::{Entry, MetricDescriptor, TableGroup, TableRegistry};
use crate::sample::MetricSample;

pub use queries::{CONNECTION_LIST_QUERY, CONNECTION_POOL_QUERY, GLOBAL_STATUS_QUERY};

/// Error type for a failed table group.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// The admin query failed.
    QueryError { group: TableGroup, message: String },
    /// The admin query did not finish within the query timeout.
    Timeout { group: TableGroup, after: Duration },
    /// The output channel was closed before all samples were sent.
    Closed(TableGroup),
    /// The scraper task panicked.
    Panicked { group: TableGroup, message: String },
}

impl ScrapeError {
    pub fn group(&self) -> TableGroup {
        match self {
            ScrapeError::QueryError { group, .. }
            | ScrapeError::Timeout { group, .. }
            | ScrapeError::Closed(group)
            | ScrapeError::Panicked { group, .. } => *group,
        }
    }
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::QueryError { group, message } => {
                write!(f, "{}: query failed: {}", group, message)
            }
            ScrapeError::Timeout { group, after } => {
                write!(f, "{}: query timed out after {:?}", group, after)
            }
            ScrapeError::Closed(group) => write!(f, "{}: sample stream closed", group),
            ScrapeError::Panicked { group, message } => {
                write!(f, "{}: scraper panicked: {}", group, message)
            }
        }
    }
}

impl std::error::Error for ScrapeError {}

/// A skipped field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Value could not be coerced.
    Coerce(CoerceError),
    /// Field hit a registration without a descriptor. For connection pool
    /// rows the whole row is skipped.
    Placeholder { field: String },
    /// A column required to build labels is absent; the row is skipped.
    MissingField { field: String },
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::Coerce(e) => write!(f, "{}", e),
            FieldError::Placeholder { field } => {
                write!(f, "field {} is registered without a descriptor", field)
            }
            FieldError::MissingField { field } => write!(f, "row has no {} column", field),
        }
    }
}

impl std::error::Error for FieldError {}

impl From<CoerceError> for FieldError {
    fn from(e: CoerceError) -> Self {
        FieldError::Coerce(e)
    }
}

/// Outcome of a successful scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeSummary {
    pub group: TableGroup,
    pub rows: usize,
    pub samples: usize,
    pub field_errors: Vec<FieldError>,
}

/// Scrapes one table group into `out`.
pub async fn scrape(
    group: TableGroup,
    db: &dyn AdminDb,
    registry: &TableRegistry,
    timeout: Duration,
    out: &mpsc::Sender<MetricSample>,
) -> Result<ScrapeSummary, ScrapeError> {
    let started = Instant::now();
    let mut emitter = Emitter::new(group, out);

    match group {
        TableGroup::GlobalStatus => {
            let rows = fetch(db, group, GLOBAL_STATUS_QUERY, timeout).await?;
            global::scrape_global_status(&rows, registry, &mut emitter).await?;
        }
        TableGroup::ConnectionPool => {
            let rows = fetch(db, group, CONNECTION_POOL_QUERY, timeout).await?;
            pool::scrape_connection_pool(&rows, registry, &mut emitter).await?;
        }
        TableGroup::ConnectionList => {
            let rows = fetch(db, group, CONNECTION_LIST_QUERY, timeout).await?;
            processlist::scrape_connection_list(&rows, registry, &mut emitter).await?;
        }
    }

    let summary = emitter.finish();
    debug!(
        collector = %group,
        rows = summary.rows,
        samples = summary.samples,
        field_errors = summary.field_errors.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "scrape finished"
    );
    Ok(summary)
}

/// Runs `query` under `timeout`.
async fn fetch(
    db: &dyn AdminDb,
    group: TableGroup,
    query: &str,
    timeout: Duration,
) -> Result<Vec<Row>, ScrapeError> {
    match tokio::time::timeout(timeout, db.query(query)).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => Err(ScrapeError::QueryError {
            group,
            message: e.to_string(),
        }),
        Err(_) => Err(ScrapeError::Timeout {
            group,
            after: timeout,
        }),
    }
}

/// Sends samples for one group and tracks what was emitted or skipped.
pub(crate) struct Emitter<'a> {
    out: &'a mpsc::Sender<MetricSample>,
    summary: ScrapeSummary,
}

impl<'a> Emitter<'a> {
    fn new(group: TableGroup, out: &'a mpsc::Sender<MetricSample>) -> Self {
        Self {
            out,
            summary: ScrapeSummary {
                group,
                rows: 0,
                samples: 0,
                field_errors: Vec::new(),
            },
        }
    }

    pub(crate) async fn emit(&mut self, sample: MetricSample) -> Result<(), ScrapeError> {
        self.out
            .send(sample)
            .await
            .map_err(|_| ScrapeError::Closed(self.summary.group))?;
        self.summary.samples += 1;
        Ok(())
    }

    pub(crate) fn row(&mut self) {
        self.summary.rows += 1;
    }

    pub(crate) fn skip(&mut self, error: FieldError) {
        warn!(collector = %self.summary.group, error = %error, "skipping field");
        self.summary.field_errors.push(error);
    }

    fn finish(self) -> ScrapeSummary {
        self.summary
    }
}

/// Resolves a column to its descriptor. Unregistered columns give `Ok(None)`;
/// a placeholder registration is an error.
pub(crate) fn resolve(
    registry: &TableRegistry,
    field: &str,
) -> Result<Option<Arc<MetricDescriptor>>, FieldError> {
    match registry.lookup(field) {
        None => Ok(None),
        Some(Entry::Metric(d)) => Ok(Some(Arc::clone(d))),
        Some(Entry::Placeholder) => Err(FieldError::Placeholder {
            field: field.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Runs one scraper against `db` and collects what it sent.
    pub(crate) async fn run(
        group: TableGroup,
        db: &dyn AdminDb,
        registry: &TableRegistry,
    ) -> (Result<ScrapeSummary, ScrapeError>, Vec<MetricSample>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let result = scrape(group, db, registry, Duration::from_secs(5), &tx).await;
        drop(tx);
        let mut samples = Vec::new();
        while let Some(s) = rx.recv().await {
            samples.push(s);
        }
        (result, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::run;
    use super::*;
    use crate::mock::MockAdmin;
    use crate::registry::Registries;

    #[tokio::test]
    async fn test_query_error_emits_nothing() {
        let db = MockAdmin::new().with_error(GLOBAL_STATUS_QUERY, "an error");
        let registries = Registries::proxysql();
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;
        assert_eq!(
            result,
            Err(ScrapeError::QueryError {
                group: TableGroup::GlobalStatus,
                message: "ProxySQL query error: an error".to_string(),
            })
        );
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let db = MockAdmin::new().with_delay(CONNECTION_POOL_QUERY, Duration::from_secs(60));
        let registries = Registries::proxysql();
        let (tx, _rx) = mpsc::channel(16);
        let result = scrape(
            TableGroup::ConnectionPool,
            &db,
            &registries.connection_pool,
            Duration::from_millis(20),
            &tx,
        )
        .await;
        assert!(matches!(result, Err(ScrapeError::Timeout { .. })));
        assert_eq!(result.unwrap_err().group(), TableGroup::ConnectionPool);
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let db = MockAdmin::new().with_rows(
            GLOBAL_STATUS_QUERY,
            &["Variable_Name", "Variable_Value"],
            &[&["Questions", "10"]],
        );
        let registries = Registries::proxysql();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let result = scrape(
            TableGroup::GlobalStatus,
            &db,
            &registries.global_status,
            Duration::from_secs(5),
            &tx,
        )
        .await;
        assert_eq!(result, Err(ScrapeError::Closed(TableGroup::GlobalStatus)));
    }

    #[tokio::test]
    async fn test_each_group_runs_its_own_query() {
        let db = MockAdmin::new()
            .with_rows(GLOBAL_STATUS_QUERY, &["Variable_Name", "Variable_Value"], &[])
            .with_rows(CONNECTION_POOL_QUERY, &["hostgroup"], &[])
            .with_rows(CONNECTION_LIST_QUERY, &["cli_host", "srv_host"], &[]);
        let registries = Registries::proxysql();
        for group in TableGroup::ALL {
            let (result, samples) = run(group, &db, registries.get(group)).await;
            assert!(result.is_ok());
            assert!(samples.is_empty());
        }
        assert_eq!(
            db.executed(),
            vec![
                GLOBAL_STATUS_QUERY.to_string(),
                CONNECTION_POOL_QUERY.to_string(),
                CONNECTION_LIST_QUERY.to_string(),
            ]
        );
    }
}
