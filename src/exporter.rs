//! Exporter: the pull-model entry point.
//!
//! [`Exporter::describe`] lists every metric family the exporter may produce
//! without touching the database. [`Exporter::collect`] runs one scrape
//! cycle: it obtains the admin handle, runs every enabled table scraper
//! concurrently and merges their samples from a bounded channel in arrival
//! order. A failing scraper costs only its own group's samples.
//!
//! The admin handle is opened lazily, cached between cycles and pinged at
//! the start of each cycle. A handle that fails the ping is dropped and a new
//! one opened; if that fails too, the cycle ends with zero samples.

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::admin::{AdminDb, AdminError, Connector};
use crate::registry::{MetricDescriptor, MetricKind, Registries, RegistryError, TableGroup};
use crate::sample::MetricSample;
use crate::scrape::{self, FieldError, ScrapeError};

pub const SCRAPES_TOTAL: &str = "proxysql_exporter_scrapes_total";
pub const SCRAPE_ERRORS_TOTAL: &str = "proxysql_exporter_scrape_errors_total";
pub const LAST_SCRAPE_ERROR: &str = "proxysql_exporter_last_scrape_error";
pub const LAST_SCRAPE_DURATION: &str = "proxysql_exporter_last_scrape_duration_seconds";
pub const UP: &str = "proxysql_up";

/// Default timeout for each admin query and for opening the handle.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Exporter settings.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Table groups scraped on every cycle.
    pub targets: Vec<TableGroup>,
    pub query_timeout: Duration,
    /// Capacity of the sample channel shared by the scrapers.
    pub channel_capacity: usize,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            targets: TableGroup::ALL.to_vec(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            channel_capacity: 64,
        }
    }
}

/// A problem encountered during one collect cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// No usable admin handle; the cycle produced no samples.
    Connection(AdminError),
    /// One table group failed and contributed no samples.
    Scrape(ScrapeError),
    /// One field (or row) of a table group was skipped.
    Field { group: TableGroup, error: FieldError },
}

impl CollectError {
    /// True for errors that cost a whole group or the whole cycle.
    pub fn is_fatal_for_group(&self) -> bool {
        !matches!(self, CollectError::Field { .. })
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Connection(e) => write!(f, "{}", e),
            CollectError::Scrape(e) => write!(f, "{}", e),
            CollectError::Field { group, error } => write!(f, "{}: {}", group, error),
        }
    }
}

impl std::error::Error for CollectError {}

/// Output of one collect cycle.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Samples in arrival order.
    pub samples: Vec<MetricSample>,
    pub errors: Vec<CollectError>,
    /// Self-monitoring samples as of the end of this cycle.
    pub self_samples: Vec<MetricSample>,
}

#[derive(Debug, Default)]
struct ScrapeStats {
    scrapes: u64,
    errors: BTreeMap<TableGroup, u64>,
    last_error: bool,
    last_duration: Duration,
    up: bool,
}

struct SelfDescriptors {
    scrapes_total: Arc<MetricDescriptor>,
    scrape_errors_total: Arc<MetricDescriptor>,
    last_scrape_error: Arc<MetricDescriptor>,
    last_scrape_duration: Arc<MetricDescriptor>,
    up: Arc<MetricDescriptor>,
}

impl SelfDescriptors {
    fn new() -> Self {
        let d = |name: &str, kind, help: &str| Arc::new(MetricDescriptor::new(name, kind, help));
        Self {
            scrapes_total: d(
                SCRAPES_TOTAL,
                MetricKind::Counter,
                "Total number of times ProxySQL was scraped for metrics.",
            ),
            scrape_errors_total: Arc::new(
                MetricDescriptor::new(
                    SCRAPE_ERRORS_TOTAL,
                    MetricKind::Counter,
                    "Total number of times an error occurred scraping a ProxySQL.",
                )
                .with_labels(&["collector"]),
            ),
            last_scrape_error: d(
                LAST_SCRAPE_ERROR,
                MetricKind::Gauge,
                "Whether the last scrape of metrics from ProxySQL resulted in an error (1 for error, 0 for success).",
            ),
            last_scrape_duration: d(
                LAST_SCRAPE_DURATION,
                MetricKind::Gauge,
                "Duration of the last scrape of metrics from ProxySQL.",
            ),
            up: d(UP, MetricKind::Gauge, "Whether the ProxySQL admin interface is up."),
        }
    }

    fn all(&self) -> [&Arc<MetricDescriptor>; 5] {
        [
            &self.scrapes_total,
            &self.scrape_errors_total,
            &self.last_scrape_error,
            &self.last_scrape_duration,
            &self.up,
        ]
    }
}

/// Scrapes a ProxySQL admin interface on demand.
pub struct Exporter {
    connector: Arc<dyn Connector>,
    registries: Arc<Registries>,
    options: ExporterOptions,
    handle: tokio::sync::Mutex<Option<Arc<dyn AdminDb>>>,
    stats: Mutex<ScrapeStats>,
    self_descriptors: SelfDescriptors,
}

impl Exporter {
    /// Creates an exporter. Fails if the registries break naming rules or
    /// register one metric name with conflicting metadata.
    pub fn new(
        connector: Arc<dyn Connector>,
        registries: Registries,
        options: ExporterOptions,
    ) -> Result<Self, RegistryError> {
        registries.validate()?;
        Ok(Self {
            connector,
            registries: Arc::new(registries),
            options,
            handle: tokio::sync::Mutex::new(None),
            stats: Mutex::new(ScrapeStats::default()),
            self_descriptors: SelfDescriptors::new(),
        })
    }

    pub fn options(&self) -> &ExporterOptions {
        &self.options
    }

    /// Every descriptor the exporter may emit, deduplicated by name.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut out = self.registries.descriptors();
        let mut names: HashSet<String> = out.iter().map(|d| d.name.clone()).collect();
        for d in self.self_descriptors.all() {
            if names.insert(d.name.clone()) {
                out.push(Arc::clone(d));
            }
        }
        out
    }

    /// Runs one scrape cycle.
    pub async fn collect(&self) -> Collection {
        let started = Instant::now();
        let mut collection = Collection::default();

        let db = match self.ensure_connected().await {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, "cannot reach ProxySQL admin interface");
                collection.errors.push(CollectError::Connection(e));
                collection.self_samples = self.record(started, false, &collection.errors);
                return collection;
            }
        };

        let (tx, mut rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let mut tasks = Vec::with_capacity(self.options.targets.len());
        for &group in &self.options.targets {
            let db = Arc::clone(&db);
            let registries = Arc::clone(&self.registries);
            let tx = tx.clone();
            let timeout = self.options.query_timeout;
            let task = tokio::spawn(async move {
                let scraped = AssertUnwindSafe(scrape::scrape(
                    group,
                    db.as_ref(),
                    registries.get(group),
                    timeout,
                    &tx,
                ))
                .catch_unwind()
                .await;
                scraped.unwrap_or_else(|payload| {
                    Err(ScrapeError::Panicked {
                        group,
                        message: panic_message(payload.as_ref()),
                    })
                })
            });
            tasks.push((group, task));
        }
        drop(tx);

        while let Some(sample) = rx.recv().await {
            collection.samples.push(sample);
        }

        for (group, task) in tasks {
            let result = task.await.unwrap_or_else(|e| {
                Err(ScrapeError::Panicked {
                    group,
                    message: e.to_string(),
                })
            });
            match result {
                Ok(summary) => {
                    collection.errors.extend(
                        summary
                            .field_errors
                            .into_iter()
                            .map(|error| CollectError::Field { group, error }),
                    );
                }
                Err(e) => {
                    error!(collector = %group, error = %e, "scrape failed");
                    collection.errors.push(CollectError::Scrape(e));
                }
            }
        }

        collection.self_samples = self.record(started, true, &collection.errors);
        debug!(
            samples = collection.samples.len(),
            errors = collection.errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "collect finished"
        );
        collection
    }

    /// Self-monitoring samples reflecting the most recent collect cycle.
    pub fn self_samples(&self) -> Vec<MetricSample> {
        self.stats_samples(&lock(&self.stats))
    }

    fn stats_samples(&self, stats: &ScrapeStats) -> Vec<MetricSample> {
        let d = &self.self_descriptors;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let mut out = vec![MetricSample::unlabeled(
            Arc::clone(&d.scrapes_total),
            stats.scrapes as f64,
        )];
        for &group in &self.options.targets {
            let count = stats.errors.get(&group).copied().unwrap_or(0);
            out.push(MetricSample::new(
                Arc::clone(&d.scrape_errors_total),
                BTreeMap::from([("collector".to_string(), group.collector_name().to_string())]),
                count as f64,
            ));
        }
        out.push(MetricSample::unlabeled(
            Arc::clone(&d.last_scrape_error),
            flag(stats.last_error),
        ));
        out.push(MetricSample::unlabeled(
            Arc::clone(&d.last_scrape_duration),
            stats.last_duration.as_secs_f64(),
        ));
        out.push(MetricSample::unlabeled(Arc::clone(&d.up), flag(stats.up)));
        out
    }

    /// Returns the cached handle if it still answers a ping, otherwise opens
    /// a new one.
    async fn ensure_connected(&self) -> Result<Arc<dyn AdminDb>, AdminError> {
        let timeout = self.options.query_timeout;
        let mut handle = self.handle.lock().await;

        if let Some(db) = handle.as_ref() {
            match tokio::time::timeout(timeout, db.ping()).await {
                Ok(Ok(())) => return Ok(Arc::clone(db)),
                Ok(Err(e)) => warn!(error = %e, "admin connection lost, reconnecting"),
                Err(_) => warn!(timeout = ?timeout, "admin ping timed out, reconnecting"),
            }
            *handle = None;
        }

        let db = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| {
                AdminError::ConnectionError(format!("connect timed out after {:?}", timeout))
            })??;
        info!("connected to ProxySQL admin interface");
        *handle = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Updates the counters and snapshots them under the same lock, so
    /// concurrent cycles each get their own view.
    fn record(&self, started: Instant, up: bool, errors: &[CollectError]) -> Vec<MetricSample> {
        let mut stats = lock(&self.stats);
        stats.scrapes += 1;
        stats.up = up;
        stats.last_duration = started.elapsed();
        stats.last_error = errors.iter().any(CollectError::is_fatal_for_group);
        for e in errors {
            if let CollectError::Scrape(e) = e {
                *stats.errors.entry(e.group()).or_default() += 1;
            }
        }
        self.stats_samples(&stats)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
