//! Metric descriptor registry.
//!
//! Maps lowercase ProxySQL admin field names to the metric metadata used when
//! exposing them. There is one [`TableRegistry`] per table group:
//! - `stats_mysql_global` - global status counters (`proxysql_mysql_status_*`)
//! - `stats_mysql_connection_pool` - per-backend pool rows (`proxysql_connection_pool_*`)
//! - `stats_mysql_processlist` - client/server connection list (`proxysql_processlist_*`)
//!
//! Registries are permissive: fields present in a row but absent from the
//! registry are skipped, since the admin schema changes between ProxySQL
//! versions.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry as MapEntry;
use std::sync::Arc;

use serde::Serialize;

/// Prometheus metric type of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Static metadata describing one metric family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    /// Fully-qualified metric name, e.g. `proxysql_connection_pool_conn_used`.
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    /// Variable label keys, in exposition order.
    pub labels: Vec<String>,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, kind: MetricKind, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            help: help.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }
}

/// Administrative table group scraped by one scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableGroup {
    GlobalStatus,
    ConnectionPool,
    ConnectionList,
}

impl TableGroup {
    pub const ALL: [TableGroup; 3] = [
        TableGroup::GlobalStatus,
        TableGroup::ConnectionPool,
        TableGroup::ConnectionList,
    ];

    /// Collector name used in logs and in the `collector` label of
    /// `proxysql_exporter_scrape_errors_total`.
    pub fn collector_name(self) -> &'static str {
        match self {
            TableGroup::GlobalStatus => "collect.mysql_status",
            TableGroup::ConnectionPool => "collect.mysql_connection_pool",
            TableGroup::ConnectionList => "collect.mysql_connection_list",
        }
    }

    /// Metric name prefix shared by every descriptor of the group.
    pub fn prefix(self) -> &'static str {
        match self {
            TableGroup::GlobalStatus => "proxysql_mysql_status",
            TableGroup::ConnectionPool => "proxysql_connection_pool",
            TableGroup::ConnectionList => "proxysql_processlist",
        }
    }

    fn default_labels(self) -> &'static [&'static str] {
        match self {
            TableGroup::ConnectionPool => &["hostgroup", "endpoint"],
            TableGroup::GlobalStatus | TableGroup::ConnectionList => &[],
        }
    }
}

impl std::fmt::Display for TableGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collector_name())
    }
}

/// A registration: either a usable descriptor or a placeholder without one.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Metric(Arc<MetricDescriptor>),
    Placeholder,
}

/// Error type for registry validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A key or descriptor name contains uppercase characters.
    NotLowercase(String),
    /// Not a valid Prometheus metric name.
    InvalidName(String),
    /// Not a valid Prometheus label name.
    InvalidLabel { metric: String, label: String },
    /// Two registrations use the same metric name with different metadata.
    Conflict(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NotLowercase(s) => write!(f, "registry: '{}' is not lowercase", s),
            RegistryError::InvalidName(s) => write!(f, "registry: invalid metric name '{}'", s),
            RegistryError::InvalidLabel { metric, label } => {
                write!(f, "registry: invalid label '{}' on metric '{}'", label, metric)
            }
            RegistryError::Conflict(name) => {
                write!(f, "registry: conflicting descriptors for '{}'", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Field name → descriptor mapping for one table group.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    group: TableGroup,
    entries: BTreeMap<String, Entry>,
}

impl TableRegistry {
    /// Creates an empty registry for `group`.
    pub fn new(group: TableGroup) -> Self {
        Self {
            group,
            entries: BTreeMap::new(),
        }
    }

    /// Registers `key` as metric `<group prefix>_<name>` carrying the
    /// group's default labels.
    pub fn metric(self, key: &str, name: &str, kind: MetricKind, help: &str) -> Self {
        let labels = self.group.default_labels();
        self.metric_with_labels(key, name, kind, help, labels)
    }

    /// Registers `key` with an explicit label set.
    pub fn metric_with_labels(
        mut self,
        key: &str,
        name: &str,
        kind: MetricKind,
        help: &str,
        labels: &[&str],
    ) -> Self {
        let descriptor =
            MetricDescriptor::new(format!("{}_{}", self.group.prefix(), name), kind, help)
                .with_labels(labels);
        self.entries
            .insert(key.to_string(), Entry::Metric(Arc::new(descriptor)));
        self
    }

    /// Registers `key` without a descriptor.
    pub fn placeholder(mut self, key: &str) -> Self {
        self.entries.insert(key.to_string(), Entry::Placeholder);
        self
    }

    pub fn group(&self) -> TableGroup {
        self.group
    }

    /// Looks up a raw admin column name. The name is ASCII-lowercased before
    /// matching, so `ConnUsed` finds the `connused` entry.
    pub fn lookup(&self, field: &str) -> Option<&Entry> {
        if field.bytes().any(|b| b.is_ascii_uppercase()) {
            self.entries.get(&field.to_ascii_lowercase())
        } else {
            self.entries.get(field)
        }
    }

    /// Iterates over `(key, entry)` in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Iterates over usable descriptors in key order (placeholders skipped).
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MetricDescriptor>> {
        self.entries.values().filter_map(|e| match e {
            Entry::Metric(d) => Some(d),
            Entry::Placeholder => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks naming invariants for every registration.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (key, entry) in &self.entries {
            if !is_lowercase(key) {
                return Err(RegistryError::NotLowercase(key.clone()));
            }
            let Entry::Metric(d) = entry else {
                continue;
            };
            if !is_lowercase(&d.name) {
                return Err(RegistryError::NotLowercase(d.name.clone()));
            }
            if !is_valid_metric_name(&d.name) {
                return Err(RegistryError::InvalidName(d.name.clone()));
            }
            for label in &d.labels {
                if !is_lowercase(label) || !is_valid_label_name(label) {
                    return Err(RegistryError::InvalidLabel {
                        metric: d.name.clone(),
                        label: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The three table registries used by one exporter instance.
#[derive(Debug, Clone)]
pub struct Registries {
    pub global_status: TableRegistry,
    pub connection_pool: TableRegistry,
    pub connection_list: TableRegistry,
}

impl Registries {
    /// Registries for the ProxySQL admin schema.
    pub fn proxysql() -> Self {
        Self {
            global_status: global_status_registry(),
            connection_pool: connection_pool_registry(),
            connection_list: connection_list_registry(),
        }
    }

    pub fn get(&self, group: TableGroup) -> &TableRegistry {
        match group {
            TableGroup::GlobalStatus => &self.global_status,
            TableGroup::ConnectionPool => &self.connection_pool,
            TableGroup::ConnectionList => &self.connection_list,
        }
    }

    /// Validates each registry and rejects a metric name registered twice
    /// with different metadata. Aliases with identical descriptors are allowed.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut seen: BTreeMap<&str, &MetricDescriptor> = BTreeMap::new();
        for group in TableGroup::ALL {
            let registry = self.get(group);
            registry.validate()?;
            for d in registry.descriptors() {
                match seen.entry(d.name.as_str()) {
                    MapEntry::Vacant(slot) => {
                        slot.insert(d.as_ref());
                    }
                    MapEntry::Occupied(existing) => {
                        if *existing.get() != d.as_ref() {
                            return Err(RegistryError::Conflict(d.name.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Union of all descriptors, deduplicated by name (first wins).
    pub fn descriptors(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut names = std::collections::HashSet::new();
        let mut out = Vec::new();
        for group in TableGroup::ALL {
            for d in self.get(group).descriptors() {
                if names.insert(d.name.clone()) {
                    out.push(Arc::clone(d));
                }
            }
        }
        out
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::proxysql()
    }
}

fn is_lowercase(s: &str) -> bool {
    s == s.to_lowercase()
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !label.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

use MetricKind::{Counter, Gauge};

/// `stats_mysql_global` variables. The key doubles as the metric suffix.
const GLOBAL_STATUS: &[(&str, MetricKind, &str)] = &[
    ("active_transactions", Gauge, "Current number of active transactions."),
    ("backend_query_time_nsec", Counter, "Time spent making network calls to communicate with the backends."),
    ("client_connections_aborted", Counter, "Total number of frontend connections aborted due to invalid credential or max_connections reached."),
    ("client_connections_connected", Gauge, "Current number of frontend connections."),
    ("client_connections_created", Counter, "Total number of frontend connections created."),
    ("client_connections_non_idle", Gauge, "Number of client connections that are currently handled by the main worker threads."),
    ("client_connections_hostgroup_locked", Counter, "Number of client connections locked to a specific hostgroup."),
    ("com_autocommit", Counter, "Total number of queries with autocommit."),
    ("com_autocommit_filtered", Counter, "Total number of queries with autocommit filtered by ProxySQL."),
    ("com_backend_change_user", Counter, "Total number of change_user commands sent to backends."),
    ("com_backend_init_db", Counter, "Total number of init_db commands sent to backends."),
    ("com_backend_set_names", Counter, "Total number of SET NAMES commands sent to backends."),
    ("com_commit", Counter, "Total number of COMMIT queries."),
    ("com_commit_filtered", Counter, "Total number of COMMIT queries filtered by ProxySQL."),
    ("com_frontend_init_db", Counter, "Total number of init_db commands received from clients."),
    ("com_frontend_set_names", Counter, "Total number of SET NAMES commands received from clients."),
    ("com_frontend_use_db", Counter, "Total number of USE commands received from clients."),
    ("com_rollback", Counter, "Total number of ROLLBACK queries."),
    ("com_rollback_filtered", Counter, "Total number of ROLLBACK queries filtered by ProxySQL."),
    ("connpool_get_conn_failure", Counter, "The number of requests for a connection from the pool that could not be served."),
    ("connpool_get_conn_immediate", Counter, "The number of connections that a MySQL thread obtained from its own local connection pool cache."),
    ("connpool_get_conn_success", Counter, "The number of requests where a connection was already available in the connection pool."),
    ("connpool_memory_bytes", Gauge, "Memory used by the connection pool to store connections metadata."),
    ("generated_error_packets", Counter, "Total number of error packets generated by ProxySQL."),
    ("max_connect_timeouts", Counter, "Total number of times a connection attempt to a backend exceeded the connect timeout."),
    ("mysql_backend_buffers_bytes", Gauge, "Buffers related to backend connections if \"fast_forward\" is used."),
    ("mysql_frontend_buffers_bytes", Gauge, "Buffers related to frontend connections (read/write buffers and other queues)."),
    ("mysql_killed_backend_connections", Counter, "Number of backend connections killed by ProxySQL."),
    ("mysql_killed_backend_queries", Counter, "Number of backend queries killed by ProxySQL."),
    ("mysql_monitor_workers", Gauge, "The number of monitor threads."),
    ("mysql_session_internal_bytes", Gauge, "Other memory used by ProxySQL to handle MySQL sessions."),
    ("mysql_thread_workers", Gauge, "Number of MySQL Thread workers i.e. \"mysql-threads\"."),
    ("mysql_unexpected_frontend_com_quit", Counter, "Number of unexpected COM_QUIT received from clients."),
    ("mysql_unexpected_frontend_packets", Counter, "Number of unexpected packets received from clients."),
    ("proxysql_uptime", Counter, "The total uptime of ProxySQL in seconds."),
    ("queries_backends_bytes_recv", Counter, "Total bytes received from backends."),
    ("queries_backends_bytes_sent", Counter, "Total bytes sent to backends."),
    ("queries_frontends_bytes_recv", Counter, "Total bytes received from clients."),
    ("queries_frontends_bytes_sent", Counter, "Total bytes sent to clients."),
    ("query_cache_bytes_in", Counter, "The number of bytes sent into the Query Cache."),
    ("query_cache_bytes_out", Counter, "The number of bytes read from the Query Cache."),
    ("query_cache_count_get", Counter, "Total number of read requests to the Query Cache."),
    ("query_cache_count_get_ok", Counter, "Total number of successful read requests to the Query Cache."),
    ("query_cache_count_set", Counter, "Total number of write requests to the Query Cache."),
    ("query_cache_entries", Gauge, "Number of entries currently stored in the Query Cache."),
    ("query_cache_memory_bytes", Gauge, "Memory currently used by the Query Cache."),
    ("query_cache_purged", Counter, "The number of entries purged by the Query Cache due to TTL expiration."),
    ("query_processor_time_nsec", Counter, "The time spent inside the Query Processor to determine what action needs to be taken with the query."),
    ("questions", Counter, "The total number of client requests / statements executed."),
    ("server_connections_aborted", Counter, "Total number of backend connections that failed or were not properly closed."),
    ("server_connections_connected", Gauge, "Backend connections that are currently connected."),
    ("server_connections_created", Counter, "Total number of backend connections created."),
    ("server_connections_delayed", Counter, "Total number of backend connections delayed because max_connections was reached."),
    ("servers_table_version", Gauge, "Version of the runtime servers table; increases on every reload."),
    ("slow_queries", Counter, "The total number of queries with an execution time greater than \"mysql-long_query_time\" milliseconds."),
    ("sqlite3_memory_bytes", Gauge, "Memory used by the embedded SQLite."),
    ("stmt_cached", Gauge, "Number of global prepared statements for which proxysql has metadata."),
    ("stmt_client_active_total", Gauge, "The number of prepared statements that are in use by clients."),
    ("stmt_client_active_unique", Gauge, "The number of unique prepared statements currently in use by clients."),
    ("stmt_max_stmt_id", Gauge, "When a new global prepared statement is created, a new stmt_id is used."),
    ("stmt_server_active_total", Gauge, "The number of prepared statements currently available across all backend connections."),
    ("stmt_server_active_unique", Gauge, "The number of unique prepared statements currently available across all backend connections."),
];

/// `stats_mysql_connection_pool` columns: (key, metric suffix, kind, help).
const CONNECTION_POOL: &[(&str, &str, MetricKind, &str)] = &[
    ("status", "status", Gauge, "The status of the backend server (1 - ONLINE, 2 - SHUNNED, 3 - OFFLINE_SOFT, 4 - OFFLINE_HARD)."),
    ("connused", "conn_used", Gauge, "How many connections are currently used by ProxySQL for sending queries to the backend server."),
    ("connfree", "conn_free", Gauge, "How many connections are currently free."),
    ("connok", "conn_ok", Counter, "How many connections were established successfully."),
    ("connerr", "conn_err", Counter, "How many connections weren't established successfully."),
    ("maxconnused", "max_conn_used", Gauge, "The highest number of connections ever used by ProxySQL for this backend server."),
    ("queries", "queries", Counter, "The number of queries routed towards this particular backend server."),
    ("queries_gtid_sync", "queries_gtid_sync", Counter, "The number of queries routed to this backend server that required GTID consistency."),
    ("bytes_data_sent", "bytes_data_sent", Counter, "The amount of data sent to the backend, excluding metadata."),
    ("bytes_data_recv", "bytes_data_recv", Counter, "The amount of data received from the backend, excluding metadata."),
    ("latency_us", "latency_us", Gauge, "The currently ping time in microseconds, as reported from Monitor."),
    // Older ProxySQL releases name the column Latency_ms while reporting microseconds.
    ("latency_ms", "latency_us", Gauge, "The currently ping time in microseconds, as reported from Monitor."),
];

fn global_status_registry() -> TableRegistry {
    GLOBAL_STATUS
        .iter()
        .fold(TableRegistry::new(TableGroup::GlobalStatus), |r, (key, kind, help)| {
            r.metric(key, key, *kind, help)
        })
}

fn connection_pool_registry() -> TableRegistry {
    CONNECTION_POOL.iter().fold(
        TableRegistry::new(TableGroup::ConnectionPool),
        |r, (key, name, kind, help)| r.metric(key, name, *kind, help),
    )
}

fn connection_list_registry() -> TableRegistry {
    TableRegistry::new(TableGroup::ConnectionList)
        .metric_with_labels(
            "client_connection_list",
            "client_connection_list",
            Gauge,
            "Presence of a client host in the current connection list.",
            &["client_host"],
        )
        .metric_with_labels(
            "server_connection_list",
            "server_connection_list",
            Gauge,
            "Presence of a backend server host in the current connection list.",
            &["server_host"],
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_lowercase() {
        let registries = Registries::proxysql();
        for group in TableGroup::ALL {
            for (key, entry) in registries.get(group).entries() {
                assert_eq!(key, key.to_lowercase());
                if let Entry::Metric(d) = entry {
                    assert_eq!(d.name, d.name.to_lowercase());
                    for label in &d.labels {
                        assert_eq!(*label, label.to_lowercase());
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_registries_validate() {
        assert_eq!(Registries::proxysql().validate(), Ok(()));
    }

    #[test]
    fn test_lookup_lowercases_column_name() {
        let registries = Registries::proxysql();
        let Some(Entry::Metric(d)) = registries.connection_pool.lookup("ConnUsed") else {
            panic!("ConnUsed not registered");
        };
        assert_eq!(d.name, "proxysql_connection_pool_conn_used");
        assert_eq!(d.labels, vec!["hostgroup", "endpoint"]);
        assert!(registries.connection_pool.lookup("srv_host").is_none());
    }

    #[test]
    fn test_latency_alias_shares_descriptor() {
        let registries = Registries::proxysql();
        let us = registries.connection_pool.lookup("Latency_us");
        let ms = registries.connection_pool.lookup("Latency_ms");
        assert!(us.is_some());
        assert_eq!(us, ms);
    }

    #[test]
    fn test_descriptors_deduplicated() {
        let registries = Registries::proxysql();
        let descs = registries.descriptors();
        let names: std::collections::HashSet<_> = descs.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names.len(), descs.len());
        assert!(names.contains("proxysql_connection_pool_latency_us"));
        assert!(names.contains("proxysql_processlist_client_connection_list"));
        assert!(names.contains("proxysql_mysql_status_active_transactions"));
    }

    #[test]
    fn test_placeholder_excluded_from_descriptors() {
        let registry = TableRegistry::new(TableGroup::ConnectionList)
            .placeholder("client_connection_list")
            .placeholder("server_connection_list");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.descriptors().count(), 0);
        assert_eq!(registry.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_uppercase_key() {
        let registry = TableRegistry::new(TableGroup::GlobalStatus).metric(
            "Questions",
            "questions",
            Counter,
            "help",
        );
        assert_eq!(
            registry.validate(),
            Err(RegistryError::NotLowercase("Questions".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_conflicting_names() {
        let mut registries = Registries::proxysql();
        registries.global_status = TableRegistry::new(TableGroup::GlobalStatus).metric(
            "a",
            "x",
            Gauge,
            "first",
        );
        registries.global_status = registries.global_status.metric("b", "x", Counter, "second");
        assert_eq!(
            registries.validate(),
            Err(RegistryError::Conflict("proxysql_mysql_status_x".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_invalid_metric_name() {
        let registry =
            TableRegistry::new(TableGroup::GlobalStatus).metric("bad", "bad-name", Gauge, "help");
        assert!(matches!(
            registry.validate(),
            Err(RegistryError::InvalidName(_))
        ));
    }
}
