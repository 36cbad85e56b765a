//! Admin queries, one per table group.
//!
//! These must match the ProxySQL admin schema; a schema change means updating
//! the query and the registry together.

/// Global status counters, one (name, value) pair per row.
pub const GLOBAL_STATUS_QUERY: &str = "SELECT Variable_Name, Variable_Value FROM stats_mysql_global";

/// Per-backend connection pool statistics. Columns vary between ProxySQL
/// releases (`Latency_ms` vs `Latency_us`, `MaxConnUsed`, `Queries_GTID_sync`),
/// so every column is fetched and mapped through the registry.
pub const CONNECTION_POOL_QUERY: &str = "SELECT * FROM stats_mysql_connection_pool";

/// Client and backend host of every active session.
pub const CONNECTION_LIST_QUERY: &str = "SELECT cli_host, srv_host FROM stats_mysql_processlist";
