//! proxysql-exporter - Prometheus exporter for the ProxySQL admin interface.
//!
//! On every pull the exporter queries three admin tables and maps their rows
//! to metric samples:
//! - `stats_mysql_global` - global status counters
//! - `stats_mysql_connection_pool` - per-backend connection pool statistics
//! - `stats_mysql_processlist` - client and server hosts of live sessions
//!
//! The `proxysql-exporter` binary serves the result over HTTP.

pub mod admin;
pub mod coerce;
pub mod config;
pub mod exporter;
pub mod exposition;
pub mod mock;
pub mod registry;
pub mod sample;
pub mod scrape;
pub mod web;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
