//! Scripted admin interface for testing.
//!
//! `MockAdmin` answers queries from a table of expected query strings, like a
//! SQL mock: each query is scripted with rows or an error, and every executed
//! query is recorded so tests can check what ran. `MockConnector` hands out a
//! shared `MockAdmin` and can be switched into a failing state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::admin::{AdminDb, AdminError, Connector, Row};

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Error(String),
    /// Rows delivered after a delay.
    Slow(Duration, Vec<Row>),
    Panic,
}

/// In-memory admin database answering scripted queries.
#[derive(Debug, Default)]
pub struct MockAdmin {
    responses: Mutex<HashMap<String, Response>>,
    executed: Mutex<Vec<String>>,
    ping_fails: AtomicBool,
}

impl MockAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `query` to return rows built from `columns` and `rows`.
    pub fn with_rows(self, query: &str, columns: &[&str], rows: &[&[&str]]) -> Self {
        self.set_rows(query, columns, rows);
        self
    }

    /// Scripts `query` to fail with `message`.
    pub fn with_error(self, query: &str, message: &str) -> Self {
        self.set_error(query, message);
        self
    }

    /// Scripts `query` to answer with an empty row set after `delay`.
    pub fn with_delay(self, query: &str, delay: Duration) -> Self {
        lock(&self.responses).insert(normalize(query), Response::Slow(delay, Vec::new()));
        self
    }

    /// Scripts `query` to panic when executed.
    pub fn with_panic(self, query: &str) -> Self {
        lock(&self.responses).insert(normalize(query), Response::Panic);
        self
    }

    pub fn set_rows(&self, query: &str, columns: &[&str], rows: &[&[&str]]) {
        let rows = rows
            .iter()
            .map(|values| Row::from_columns(columns, values))
            .collect();
        lock(&self.responses).insert(normalize(query), Response::Rows(rows));
    }

    pub fn set_error(&self, query: &str, message: &str) {
        lock(&self.responses).insert(normalize(query), Response::Error(message.to_string()));
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    /// Queries executed so far, in execution order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }
}

impl AdminDb for MockAdmin {
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, AdminError>> {
        Box::pin(async move {
            let key = normalize(sql);
            lock(&self.executed).push(key.clone());
            let response = lock(&self.responses).get(&key).cloned();
            match response {
                Some(Response::Rows(rows)) => Ok(rows),
                Some(Response::Error(msg)) => Err(AdminError::QueryError(msg)),
                Some(Response::Slow(delay, rows)) => {
                    tokio::time::sleep(delay).await;
                    Ok(rows)
                }
                Some(Response::Panic) => panic!("scripted panic for {}", key),
                None => Err(AdminError::QueryError(format!("unexpected query: {}", key))),
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), AdminError>> {
        Box::pin(async move {
            if self.ping_fails.load(Ordering::SeqCst) {
                Err(AdminError::ConnectionError("server has gone away".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Connector returning a shared [`MockAdmin`].
#[derive(Debug)]
pub struct MockConnector {
    admin: Arc<MockAdmin>,
    fail: AtomicBool,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(admin: Arc<MockAdmin>) -> Self {
        Self {
            admin,
            fail: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    /// A connector whose every connect attempt fails.
    pub fn unreachable() -> Self {
        let connector = Self::new(Arc::new(MockAdmin::new()));
        connector.set_fail(true);
        connector
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn admin(&self) -> &Arc<MockAdmin> {
        &self.admin
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AdminDb>, AdminError>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AdminError::ConnectionError("connection refused".to_string()));
            }
            Ok(Arc::clone(&self.admin) as Arc<dyn AdminDb>)
        })
    }
}

/// Collapses whitespace so scripted queries match regardless of formatting.
fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
