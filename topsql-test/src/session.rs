//! An in-memory relational store for the query harness.
//!
//! [`MemConnector`] hands out sessions that evaluate the top-N query against a shared
//! [`MemStore`] and record every call, so tests can assert on how often and with which
//! parameters the harness queried.
//!
//! ```
//! use topsql_store::MemStore;
//! use topsql_test::session::MemConnector;
//!
//! let connector = MemConnector::new(MemStore::new());
//! assert_eq!(connector.executions(), 0);
//! ```

use std::sync::{Arc, Mutex};

use topsql_bench::query::{Connector, QueryError, Session};
use topsql_store::MemStore;
use topsql_types::QueryParams;

#[derive(Debug, Default)]
struct Log {
    sessions: usize,
    configured: usize,
    queries: Vec<QueryParams>,
    rows: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Faults {
    connect: bool,
    configure: bool,
    query_at: Option<usize>,
    row_at: Option<u64>,
}

/// A [`Connector`] whose sessions query a [`MemStore`].
#[derive(Clone, Debug)]
pub struct MemConnector {
    store: MemStore,
    log: Arc<Mutex<Log>>,
    faults: Faults,
}

impl MemConnector {
    /// Creates a connector over `store`.
    pub fn new(store: MemStore) -> Self {
        Self {
            store,
            log: Default::default(),
            faults: Faults::default(),
        }
    }

    /// Makes every connection attempt fail.
    pub fn fail_connect(mut self) -> Self {
        self.faults.connect = true;
        self
    }

    /// Makes every session fail its setup.
    pub fn fail_configure(mut self) -> Self {
        self.faults.configure = true;
        self
    }

    /// Makes the query with the given zero-based index, counted over all sessions, fail.
    pub fn fail_query_at(mut self, index: usize) -> Self {
        self.faults.query_at = Some(index);
        self
    }

    /// Makes reading the row with the given zero-based index fail, in every query that returns
    /// that many rows.
    pub fn fail_row_at(mut self, index: u64) -> Self {
        self.faults.row_at = Some(index);
        self
    }

    /// Number of sessions opened so far.
    pub fn sessions(&self) -> usize {
        self.log.lock().unwrap().sessions
    }

    /// Number of sessions that completed their setup.
    pub fn configured(&self) -> usize {
        self.log.lock().unwrap().configured
    }

    /// Number of queries executed so far, including a failed one.
    pub fn executions(&self) -> usize {
        self.log.lock().unwrap().queries.len()
    }

    /// Parameters of all executed queries, in execution order.
    pub fn queries(&self) -> Vec<QueryParams> {
        self.log.lock().unwrap().queries.clone()
    }

    /// Rows returned over all successful queries.
    pub fn rows(&self) -> u64 {
        self.log.lock().unwrap().rows
    }
}

#[async_trait::async_trait]
impl Connector for MemConnector {
    type Session = MemSession;

    async fn connect(&self) -> Result<MemSession, QueryError> {
        if self.faults.connect {
            return Err(QueryError::Session("connection refused".into()));
        }
        self.log.lock().unwrap().sessions += 1;
        Ok(MemSession {
            connector: self.clone(),
            configured: false,
        })
    }
}

/// A session opened by [`MemConnector`].
#[derive(Debug)]
pub struct MemSession {
    connector: MemConnector,
    configured: bool,
}

#[async_trait::async_trait]
impl Session for MemSession {
    async fn configure(&mut self) -> Result<(), QueryError> {
        if self.connector.faults.configure {
            return Err(QueryError::Session("unknown system variable".into()));
        }
        self.configured = true;
        self.connector.log.lock().unwrap().configured += 1;
        Ok(())
    }

    async fn top_sql(&mut self, params: &QueryParams) -> Result<u64, QueryError> {
        if !self.configured {
            return Err(QueryError::Session("session is not configured".into()));
        }
        params.validate()?;

        let index = {
            let mut log = self.connector.log.lock().unwrap();
            log.queries.push(*params);
            log.queries.len() - 1
        };
        if self.connector.faults.query_at == Some(index) {
            return Err(QueryError::Session(format!("query {index} failed")));
        }

        let mut count = 0;
        for row in self.connector.store.top_sql(params)? {
            if self.connector.faults.row_at == Some(count) {
                return Err(QueryError::Session(format!("failed to read row {count}")));
            }
            tracing::trace!(?row, "read row");
            count += 1;
        }
        self.connector.log.lock().unwrap().rows += count;
        Ok(count)
    }
}
