//! The top-N SQL-by-CPU-time aggregation query and the sessions that run it.
//!
//! A [`Connector`] opens one [`Session`] per worker. Sessions are configured once and then run
//! [`Session::top_sql`] repeatedly. The MySQL implementation talks to TiDB over the MySQL wire
//! protocol using [`sqlx`].

use futures::TryStreamExt;
use secrecy::{ExposeSecret, SecretBox};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};
use thiserror::Error;
use topsql_types::{ConfigSecret, QueryParams, TopSqlRow};

/// Routes reads of the session to both the row and the columnar engine.
pub const SESSION_SETUP: &str = r#"SET @@session.tidb_isolation_read_engines = "tidb, tiflash""#;

/// Ranks SQL digests by CPU time within each time bucket.
///
/// Binds, in order: bucket interval, window start (inclusive), window end (exclusive), instance
/// and the maximum rank. `ROW_NUMBER` keeps every bucket at no more than `top_n` rows; which of
/// two digests with equal sums comes first is up to the backend.
pub const TOP_SQL_QUERY: &str = r#"
SELECT CAST(instance_id AS SIGNED) AS instance_id,
    sql_digest,
    time_window,
    cpu_time_sum,
    CAST(sql_ranked.rk AS UNSIGNED) AS rk
FROM (
    SELECT topsql.*,
        ROW_NUMBER() OVER (PARTITION BY topsql.time_window ORDER BY topsql.cpu_time_sum DESC) AS rk
    FROM (
        SELECT instance_id,
            sql_digest,
            CAST(FLOOR(timestamp / ?) AS SIGNED) AS time_window,
            CAST(SUM(cpu_time_ms) AS SIGNED) AS cpu_time_sum
        FROM cpu_time
        WHERE timestamp >= ?
            AND timestamp < ?
            AND instance_id = ?
        GROUP BY instance_id, time_window, sql_digest
    ) topsql
) sql_ranked
WHERE sql_ranked.rk <= ?
"#;

/// Errors from connecting to or querying the relational store.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Errors from the database driver, including connection and row decoding errors.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The query parameters are invalid.
    #[error("invalid query parameters: {0}")]
    Params(#[from] topsql_types::query::ParamsError),

    /// Errors raised by a session implementation that is not backed by a database.
    #[error("session error: {0}")]
    Session(String),
}

/// An exclusively owned session to the relational store.
#[async_trait::async_trait]
pub trait Session: Send + 'static {
    /// Prepares the session for querying. Runs once, before the first query.
    async fn configure(&mut self) -> Result<(), QueryError>;

    /// Runs the top-N query and drains its result.
    ///
    /// Returns the number of rows read. Failing to execute the query or to read any of its rows
    /// is an error.
    async fn top_sql(&mut self, params: &QueryParams) -> Result<u64, QueryError>;
}

/// Opens sessions to the relational store.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The session type handed to each worker.
    type Session: Session;

    /// Opens a new session.
    async fn connect(&self) -> Result<Self::Session, QueryError>;
}

/// Connects to TiDB or MySQL with a `mysql://` URL.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    dsn: SecretBox<ConfigSecret>,
}

impl MySqlConnector {
    /// Creates a connector for the given connection URL.
    pub fn new(dsn: SecretBox<ConfigSecret>) -> Self {
        Self { dsn }
    }
}

#[async_trait::async_trait]
impl Connector for MySqlConnector {
    type Session = MySqlSession;

    async fn connect(&self) -> Result<MySqlSession, QueryError> {
        let conn = MySqlConnection::connect(self.dsn.expose_secret().as_str()).await?;
        Ok(MySqlSession { conn })
    }
}

/// A single MySQL protocol connection.
#[derive(Debug)]
pub struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait::async_trait]
impl Session for MySqlSession {
    async fn configure(&mut self) -> Result<(), QueryError> {
        sqlx::query(SESSION_SETUP).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn top_sql(&mut self, params: &QueryParams) -> Result<u64, QueryError> {
        params.validate()?;

        // The cursor is released when `rows` is dropped, on every return path.
        let mut rows = sqlx::query(TOP_SQL_QUERY)
            .bind(params.interval)
            .bind(params.start_ts)
            .bind(params.end_ts)
            .bind(params.instance_id)
            .bind(params.top_n)
            .fetch(&mut self.conn);

        let mut count = 0;
        while let Some(row) = rows.try_next().await? {
            let row = decode_row(&row)?;
            tracing::trace!(?row, "read row");
            count += 1;
        }
        tracing::debug!(rows = count, "query drained");
        Ok(count)
    }
}

fn decode_row(row: &MySqlRow) -> Result<TopSqlRow, sqlx::Error> {
    Ok(TopSqlRow {
        instance_id: row.try_get("instance_id")?,
        sql_digest: row.try_get("sql_digest")?,
        time_window: row.try_get("time_window")?,
        cpu_time_sum: row.try_get("cpu_time_sum")?,
        rank: row.try_get("rk")?,
    })
}
