//! Parameters and result rows of the top-N SQL-by-CPU-time query.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by [`QueryParams::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    /// The time window ends before it starts.
    #[error("query window ends at {end_ts} before it starts at {start_ts}")]
    InvertedWindow {
        /// Start of the window.
        start_ts: i64,
        /// End of the window.
        end_ts: i64,
    },
    /// Buckets must have a positive width.
    #[error("bucket interval must be positive, got {0}")]
    Interval(i64),
    /// At least one row per bucket must be requested.
    #[error("top_n must be positive")]
    TopN,
}

/// Parameters for one execution of the top-N aggregation query.
///
/// The query covers timestamps in `[start_ts, end_ts)` on a single instance, groups them into
/// buckets of `interval` seconds and returns at most `top_n` SQL digests per bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Inclusive start of the window, in seconds.
    pub start_ts: i64,
    /// Exclusive end of the window, in seconds.
    pub end_ts: i64,
    /// Width of each time bucket, in seconds.
    pub interval: i64,
    /// The instance to aggregate.
    pub instance_id: u32,
    /// Maximum number of digests returned per bucket.
    pub top_n: u32,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            start_ts: 0,
            end_ts: 3600 * 24,
            interval: 300,
            instance_id: 0,
            top_n: 5,
        }
    }
}

impl QueryParams {
    /// Checks the window ordering and the positivity of `interval` and `top_n`.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.start_ts > self.end_ts {
            return Err(ParamsError::InvertedWindow {
                start_ts: self.start_ts,
                end_ts: self.end_ts,
            });
        }
        if self.interval <= 0 {
            return Err(ParamsError::Interval(self.interval));
        }
        if self.top_n == 0 {
            return Err(ParamsError::TopN);
        }
        Ok(())
    }

    /// Length of the query window in seconds.
    pub fn duration(&self) -> i64 {
        self.end_ts - self.start_ts
    }
}

/// One row of the top-N result: a digest's CPU time within one bucket and its rank there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopSqlRow {
    /// The instance the row belongs to.
    pub instance_id: i64,
    /// Digest of the SQL statement.
    pub sql_digest: Vec<u8>,
    /// Bucket index, `floor(timestamp / interval)`.
    pub time_window: i64,
    /// Sum of CPU time in milliseconds within the bucket.
    pub cpu_time_sum: i64,
    /// 1-based position within the bucket, ordered by `cpu_time_sum` descending.
    pub rank: u64,
}
