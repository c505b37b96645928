//! Fabricated CPU-time records and the metadata that resolves their digests.

use thiserror::Error;

/// Errors returned when constructing a [`CpuTimeRecord`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The timestamp and CPU-time lists must pair up one to one.
    #[error("record has {timestamps} timestamps but {cpu_times} cpu time values")]
    LengthMismatch {
        /// Number of timestamps given.
        timestamps: usize,
        /// Number of CPU-time values given.
        cpu_times: usize,
    },
}

/// CPU time consumed by one SQL statement under one plan on one instance.
///
/// Each entry in `timestamps` pairs with the entry at the same position in `cpu_time_ms`. The
/// constructor enforces that both lists have the same length, and it is the only way to build a
/// record. The fields are only exposed through accessors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuTimeRecord {
    instance_id: u32,
    sql_digest: Vec<u8>,
    plan_digest: Vec<u8>,
    timestamps: Vec<u64>,
    cpu_time_ms: Vec<u32>,
}

impl CpuTimeRecord {
    /// Creates a record, checking that timestamps and CPU times line up.
    ///
    /// # Examples
    ///
    /// ```
    /// use topsql_types::CpuTimeRecord;
    ///
    /// let record = CpuTimeRecord::new(1, b"sql".to_vec(), b"plan".to_vec(), vec![10], vec![250]);
    /// assert!(record.is_ok());
    ///
    /// let broken = CpuTimeRecord::new(1, b"sql".to_vec(), b"plan".to_vec(), vec![10, 11], vec![250]);
    /// assert!(broken.is_err());
    /// ```
    pub fn new(
        instance_id: u32,
        sql_digest: Vec<u8>,
        plan_digest: Vec<u8>,
        timestamps: Vec<u64>,
        cpu_time_ms: Vec<u32>,
    ) -> Result<Self, RecordError> {
        if timestamps.len() != cpu_time_ms.len() {
            return Err(RecordError::LengthMismatch {
                timestamps: timestamps.len(),
                cpu_times: cpu_time_ms.len(),
            });
        }

        Ok(Self {
            instance_id,
            sql_digest,
            plan_digest,
            timestamps,
            cpu_time_ms,
        })
    }

    /// Creates a record holding a single sample.
    pub fn single(
        instance_id: u32,
        sql_digest: Vec<u8>,
        plan_digest: Vec<u8>,
        timestamp: u64,
        cpu_time_ms: u32,
    ) -> Self {
        Self {
            instance_id,
            sql_digest,
            plan_digest,
            timestamps: vec![timestamp],
            cpu_time_ms: vec![cpu_time_ms],
        }
    }

    /// The instance that reported this record.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Digest of the normalized SQL statement.
    pub fn sql_digest(&self) -> &[u8] {
        &self.sql_digest
    }

    /// Digest of the execution plan.
    pub fn plan_digest(&self) -> &[u8] {
        &self.plan_digest
    }

    /// Sample timestamps in seconds.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// CPU time in milliseconds, one value per timestamp.
    pub fn cpu_time_ms(&self) -> &[u32] {
        &self.cpu_time_ms
    }

    /// Iterates `(timestamp, cpu_time_ms)` pairs in order.
    pub fn samples(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.timestamps
            .iter()
            .copied()
            .zip(self.cpu_time_ms.iter().copied())
    }
}

/// Maps a SQL digest to its normalized statement text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlMeta {
    /// Digest of the statement.
    pub sql_digest: Vec<u8>,
    /// The normalized statement text.
    pub normalized_sql: String,
}

/// Maps a plan digest to its normalized plan text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanMeta {
    /// Digest of the plan.
    pub plan_digest: Vec<u8>,
    /// The normalized plan text.
    pub normalized_plan: String,
}
