//! The [`Store`] capability set and its implementations.

use std::fmt::Debug;

use topsql_types::{CpuTimeRecord, PlanMeta, SqlMeta};

use crate::error::StoreResult;

pub mod flux;
pub mod in_memory;
pub mod influx;

/// A destination for fabricated top-SQL data.
#[async_trait::async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// Writes the CPU-time samples of one SQL/plan pair.
    async fn write_cpu_time_record(&self, record: &CpuTimeRecord) -> StoreResult<()>;

    /// Writes the text behind a SQL digest.
    async fn write_sql_meta(&self, meta: &SqlMeta) -> StoreResult<()>;

    /// Writes the text behind a plan digest.
    async fn write_plan_meta(&self, meta: &PlanMeta) -> StoreResult<()>;

    /// Pushes out anything buffered by previous writes.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
