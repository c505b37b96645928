//! Shared data model for the top-SQL benchmarking tools.
//!
//! This crate holds the types that flow between the generator, the stores and the query harness:
//!
//!  - [`record`] contains the fabricated CPU-time samples and their SQL/plan metadata
//!  - [`query`] contains the parameters and result rows of the top-N aggregation query
//!  - [`secret`] wraps credentials so they never show up in debug output
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod query;
pub mod record;
pub mod secret;

pub use crate::query::{QueryParams, TopSqlRow};
pub use crate::record::{CpuTimeRecord, PlanMeta, SqlMeta};
pub use crate::secret::ConfigSecret;
