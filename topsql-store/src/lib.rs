//! Storage side of the top-SQL benchmarks.
//!
//! The [`Store`] trait is the capability set the generator writes through. It has two
//! implementations:
//!
//!  - [`MemStore`] keeps everything in memory and can evaluate the top-N aggregation itself, so it
//!    doubles as a relational backend in tests
//!  - [`InfluxStore`] writes InfluxDB line protocol over HTTP and runs Flux queries
//!
//! The [`generator`] module fabricates the records that get loaded into either store.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod error;
pub mod generator;

pub use crate::backend::Store;
pub use crate::backend::flux::{FluxCursor, FluxRecord};
pub use crate::backend::in_memory::MemStore;
pub use crate::backend::influx::{InfluxConfig, InfluxStore};
pub use crate::error::{StoreError, StoreResult};
