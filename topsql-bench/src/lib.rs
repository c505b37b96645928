//! Benchmark harnesses for top-SQL storage backends.
//!
//! Two workloads are driven from here:
//!
//!  - The query harness runs a pool of workers that share a fixed [`budget`] of top-N aggregation
//!    queries against a relational store. Each worker owns one [`query::Session`] and optionally
//!    randomizes the parameters of every query.
//!  - The [`streamer`] pushes synthetic CPU-time entries to a collector over one bidirectional
//!    gRPC stream, waiting for an acknowledgement after every entry.
//!
//! The binary wires both up behind the subcommands in [`cli`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod budget;
pub mod cli;
pub mod config;
pub mod grpc;
pub mod harness;
pub mod observability;
pub mod query;
pub mod streamer;
pub mod worker;

pub use crate::harness::{HarnessConfig, RunReport, run};
