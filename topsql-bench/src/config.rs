//! Configuration for the benchmark binary.
//!
//! Configuration is merged from the following sources, later ones overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `TOPSQL__`)
//!
//! Command line flags of the individual subcommands are applied on top of the loaded values.
//!
//! # Environment Variables
//!
//! Environment variables use `TOPSQL__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `TOPSQL__TIDB__DSN=mysql://root@10.0.0.1:4000/test` sets the TiDB connection URL
//! - `TOPSQL__TIDB__PARAMS__TOP_N=10` sets the number of digests per bucket
//! - `TOPSQL__INFLUX__TOKEN=secret` sets the InfluxDB API token
//!
//! # YAML Configuration File
//!
//! ```yaml
//! tidb:
//!   dsn: mysql://root@10.0.0.1:4000/test
//!   workers: 20
//!   budget: racy
//!   params:
//!     top_n: 10
//!
//! influx:
//!   token: secret
//! ```

use std::path::Path;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::SecretBox;
use serde::{Deserialize, Serialize};
use topsql_store::InfluxConfig;
use topsql_store::generator::GeneratorConfig;
use topsql_types::{ConfigSecret, QueryParams};

use crate::budget::BudgetPolicy;
use crate::harness::HarnessConfig;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TOPSQL__";

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads of the runtime.
    ///
    /// Query workers are tasks on this runtime, so more threads than workers gain nothing.
    ///
    /// # Default
    ///
    /// The number of logical CPUs of the host.
    ///
    /// # Environment Variable
    ///
    /// `TOPSQL__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// The TiDB query benchmark.
///
/// Used in: [`Config::tidb`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TiDb {
    /// MySQL connection URL of the TiDB server.
    ///
    /// The URL may carry a password and is redacted from debug output.
    ///
    /// # Environment Variable
    ///
    /// `TOPSQL__TIDB__DSN`
    pub dsn: SecretBox<ConfigSecret>,

    /// Number of concurrent workers, each holding one connection.
    pub workers: usize,

    /// Total number of queries, shared by all workers.
    pub queries: i64,

    /// Derive new query parameters before every query.
    pub randomize: bool,

    /// Seed for randomized parameters. A random seed is logged when unset.
    pub seed: Option<u64>,

    /// Randomized queries pick instances from `0..instance_count`.
    pub instance_count: u32,

    /// How workers claim the query budget: `exact` or `racy`.
    pub budget: BudgetPolicy,

    /// Parameters of the first query of every worker.
    pub params: QueryParams,
}

impl Default for TiDb {
    fn default() -> Self {
        let harness = HarnessConfig::default();
        Self {
            dsn: SecretBox::new(Box::new(ConfigSecret::from(
                "mysql://root@127.0.0.1:4000/test",
            ))),
            workers: harness.workers,
            queries: harness.queries,
            randomize: harness.randomize,
            seed: harness.seed,
            instance_count: harness.instance_count,
            budget: harness.budget,
            params: harness.params,
        }
    }
}

impl TiDb {
    /// The run described by this section.
    pub fn harness(&self) -> HarnessConfig {
        HarnessConfig {
            workers: self.workers,
            queries: self.queries,
            randomize: self.randomize,
            seed: self.seed,
            instance_count: self.instance_count,
            params: self.params,
            budget: self.budget,
        }
    }
}

/// The streaming collector the `stream` command sends to.
///
/// Used in: [`Config::collector`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Collector {
    /// gRPC endpoint of the collector.
    ///
    /// # Environment Variable
    ///
    /// `TOPSQL__COLLECTOR__ADDR`
    pub addr: String,

    /// Number of synthetic entries in a batch.
    pub batch_len: usize,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            addr: "http://127.0.0.1:23333".to_owned(),
            batch_len: 10,
        }
    }
}

/// Benchmark configuration.
///
/// See the module documentation for how values are loaded.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Tokio runtime settings.
    pub runtime: Runtime,

    /// Relational store and query workload.
    pub tidb: TiDb,

    /// Time-series store.
    pub influx: InfluxConfig,

    /// Streaming collector.
    pub collector: Collector,

    /// Synthetic data written by `write-influx`.
    pub generator: GeneratorConfig,
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file at `path` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
