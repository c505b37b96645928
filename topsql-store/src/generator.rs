//! Fabricates top-SQL records for loading into a [`Store`].
//!
//! Every instance runs the same number of distinct statements. Statement `n` on instance `i` has
//! the SQL digest `i{i}_sql{n}` and the plan digest `i{i}_plan{n}`, so the metadata generated
//! here resolves every digest that appears in the CPU-time records.
//!
//! All randomness comes from a [`SmallRng`] seeded with [`GeneratorConfig::seed`], so the same
//! configuration always yields the same data.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use topsql_types::{CpuTimeRecord, PlanMeta, SqlMeta};

use crate::backend::Store;
use crate::error::StoreResult;

/// Upper bound (exclusive) of a fabricated CPU-time sample in milliseconds.
const MAX_CPU_TIME_MS: u32 = 1000;
/// Metadata texts grow by a random multiple of this many bytes.
const META_JITTER_STEP: usize = 1000;
/// Number of distinct multiples of [`META_JITTER_STEP`].
const META_JITTER_STEPS: usize = 1024;

/// Shape of the fabricated data set.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of instances reporting data.
    pub instances: u32,
    /// Number of distinct statements per instance.
    pub sqls: u32,
    /// First timestamp, inclusive.
    pub start_ts: u64,
    /// Last timestamp, exclusive.
    pub end_ts: u64,
    /// Minimum length of a normalized SQL or plan text in bytes.
    pub meta_base_len: usize,
    /// Whether metadata texts get a random extra length on top of `meta_base_len`.
    pub meta_jitter: bool,
    /// Seed for all random values.
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            instances: 100,
            sqls: 200,
            start_ts: 0,
            end_ts: 100,
            meta_base_len: 100 * 1024,
            meta_jitter: true,
            seed: 0,
        }
    }
}

/// Produces records according to a [`GeneratorConfig`].
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    /// Creates a generator for the given data set shape.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Yields one record per timestamp, instance and statement, ordered by timestamp.
    ///
    /// Each record carries a single sample with a CPU time in `[0, 1000)` milliseconds.
    pub fn cpu_time_records(&self) -> impl Iterator<Item = CpuTimeRecord> + '_ {
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let config = &self.config;

        (config.start_ts..config.end_ts).flat_map(move |ts| {
            let samples: Vec<u32> = (0..config.instances * config.sqls)
                .map(|_| rng.random_range(0..MAX_CPU_TIME_MS))
                .collect();
            self.digests().zip(samples).map(move |((i, n), cpu_time)| {
                CpuTimeRecord::single(i, sql_digest(i, n), plan_digest(i, n), ts, cpu_time)
            })
        })
    }

    /// Yields the normalized SQL text of every statement.
    pub fn sql_metas(&self) -> impl Iterator<Item = SqlMeta> + '_ {
        let mut rng = SmallRng::seed_from_u64(self.config.seed.wrapping_add(1));
        self.digests().map(move |(i, n)| {
            let sql_digest = sql_digest(i, n);
            let len = self.meta_len(&mut rng);
            SqlMeta {
                normalized_sql: padded_text(&sql_digest, len),
                sql_digest,
            }
        })
    }

    /// Yields the normalized plan text of every statement.
    pub fn plan_metas(&self) -> impl Iterator<Item = PlanMeta> + '_ {
        let mut rng = SmallRng::seed_from_u64(self.config.seed.wrapping_add(2));
        self.digests().map(move |(i, n)| {
            let plan_digest = plan_digest(i, n);
            let len = self.meta_len(&mut rng);
            PlanMeta {
                normalized_plan: padded_text(&plan_digest, len),
                plan_digest,
            }
        })
    }

    fn digests(&self) -> impl Iterator<Item = (u32, u32)> + use<> {
        let sqls = self.config.sqls;
        (0..self.config.instances).flat_map(move |i| (0..sqls).map(move |n| (i, n)))
    }

    fn meta_len(&self, rng: &mut SmallRng) -> usize {
        let jitter = if self.config.meta_jitter {
            rng.random_range(0..META_JITTER_STEPS) * META_JITTER_STEP
        } else {
            0
        };
        self.config.meta_base_len + jitter
    }
}

/// Writes the complete data set into `store` and flushes it.
///
/// Returns the number of CPU-time records written.
pub async fn load(store: &dyn Store, generator: &Generator) -> StoreResult<u64> {
    let mut records = 0;
    for record in generator.cpu_time_records() {
        store.write_cpu_time_record(&record).await?;
        records += 1;
        if records % 100_000 == 0 {
            tracing::info!(records, "writing cpu time records");
        }
    }
    tracing::info!(records, "finished cpu time records");

    for meta in generator.sql_metas() {
        store.write_sql_meta(&meta).await?;
    }
    for meta in generator.plan_metas() {
        store.write_plan_meta(&meta).await?;
    }
    tracing::info!("finished sql and plan metadata");

    store.flush().await?;
    Ok(records)
}

fn sql_digest(instance: u32, n: u32) -> Vec<u8> {
    format!("i{instance}_sql{n}").into_bytes()
}

fn plan_digest(instance: u32, n: u32) -> Vec<u8> {
    format!("i{instance}_plan{n}").into_bytes()
}

/// The digest followed by `o` padding, `len` bytes in total.
fn padded_text(digest: &[u8], len: usize) -> String {
    let digest = String::from_utf8_lossy(digest);
    let padding = len.saturating_sub(digest.len());
    format!("{digest}{}", "o".repeat(padding))
}
