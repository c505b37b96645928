//! Runs a pool of query workers against a shared budget and reports their latencies.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;
use thiserror::Error;
use tokio::task::JoinSet;
use topsql_types::QueryParams;
use topsql_types::query::ParamsError;
use yansi::Paint;

use crate::budget::{BudgetPolicy, WorkBudget};
use crate::query::{Connector, QueryError, Session};
use crate::worker::{QueryWorker, Randomizer, WorkerReport};

/// Errors that end a benchmark run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A pool needs at least one worker.
    #[error("worker count must be at least 1")]
    NoWorkers,

    /// The initial query parameters are invalid.
    #[error("invalid query parameters: {0}")]
    Params(#[from] ParamsError),

    /// A worker could not open its session.
    #[error("worker {worker} failed to connect: {source}")]
    Connect {
        /// Index of the failing worker.
        worker: usize,
        /// The underlying error.
        source: QueryError,
    },

    /// A worker's one-time session setup failed.
    #[error("worker {worker} failed to configure its session: {source}")]
    Configure {
        /// Index of the failing worker.
        worker: usize,
        /// The underlying error.
        source: QueryError,
    },

    /// A query failed.
    #[error("worker {worker} failed to query: {source}")]
    Query {
        /// Index of the failing worker.
        worker: usize,
        /// The underlying error.
        source: QueryError,
    },

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Latency sketches could not be merged.
    #[error("failed to merge latency metrics: {0}")]
    Metrics(String),
}

/// Parameters of one benchmark run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of concurrent workers, each with its own session.
    pub workers: usize,
    /// Total number of queries shared by all workers.
    pub queries: i64,
    /// Whether workers derive new parameters before every query.
    pub randomize: bool,
    /// Seed for the randomized parameters. Worker `i` uses `seed + i`.
    ///
    /// A random seed is chosen and logged when unset.
    pub seed: Option<u64>,
    /// Randomized queries pick an instance from `0..instance_count`.
    pub instance_count: u32,
    /// Parameters of the first query of every worker.
    pub params: QueryParams,
    /// How workers claim budget.
    pub budget: BudgetPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queries: 100,
            randomize: false,
            seed: None,
            instance_count: 100,
            params: QueryParams::default(),
            budget: BudgetPolicy::Exact,
        }
    }
}

/// Spawns `config.workers` query workers and waits for all of them to stop.
///
/// Every worker opens and configures its own session through `connector` before entering its
/// query loop. The first error of any worker aborts the remaining workers and is returned.
pub async fn run<C: Connector>(
    connector: Arc<C>,
    config: HarnessConfig,
) -> Result<RunReport, HarnessError> {
    if config.workers == 0 {
        return Err(HarnessError::NoWorkers);
    }
    config.params.validate()?;

    let seed = config.seed.unwrap_or_else(rand::random);
    let budget = Arc::new(WorkBudget::new(config.queries, config.budget));
    tracing::info!(
        workers = config.workers,
        queries = config.queries,
        randomize = config.randomize,
        seed,
        policy = ?budget.policy(),
        "starting query workers"
    );

    let start = Instant::now();

    let mut tasks = JoinSet::new();
    for worker in 0..config.workers {
        let randomizer = config.randomize.then(|| {
            Randomizer::seeded(seed.wrapping_add(worker as u64), config.instance_count)
        });
        tasks.spawn(run_worker(
            worker,
            Arc::clone(&connector),
            Arc::clone(&budget),
            config.params,
            randomizer,
        ));
    }

    let mut report = RunReport::new(config.workers);
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(worker) => report.merge(worker)?,
            Err(err) => {
                tracing::error!(error = %err, "aborting remaining workers");
                tasks.abort_all();
                return Err(err);
            }
        }
    }

    report.elapsed = start.elapsed();
    report.budget_remaining = budget.remaining();
    tracing::info!(
        queries = report.queries,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "all workers stopped"
    );
    Ok(report)
}

async fn run_worker<C: Connector>(
    worker: usize,
    connector: Arc<C>,
    budget: Arc<WorkBudget>,
    params: QueryParams,
    randomizer: Option<Randomizer>,
) -> Result<WorkerReport, HarnessError> {
    let mut session = connector
        .connect()
        .await
        .map_err(|source| HarnessError::Connect { worker, source })?;
    session
        .configure()
        .await
        .map_err(|source| HarnessError::Configure { worker, source })?;

    let mut query_worker = QueryWorker::new(worker, session, budget, params);
    if let Some(randomizer) = randomizer {
        query_worker = query_worker.randomized(randomizer);
    }

    query_worker
        .run()
        .await
        .map_err(|source| HarnessError::Query { worker, source })
}

/// Totals of a finished run.
pub struct RunReport {
    /// Number of workers in the pool.
    pub workers: usize,
    /// Queries executed by each worker, indexed by worker.
    pub per_worker: Vec<u64>,
    /// Queries executed by all workers.
    pub queries: u64,
    /// Rows drained by all workers.
    pub rows: u64,
    /// Query latencies in seconds.
    pub timing: DDSketch,
    /// Wall time from spawning the first worker until the last one stopped.
    pub elapsed: Duration,
    /// Final value of the budget counter. Negative after a racy overshoot.
    pub budget_remaining: i64,
}

impl fmt::Debug for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunReport")
            .field("workers", &self.workers)
            .field("per_worker", &self.per_worker)
            .field("queries", &self.queries)
            .field("rows", &self.rows)
            .field("elapsed", &self.elapsed)
            .field("budget_remaining", &self.budget_remaining)
            .finish_non_exhaustive()
    }
}

impl RunReport {
    fn new(workers: usize) -> Self {
        Self {
            workers,
            per_worker: vec![0; workers],
            queries: 0,
            rows: 0,
            timing: DDSketch::default(),
            elapsed: Duration::ZERO,
            budget_remaining: 0,
        }
    }

    fn merge(&mut self, worker: WorkerReport) -> Result<(), HarnessError> {
        self.per_worker[worker.worker] = worker.queries;
        self.queries += worker.queries;
        self.rows += worker.rows;
        self.timing
            .merge(&worker.timing)
            .map_err(|err| HarnessError::Metrics(format!("{err:?}")))
    }

    /// Prints a human readable summary to stdout.
    pub fn print(&self) {
        println!();
        println!(
            "{} ({} workers, {} queries, {} rows)",
            "## QUERIES".bold(),
            self.workers.bold(),
            self.queries.bold().blue(),
            self.rows
        );
        if self.budget_remaining < 0 {
            println!(
                "  {}",
                format!("budget overshot by {}", -self.budget_remaining).yellow()
            );
        }
        if self.timing.count() == 0 {
            return;
        }

        let ops_ps = self.queries as f64 / self.elapsed.as_secs_f64();
        println!("  {:.2} queries/s", ops_ps.bold());
        print_percentiles(&self.timing);
    }
}

fn print_percentiles(sketch: &DDSketch) {
    let quantile = |q| {
        let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(sketch.sum().unwrap_or_default() / sketch.count() as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait::async_trait]
    impl Connector for Unreachable {
        type Session = NeverSession;

        async fn connect(&self) -> Result<NeverSession, QueryError> {
            Err(QueryError::Session("connection refused".into()))
        }
    }

    #[derive(Debug)]
    struct NeverSession;

    #[async_trait::async_trait]
    impl Session for NeverSession {
        async fn configure(&mut self) -> Result<(), QueryError> {
            unreachable!()
        }

        async fn top_sql(&mut self, _params: &QueryParams) -> Result<u64, QueryError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn rejects_empty_pool() {
        let config = HarnessConfig {
            workers: 0,
            ..Default::default()
        };
        let result = run(Arc::new(Unreachable), config).await;
        assert!(matches!(result, Err(HarnessError::NoWorkers)));
    }

    #[tokio::test]
    async fn rejects_invalid_params() {
        let config = HarnessConfig {
            params: QueryParams {
                interval: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = run(Arc::new(Unreachable), config).await;
        assert!(matches!(result, Err(HarnessError::Params(_))));
    }

    #[tokio::test]
    async fn connection_failure_is_fatal() {
        let config = HarnessConfig {
            workers: 3,
            ..Default::default()
        };
        let result = run(Arc::new(Unreachable), config).await;
        assert!(matches!(result, Err(HarnessError::Connect { .. })));
    }
}
