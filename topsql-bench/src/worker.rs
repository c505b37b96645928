//! A single query worker and the randomization of its parameters.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sketches_ddsketch::DDSketch;
use topsql_types::QueryParams;

use crate::budget::WorkBudget;
use crate::query::{QueryError, Session};

/// Derives new query parameters from the previous ones.
///
/// Every call scales the window duration by a factor in `[0.5, 1.0)`, the bucket interval and
/// `top_n` by a factor in `[0.5, 1.5)`, and picks a uniformly random instance. The factors apply
/// to whatever the previous call returned, so parameters drift over the life of a worker rather
/// than scattering around the initial values.
#[derive(Debug)]
pub struct Randomizer {
    rng: SmallRng,
    instance_count: u32,
}

impl Randomizer {
    /// Creates a randomizer choosing instances from `0..instance_count`.
    pub fn new(rng: SmallRng, instance_count: u32) -> Self {
        Self {
            rng,
            instance_count,
        }
    }

    /// Creates a randomizer with a deterministic RNG.
    pub fn seeded(seed: u64, instance_count: u32) -> Self {
        Self::new(SmallRng::seed_from_u64(seed), instance_count)
    }

    /// Returns the parameters for the next query.
    ///
    /// `interval` and `top_n` never drop below 1, so the result stays valid.
    pub fn perturb(&mut self, params: &QueryParams) -> QueryParams {
        let duration = scale(params.duration(), 0.5 + 0.5 * self.unit());
        let interval = scale(params.interval, 0.5 + self.unit()).max(1);
        let instance_id = (self.unit() * f64::from(self.instance_count)) as u32;
        let top_n = ((f64::from(params.top_n) * (0.5 + self.unit())) as u32).max(1);

        QueryParams {
            start_ts: params.start_ts,
            end_ts: params.start_ts + duration,
            interval,
            instance_id,
            top_n,
        }
    }

    /// A uniform sample from `[0, 1)`.
    fn unit(&mut self) -> f64 {
        self.rng.random()
    }
}

fn scale(value: i64, factor: f64) -> i64 {
    (value as f64 * factor) as i64
}

/// Lifecycle of a [`QueryWorker`]. A stopped worker never runs again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// The worker claimed budget and ran a query.
    Running,
    /// The budget was exhausted at the last check.
    Stopped,
}

/// What one worker did during a run.
pub struct WorkerReport {
    /// Index of the worker within its pool.
    pub worker: usize,
    /// Number of queries executed.
    pub queries: u64,
    /// Total rows drained over all queries.
    pub rows: u64,
    /// Query latencies in seconds.
    pub timing: DDSketch,
}

impl WorkerReport {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            queries: 0,
            rows: 0,
            timing: DDSketch::default(),
        }
    }

    fn record(&mut self, rows: u64, elapsed: Duration) {
        self.queries += 1;
        self.rows += rows;
        self.timing.add(elapsed.as_secs_f64());
    }
}

impl fmt::Debug for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerReport")
            .field("worker", &self.worker)
            .field("queries", &self.queries)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

/// Runs top-N queries on its own session until the shared budget is used up.
#[derive(Debug)]
pub struct QueryWorker<S> {
    session: S,
    budget: Arc<WorkBudget>,
    params: QueryParams,
    randomizer: Option<Randomizer>,
    report: WorkerReport,
}

impl<S: Session> QueryWorker<S> {
    /// Creates a worker querying with fixed `params`.
    pub fn new(id: usize, session: S, budget: Arc<WorkBudget>, params: QueryParams) -> Self {
        Self {
            session,
            budget,
            params,
            randomizer: None,
            report: WorkerReport::new(id),
        }
    }

    /// Makes the worker derive new parameters before every query.
    pub fn randomized(mut self, randomizer: Randomizer) -> Self {
        self.randomizer = Some(randomizer);
        self
    }

    /// The parameters of the most recent query, or the initial ones before the first query.
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Claims one unit of budget and runs one query with it.
    pub async fn step(&mut self) -> Result<WorkerState, QueryError> {
        if !self.budget.claim() {
            return Ok(WorkerState::Stopped);
        }

        if let Some(randomizer) = &mut self.randomizer {
            self.params = randomizer.perturb(&self.params);
        }

        let worker = self.report.worker;
        tracing::info!(worker, params = ?self.params, "start query");
        let start = Instant::now();
        let rows = self.session.top_sql(&self.params).await?;
        let elapsed = start.elapsed();
        tracing::info!(
            worker,
            rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "finish query"
        );

        self.report.record(rows, elapsed);
        Ok(WorkerState::Running)
    }

    /// Runs queries until the budget is exhausted or a query fails.
    pub async fn run(mut self) -> Result<WorkerReport, QueryError> {
        let worker = self.report.worker;
        tracing::info!(worker, "start worker");

        while self.step().await? == WorkerState::Running {}

        tracing::info!(worker, queries = self.report.queries, "stop worker");
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::budget::BudgetPolicy;

    #[derive(Debug, Default, Clone)]
    struct Recorder {
        params: Arc<Mutex<Vec<QueryParams>>>,
    }

    #[async_trait::async_trait]
    impl Session for Recorder {
        async fn configure(&mut self) -> Result<(), QueryError> {
            Ok(())
        }

        async fn top_sql(&mut self, params: &QueryParams) -> Result<u64, QueryError> {
            self.params.lock().unwrap().push(*params);
            Ok(0)
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait::async_trait]
    impl Session for Broken {
        async fn configure(&mut self) -> Result<(), QueryError> {
            Ok(())
        }

        async fn top_sql(&mut self, _params: &QueryParams) -> Result<u64, QueryError> {
            Err(QueryError::Session("connection reset".into()))
        }
    }

    fn within(value: i64, previous: i64, low: f64, high: f64) -> bool {
        let value = value as f64;
        let previous = previous as f64;
        value >= (previous * low).floor() && value < previous * high
    }

    #[test]
    fn perturbation_stays_within_ratio() {
        let mut randomizer = Randomizer::seeded(7, 100);
        let base = QueryParams {
            start_ts: 1000,
            end_ts: 1000 + 86400,
            interval: 300,
            instance_id: 0,
            top_n: 50,
        };

        for _ in 0..1000 {
            let next = randomizer.perturb(&base);
            assert_eq!(next.start_ts, base.start_ts);
            assert!(within(next.duration(), base.duration(), 0.5, 1.0));
            assert!(within(next.interval, base.interval, 0.5, 1.5));
            assert!(within(next.top_n.into(), base.top_n.into(), 0.5, 1.5));
            assert!(next.instance_id < 100);
            assert_eq!(next.validate(), Ok(()));
        }
    }

    #[test]
    fn perturbation_drifts_from_previous_values() {
        let mut randomizer = Randomizer::seeded(11, 100);
        let mut params = QueryParams::default();

        for _ in 0..50 {
            let next = randomizer.perturb(&params);
            assert!(next.duration() <= params.duration());
            assert!(next.duration() >= params.duration() / 2);
            assert!(next.interval >= 1 && next.top_n >= 1);
            params = next;
        }

        // Fifty factors below one have shrunk the window to nothing.
        assert!(params.duration() < QueryParams::default().duration() / 1000);
    }

    #[test]
    fn same_seed_same_parameters() {
        let mut a = Randomizer::seeded(3, 10);
        let mut b = Randomizer::seeded(3, 10);
        let params = QueryParams::default();
        for _ in 0..10 {
            assert_eq!(a.perturb(&params), b.perturb(&params));
        }
    }

    #[test]
    fn zero_instances_always_picks_zero() {
        let mut randomizer = Randomizer::seeded(5, 0);
        assert_eq!(randomizer.perturb(&QueryParams::default()).instance_id, 0);
    }

    #[tokio::test]
    async fn runs_until_budget_is_spent() {
        let recorder = Recorder::default();
        let budget = Arc::new(WorkBudget::new(4, BudgetPolicy::Exact));
        let params = QueryParams::default();

        let report = QueryWorker::new(0, recorder.clone(), budget.clone(), params)
            .run()
            .await
            .unwrap();

        assert_eq!(report.queries, 4);
        assert_eq!(report.timing.count(), 4);
        assert_eq!(*recorder.params.lock().unwrap(), vec![params; 4]);
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test]
    async fn stopped_worker_stays_stopped() {
        let budget = Arc::new(WorkBudget::new(1, BudgetPolicy::Exact));
        let mut worker =
            QueryWorker::new(0, Recorder::default(), budget.clone(), QueryParams::default());

        assert_eq!(worker.step().await.unwrap(), WorkerState::Running);
        assert_eq!(worker.step().await.unwrap(), WorkerState::Stopped);
        assert_eq!(worker.step().await.unwrap(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn randomized_worker_changes_parameters() {
        let recorder = Recorder::default();
        let budget = Arc::new(WorkBudget::new(5, BudgetPolicy::Exact));

        QueryWorker::new(0, recorder.clone(), budget, QueryParams::default())
            .randomized(Randomizer::seeded(1, 100))
            .run()
            .await
            .unwrap();

        let seen = recorder.params.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|p| *p != QueryParams::default()));
    }

    #[tokio::test]
    async fn params_follow_the_last_query() {
        let recorder = Recorder::default();
        let budget = Arc::new(WorkBudget::new(3, BudgetPolicy::Exact));
        let mut worker = QueryWorker::new(0, recorder.clone(), budget, QueryParams::default())
            .randomized(Randomizer::seeded(2, 10));
        assert_eq!(*worker.params(), QueryParams::default());

        while worker.step().await.unwrap() == WorkerState::Running {
            let last = *recorder.params.lock().unwrap().last().unwrap();
            assert_eq!(*worker.params(), last);
        }

        // A stopped worker keeps the parameters of its last query.
        let seen = recorder.params.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(worker.params(), seen.last().unwrap());
    }

    #[tokio::test]
    async fn query_error_ends_the_worker() {
        let budget = Arc::new(WorkBudget::new(10, BudgetPolicy::Exact));
        let result = QueryWorker::new(0, Broken, budget.clone(), QueryParams::default())
            .run()
            .await;

        assert!(matches!(result, Err(QueryError::Session(_))));
        assert_eq!(budget.remaining(), 9);
    }
}
