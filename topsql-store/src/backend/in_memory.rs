//! In-memory store for tests.
//!
//! [`MemStore`] appends every write to a per-kind list and keeps them in write order. It makes no
//! attempt at persistence. The store is [`Clone`] so tests can hold a handle for inspection while
//! the code under test owns another.
//!
//! Besides recording writes, it can evaluate the top-N aggregation over the CPU-time records it
//! holds, see [`MemStore::top_sql`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use topsql_types::query::ParamsError;
use topsql_types::{CpuTimeRecord, PlanMeta, QueryParams, SqlMeta, TopSqlRow};

use super::Store;
use crate::error::StoreResult;

#[derive(Debug, Default)]
struct Inner {
    cpu_time_records: Vec<CpuTimeRecord>,
    sql_metas: Vec<SqlMeta>,
    plan_metas: Vec<PlanMeta>,
}

/// A [`Store`] that keeps all writes in memory.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all CPU-time records in write order.
    pub fn cpu_time_records(&self) -> Vec<CpuTimeRecord> {
        self.inner.lock().unwrap().cpu_time_records.clone()
    }

    /// Returns a copy of all SQL metadata in write order.
    pub fn sql_metas(&self) -> Vec<SqlMeta> {
        self.inner.lock().unwrap().sql_metas.clone()
    }

    /// Returns a copy of all plan metadata in write order.
    pub fn plan_metas(&self) -> Vec<PlanMeta> {
        self.inner.lock().unwrap().plan_metas.clone()
    }

    /// Evaluates the top-N query over the stored CPU-time records.
    ///
    /// Samples of `params.instance_id` with a timestamp in `[start_ts, end_ts)` are summed per
    /// bucket and SQL digest. Within each bucket the digests are ordered by that sum, descending,
    /// and the first `top_n` are returned with ranks `1..=top_n`. Equal sums are ordered by
    /// digest here; a real backend is free to order them differently.
    ///
    /// Rows come out ordered by bucket, then by rank. Invalid parameters, such as a zero
    /// interval, are rejected before any record is looked at.
    pub fn top_sql(&self, params: &QueryParams) -> Result<Vec<TopSqlRow>, ParamsError> {
        params.validate()?;
        let inner = self.inner.lock().unwrap();

        let mut sums: BTreeMap<i64, HashMap<&[u8], i64>> = BTreeMap::new();
        let records = inner
            .cpu_time_records
            .iter()
            .filter(|record| record.instance_id() == params.instance_id);
        for record in records {
            for (timestamp, cpu_time) in record.samples() {
                let timestamp = timestamp as i64;
                if timestamp < params.start_ts || timestamp >= params.end_ts {
                    continue;
                }
                let window = timestamp.div_euclid(params.interval);
                *sums
                    .entry(window)
                    .or_default()
                    .entry(record.sql_digest())
                    .or_default() += i64::from(cpu_time);
            }
        }

        let mut rows = Vec::new();
        for (time_window, digests) in sums {
            let mut digests: Vec<_> = digests.into_iter().collect();
            digests.sort_unstable_by(|(a_digest, a_sum), (b_digest, b_sum)| {
                b_sum.cmp(a_sum).then_with(|| a_digest.cmp(b_digest))
            });

            let ranked = digests.into_iter().take(params.top_n as usize).zip(1..);
            for ((sql_digest, cpu_time_sum), rank) in ranked {
                rows.push(TopSqlRow {
                    instance_id: i64::from(params.instance_id),
                    sql_digest: sql_digest.to_vec(),
                    time_window,
                    cpu_time_sum,
                    rank,
                });
            }
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn write_cpu_time_record(&self, record: &CpuTimeRecord) -> StoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .cpu_time_records
            .push(record.clone());
        Ok(())
    }

    async fn write_sql_meta(&self, meta: &SqlMeta) -> StoreResult<()> {
        self.inner.lock().unwrap().sql_metas.push(meta.clone());
        Ok(())
    }

    async fn write_plan_meta(&self, meta: &PlanMeta) -> StoreResult<()> {
        self.inner.lock().unwrap().plan_metas.push(meta.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(instance_id: u32, digest: &str, samples: &[(u64, u32)]) -> CpuTimeRecord {
        CpuTimeRecord::new(
            instance_id,
            digest.as_bytes().to_vec(),
            format!("{digest}_plan").into_bytes(),
            samples.iter().map(|(ts, _)| *ts).collect(),
            samples.iter().map(|(_, cpu)| *cpu).collect(),
        )
        .unwrap()
    }

    async fn store_with(records: &[CpuTimeRecord]) -> MemStore {
        let store = MemStore::new();
        for record in records {
            store.write_cpu_time_record(record).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn keeps_writes_in_order() {
        let store = MemStore::new();
        let sql = |n: u8| SqlMeta {
            sql_digest: vec![n],
            normalized_sql: format!("select {n}"),
        };
        store.write_sql_meta(&sql(2)).await.unwrap();
        store.write_sql_meta(&sql(1)).await.unwrap();
        store
            .write_plan_meta(&PlanMeta {
                plan_digest: vec![9],
                normalized_plan: "scan".into(),
            })
            .await
            .unwrap();

        assert_eq!(store.sql_metas(), vec![sql(2), sql(1)]);
        assert_eq!(store.plan_metas().len(), 1);
        assert!(store.cpu_time_records().is_empty());
    }

    #[tokio::test]
    async fn ranks_digests_per_bucket() {
        let store = store_with(&[
            record(1, "a", &[(0, 10), (5, 10), (12, 1)]),
            record(1, "b", &[(3, 30), (11, 5)]),
            record(1, "c", &[(4, 5)]),
            // other instance, ignored
            record(2, "a", &[(0, 1000)]),
        ])
        .await;

        let params = QueryParams {
            start_ts: 0,
            end_ts: 20,
            interval: 10,
            instance_id: 1,
            top_n: 2,
        };
        let rows = store.top_sql(&params).unwrap();

        let summary: Vec<_> = rows
            .iter()
            .map(|row| {
                (
                    row.time_window,
                    String::from_utf8_lossy(&row.sql_digest).into_owned(),
                    row.cpu_time_sum,
                    row.rank,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "b".to_owned(), 30, 1),
                (0, "a".to_owned(), 20, 2),
                (1, "b".to_owned(), 5, 1),
                (1, "a".to_owned(), 1, 2),
            ]
        );
        assert!(rows.iter().all(|row| row.instance_id == 1));
    }

    #[tokio::test]
    async fn window_end_is_exclusive() {
        let store = store_with(&[record(0, "a", &[(9, 1), (10, 1)])]).await;
        let params = QueryParams {
            start_ts: 0,
            end_ts: 10,
            interval: 100,
            instance_id: 0,
            top_n: 5,
        };

        let rows = store.top_sql(&params).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cpu_time_sum, 1);
    }

    #[tokio::test]
    async fn never_exceeds_top_n_per_bucket() {
        let records: Vec<_> = (0..20)
            .map(|n| record(0, &format!("sql{n}"), &[(n, 7), (n + 50, n as u32)]))
            .collect();
        let store = store_with(&records).await;

        for top_n in 1..6 {
            let params = QueryParams {
                start_ts: 0,
                end_ts: 100,
                interval: 25,
                instance_id: 0,
                top_n,
            };
            let rows = store.top_sql(&params).unwrap();

            let mut per_bucket: BTreeMap<i64, Vec<&TopSqlRow>> = BTreeMap::new();
            for row in &rows {
                per_bucket.entry(row.time_window).or_default().push(row);
            }
            for bucket in per_bucket.values() {
                assert!(bucket.len() <= top_n as usize);
                let ranks: Vec<_> = bucket.iter().map(|row| row.rank).collect();
                assert_eq!(ranks, (1..=bucket.len() as u64).collect::<Vec<_>>());
                assert!(
                    bucket
                        .windows(2)
                        .all(|pair| pair[0].cpu_time_sum >= pair[1].cpu_time_sum)
                );
            }
        }
    }

    #[test]
    fn empty_store_yields_no_rows() {
        let store = MemStore::new();
        assert!(store.top_sql(&QueryParams::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_zero_interval() {
        let store = store_with(&[record(0, "a", &[(1, 1)])]).await;
        let params = QueryParams {
            interval: 0,
            ..Default::default()
        };

        assert_eq!(store.top_sql(&params), Err(ParamsError::Interval(0)));
    }

    #[tokio::test]
    async fn ties_keep_top_n_rows_per_bucket() {
        // "a" and "b" tie for the top in bucket 0 and "c" trails. In bucket 1 all three tie.
        let store = store_with(&[
            record(0, "a", &[(1, 40), (11, 5)]),
            record(0, "b", &[(2, 40), (12, 5)]),
            record(0, "c", &[(3, 10), (13, 5)]),
        ])
        .await;
        let params = QueryParams {
            start_ts: 0,
            end_ts: 20,
            interval: 10,
            instance_id: 0,
            top_n: 2,
        };

        let rows = store.top_sql(&params).unwrap();

        let mut per_bucket: BTreeMap<i64, Vec<&TopSqlRow>> = BTreeMap::new();
        for row in &rows {
            per_bucket.entry(row.time_window).or_default().push(row);
        }
        assert_eq!(per_bucket.len(), 2);
        assert!(per_bucket.values().all(|bucket| bucket.len() == 2));

        // Which of the tied digests wins is up to the backend, only the set is fixed.
        let mut first: Vec<_> = per_bucket[&0].iter().map(|row| row.sql_digest.clone()).collect();
        first.sort();
        assert_eq!(first, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(per_bucket[&0].iter().all(|row| row.cpu_time_sum == 40));

        for row in &per_bucket[&1] {
            assert!([b"a".as_slice(), b"b", b"c"].contains(&row.sql_digest.as_slice()));
            assert_eq!(row.cpu_time_sum, 5);
        }
    }
}
