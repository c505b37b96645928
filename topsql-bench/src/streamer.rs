//! Sends CPU-time batches to a collector, one acknowledged request at a time.
//!
//! The streamer owns one open bidirectional stream and never has more than one request in
//! flight: it sends an entry, waits for the collector's response, and only then sends the next
//! entry. The first failing send or receive ends the batch. Nothing is retried and the stream is
//! not reopened, which suits a load generator but not a production client.

use std::time::{Duration, Instant};

use thiserror::Error;
use topsql_proto::agent::{CollectResponse, CpuTimeRequest};

/// Statement text attached to every synthetic entry.
pub const SYNTHETIC_SQL: &str = "select ? from t1";

/// Errors of an individual send or receive on a collector stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream could not be opened.
    #[error("failed to open stream: {0}")]
    Connect(String),

    /// The peer answered with a gRPC error status.
    #[error("stream failed: {0}")]
    Status(#[from] tonic::Status),

    /// The stream was closed before the exchange completed.
    #[error("stream closed")]
    Closed,
}

/// A failed batch, naming the entry and the half of the exchange that failed.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Sending the entry failed. The entry was not acknowledged.
    #[error("send stream request {entry} failed: {source}")]
    Send {
        /// Index of the entry within the batch.
        entry: usize,
        /// The underlying stream error.
        source: StreamError,
    },

    /// Receiving the acknowledgement for the entry failed.
    #[error("receive stream response {entry} failed: {source}")]
    Receive {
        /// Index of the entry within the batch.
        entry: usize,
        /// The underlying stream error.
        source: StreamError,
    },
}

/// One open bidirectional stream to a collector.
#[async_trait::async_trait]
pub trait CollectorStream: Send {
    /// Sends a single request.
    async fn send(&mut self, request: CpuTimeRequest) -> Result<(), StreamError>;

    /// Waits for the next response.
    async fn receive(&mut self) -> Result<CollectResponse, StreamError>;
}

/// Builds `len` synthetic entries.
///
/// Entry `i` holds the single sample `(i, i * 100)` for [`SYNTHETIC_SQL`]. The CPU time wraps
/// around once it no longer fits into 32 bits.
pub fn synthetic_batch(len: usize) -> Vec<CpuTimeRequest> {
    (0..len).map(synthetic_entry).collect()
}

fn synthetic_entry(i: usize) -> CpuTimeRequest {
    CpuTimeRequest {
        timestamps: vec![i as u64],
        cpu_times: vec![(i as u32).wrapping_mul(100)],
        normalized_sql: SYNTHETIC_SQL.to_owned(),
    }
}

/// Outcome of a completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of acknowledged entries.
    pub acknowledged: usize,
    /// Wall time of the whole batch.
    pub elapsed: Duration,
}

/// Drives the strict send/acknowledge exchange on a [`CollectorStream`].
#[derive(Debug)]
pub struct BatchStreamer<S> {
    stream: S,
}

impl<S: CollectorStream> BatchStreamer<S> {
    /// Wraps an already open stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Sends every entry of `batch` in order, waiting for each acknowledgement.
    ///
    /// Right before an entry goes out, its first timestamp is advanced by one second, wrapping
    /// around at `u64::MAX`. Entries after a failed one are never sent.
    pub async fn send_batch(
        &mut self,
        batch: Vec<CpuTimeRequest>,
    ) -> Result<BatchReport, BatchError> {
        let start = Instant::now();
        let mut acknowledged = 0;

        for (entry, mut request) in batch.into_iter().enumerate() {
            if let Some(timestamp) = request.timestamps.first_mut() {
                *timestamp = timestamp.wrapping_add(1);
            }

            self.stream
                .send(request)
                .await
                .map_err(|source| BatchError::Send { entry, source })?;
            let response = self
                .stream
                .receive()
                .await
                .map_err(|source| BatchError::Receive { entry, source })?;

            tracing::debug!(entry, ?response, "received stream response");
            acknowledged += 1;
        }

        let elapsed = start.elapsed();
        tracing::info!(
            acknowledged,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch acknowledged"
        );
        Ok(BatchReport {
            acknowledged,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_entries_grow_linearly() {
        let batch = synthetic_batch(10);

        assert_eq!(batch.len(), 10);
        for (i, request) in batch.iter().enumerate() {
            assert_eq!(request.timestamps, vec![i as u64]);
            assert_eq!(request.cpu_times, vec![i as u32 * 100]);
            assert_eq!(request.normalized_sql, SYNTHETIC_SQL);
        }
    }

    #[test]
    fn empty_synthetic_batch() {
        assert!(synthetic_batch(0).is_empty());
    }

    #[test]
    fn synthetic_cpu_time_wraps() {
        let entry = synthetic_entry(42_949_673);

        assert_eq!(entry.timestamps, vec![42_949_673]);
        assert_eq!(entry.cpu_times, vec![4]);
    }

    #[derive(Debug, Default)]
    struct Echo {
        sent: Vec<CpuTimeRequest>,
        pending: usize,
    }

    #[async_trait::async_trait]
    impl CollectorStream for Echo {
        async fn send(&mut self, request: CpuTimeRequest) -> Result<(), StreamError> {
            assert_eq!(self.pending, 0, "sent before the previous response");
            self.sent.push(request);
            self.pending += 1;
            Ok(())
        }

        async fn receive(&mut self) -> Result<CollectResponse, StreamError> {
            if self.pending == 0 {
                return Err(StreamError::Closed);
            }
            self.pending -= 1;
            Ok(CollectResponse {})
        }
    }

    #[tokio::test]
    async fn advances_first_timestamp_at_send_time() {
        let mut batch = synthetic_batch(3);
        batch[1].timestamps.push(77);
        batch.push(CpuTimeRequest::default());

        let mut streamer = BatchStreamer::new(Echo::default());
        let report = streamer.send_batch(batch).await.unwrap();
        assert_eq!(report.acknowledged, 4);

        let sent = streamer.into_inner().sent;
        assert_eq!(sent[0].timestamps, vec![1]);
        assert_eq!(sent[1].timestamps, vec![2, 77]);
        assert_eq!(sent[2].timestamps, vec![3]);
        assert!(sent[3].timestamps.is_empty());
    }

    #[tokio::test]
    async fn last_timestamp_wraps_around() {
        let mut batch = synthetic_batch(1);
        batch[0].timestamps[0] = u64::MAX;

        let mut streamer = BatchStreamer::new(Echo::default());
        streamer.send_batch(batch).await.unwrap();

        assert_eq!(streamer.into_inner().sent[0].timestamps, vec![0]);
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let mut streamer = BatchStreamer::new(Echo::default());
        let report = streamer.send_batch(vec![]).await.unwrap();

        assert_eq!(report.acknowledged, 0);
        assert!(streamer.into_inner().sent.is_empty());
    }
}
