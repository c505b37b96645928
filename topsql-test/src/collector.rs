//! A scripted collector stream.
//!
//! [`ScriptedCollector`] acknowledges every request it receives and records the exchange as a
//! list of [`Event`]s. Failures can be injected at a given send or receive.

use topsql_bench::streamer::{CollectorStream, StreamError};
use topsql_proto::agent::{CollectResponse, CpuTimeRequest};

/// One half of an exchange, as seen by the collector.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A request arrived.
    Sent(CpuTimeRequest),
    /// A response was handed out.
    Received,
}

/// A [`CollectorStream`] that answers every request with an empty response.
#[derive(Debug, Default)]
pub struct ScriptedCollector {
    events: Vec<Event>,
    send_attempts: usize,
    receive_attempts: usize,
    pending: usize,
    fail_send_at: Option<usize>,
    fail_receive_at: Option<usize>,
}

impl ScriptedCollector {
    /// Creates a collector that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the send with the given zero-based index.
    pub fn fail_send_at(mut self, index: usize) -> Self {
        self.fail_send_at = Some(index);
        self
    }

    /// Fails the receive with the given zero-based index.
    pub fn fail_receive_at(mut self, index: usize) -> Self {
        self.fail_receive_at = Some(index);
        self
    }

    /// All successful sends and receives, in order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The requests that arrived, in order.
    pub fn requests(&self) -> Vec<&CpuTimeRequest> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Sent(request) => Some(request),
                Event::Received => None,
            })
            .collect()
    }

    /// Number of sends attempted, including a failed one.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts
    }

    /// Number of receives attempted, including a failed one.
    pub fn receive_attempts(&self) -> usize {
        self.receive_attempts
    }

    /// Whether a request was sent while the previous one was still unanswered.
    pub fn overlapped(&self) -> bool {
        self.events
            .windows(2)
            .any(|pair| matches!(pair, [Event::Sent(_), Event::Sent(_)]))
    }
}

#[async_trait::async_trait]
impl CollectorStream for ScriptedCollector {
    async fn send(&mut self, request: CpuTimeRequest) -> Result<(), StreamError> {
        let index = self.send_attempts;
        self.send_attempts += 1;
        if self.fail_send_at == Some(index) {
            return Err(StreamError::Closed);
        }

        self.events.push(Event::Sent(request));
        self.pending += 1;
        Ok(())
    }

    async fn receive(&mut self) -> Result<CollectResponse, StreamError> {
        let index = self.receive_attempts;
        self.receive_attempts += 1;
        if self.fail_receive_at == Some(index) || self.pending == 0 {
            return Err(StreamError::Closed);
        }

        self.pending -= 1;
        self.events.push(Event::Received);
        Ok(CollectResponse {})
    }
}
