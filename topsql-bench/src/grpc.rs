//! A [`CollectorStream`] over a gRPC bidirectional streaming call.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::transport::{Channel, Endpoint};
use topsql_proto::agent::agent_client::AgentClient;
use topsql_proto::agent::{COLLECT_PATH, CollectResponse, CpuTimeRequest};

use crate::streamer::{CollectorStream, StreamError};

type PendingCall = JoinHandle<Result<tonic::Response<Streaming<CollectResponse>>, tonic::Status>>;

/// The response half of the call.
#[derive(Debug)]
enum Inbound {
    /// The collector has not sent its response headers yet.
    Pending(PendingCall),
    Open(Streaming<CollectResponse>),
    Closed,
}

/// One open `CollectTiDB` call.
///
/// Requests are handed to tonic through a channel with room for a single message, which matches
/// the one-in-flight exchange of the streamer. The call itself runs in a background task, so the
/// first request can go out before the collector answers with its response headers. Those are
/// awaited by the first [`receive`](CollectorStream::receive).
#[derive(Debug)]
pub struct GrpcCollectorStream {
    outbound: mpsc::Sender<CpuTimeRequest>,
    inbound: Inbound,
}

impl GrpcCollectorStream {
    /// Connects to the collector at `addr` (for example `http://127.0.0.1:23333`) and opens the
    /// stream.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, StreamError> {
        let endpoint = Endpoint::from_shared(addr.into())
            .map_err(|err| StreamError::Connect(err.to_string()))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|err| StreamError::Connect(err.to_string()))?;

        Ok(Self::open(channel))
    }

    /// Opens the stream on an existing channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(channel: Channel) -> Self {
        let mut client = AgentClient::new(channel);
        let (outbound, requests) = mpsc::channel(1);
        let call =
            tokio::spawn(async move { client.collect_ti_db(ReceiverStream::new(requests)).await });

        tracing::info!(path = COLLECT_PATH, "opened collector stream");
        Self {
            outbound,
            inbound: Inbound::Pending(call),
        }
    }
}

#[async_trait::async_trait]
impl CollectorStream for GrpcCollectorStream {
    async fn send(&mut self, request: CpuTimeRequest) -> Result<(), StreamError> {
        self.outbound
            .send(request)
            .await
            .map_err(|_| StreamError::Closed)
    }

    async fn receive(&mut self) -> Result<CollectResponse, StreamError> {
        if let Inbound::Pending(call) = &mut self.inbound {
            let result = call.await;
            self.inbound = Inbound::Closed;
            let response = result.map_err(|err| StreamError::Connect(err.to_string()))??;
            tracing::debug!(path = COLLECT_PATH, "collector sent response headers");
            self.inbound = Inbound::Open(response.into_inner());
        }

        match &mut self.inbound {
            Inbound::Open(inbound) => inbound.message().await?.ok_or(StreamError::Closed),
            _ => Err(StreamError::Closed),
        }
    }
}

impl Drop for GrpcCollectorStream {
    fn drop(&mut self) {
        if let Inbound::Pending(call) = &self.inbound {
            call.abort();
        }
    }
}
