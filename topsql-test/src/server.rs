//! Exposes an in-process gRPC collector for use in integration tests.
//!
//! ```
//! use topsql_test::server::{Headers, TestCollector};
//!
//! #[tokio::main]
//! async fn main() {
//!    let collector = TestCollector::new(Headers::AfterFirstRequest).await;
//!    let url = collector.url();
//!    // connect a stream to the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::codec::Streaming;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use topsql_proto::agent::agent_server::{Agent, AgentServer};
use topsql_proto::agent::{CollectResponse, CpuTimeRequest};

/// When the collector sends its response headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Headers {
    /// As soon as the call arrives.
    Immediately,
    /// Only once the first request has been read and answered.
    AfterFirstRequest,
}

#[derive(Clone, Debug)]
struct Collector {
    headers: Headers,
    received: Arc<Mutex<Vec<CpuTimeRequest>>>,
}

impl Collector {
    async fn answer(
        self,
        mut requests: Streaming<CpuTimeRequest>,
        responses: mpsc::Sender<Result<CollectResponse, Status>>,
    ) {
        while let Ok(Some(request)) = requests.message().await {
            self.received.lock().unwrap().push(request);
            if responses.send(Ok(CollectResponse {})).await.is_err() {
                break;
            }
        }
    }
}

#[tonic::async_trait]
impl Agent for Collector {
    type CollectTiDBStream = ReceiverStream<Result<CollectResponse, Status>>;

    async fn collect_ti_db(
        &self,
        request: Request<Streaming<CpuTimeRequest>>,
    ) -> Result<Response<Self::CollectTiDBStream>, Status> {
        let mut requests = request.into_inner();
        let (responses, stream) = mpsc::channel(1);

        if self.headers == Headers::AfterFirstRequest {
            let Some(first) = requests.message().await? else {
                return Err(Status::cancelled("stream ended before the first request"));
            };
            self.received.lock().unwrap().push(first);
            responses.send(Ok(CollectResponse {})).await.unwrap();
        }

        tokio::spawn(self.clone().answer(requests, responses));
        Ok(Response::new(ReceiverStream::new(stream)))
    }
}

/// An in-process collector that acknowledges every request with one empty response.
///
/// It listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestCollector {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    received: Arc<Mutex<Vec<CpuTimeRequest>>>,
}

impl TestCollector {
    /// Starts a collector that sends its response headers as configured.
    pub async fn new(headers: Headers) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let received = Arc::default();
        let collector = Collector {
            headers,
            received: Arc::clone(&received),
        };

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            Server::builder()
                .add_service(AgentServer::new(collector))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        Self {
            handle,
            socket,
            received,
        }
    }

    /// Returns the URL to connect a stream to.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    /// The requests received so far, in order.
    pub fn received(&self) -> Vec<CpuTimeRequest> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for TestCollector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
