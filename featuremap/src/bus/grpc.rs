//! A [LocalBus] served over gRPC, and the client which talks to it.
//!
//! The server hands out each topic's messages in the order its log accepted
//! them; the client still runs them through a sequencer, so a reordering
//! transport in between costs nothing but latency.

use std::{net::SocketAddr, pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    transport::{Channel, Endpoint, Server},
    Code, Request, Response, Status,
};
use tracing::{debug, info};

use crate::{
    bus::{Bus, BusMessage, Connection, DeliverPolicy, Headers, LocalBus, Subscription},
    constants::DEFAULT_GAP_TIMEOUT,
    error::{BusError, ConnectionError, PublishError, SubscribeError},
    persistence::RetentionLog,
    proto::bus::{
        bus_api_client::BusApiClient,
        bus_api_server::{BusApi, BusApiServer},
        PublishAck, PublishRequest, StreamMessage, SubscribeRequest,
    },
};

type StatusStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Answers the bus RPCs from a [LocalBus].
pub struct BusService<L> {
    bus: LocalBus<L>,
    /// Ends every open subscription stream so the server can drain.
    shutdown: CancellationToken,
}

impl<L: RetentionLog> BusService<L> {
    pub fn new(bus: LocalBus<L>, shutdown: CancellationToken) -> Self {
        Self { bus, shutdown }
    }
}

#[tonic::async_trait]
impl<L: RetentionLog> BusApi for BusService<L> {
    type SubscribeStream = StatusStream<StreamMessage>;

    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishAck>, Status> {
        let PublishRequest {
            topic,
            headers,
            payload,
        } = request.into_inner();
        let message = self
            .bus
            .publish_message(&topic, &payload, headers.into())
            .await?;
        Ok(Response::new(PublishAck {
            sequence: message.sequence,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let SubscribeRequest { topic, deliver_all } = request.into_inner();
        let policy = if deliver_all {
            DeliverPolicy::All
        } else {
            DeliverPolicy::New
        };
        let messages = self.bus.subscribe_raw(&topic, policy).await?;
        let shutdown = self.shutdown.clone();
        let stream = messages
            .map(|result| result.map(StreamMessage::from).map_err(Status::from))
            .take_until(async move { shutdown.cancelled().await });
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Serves a [LocalBus] to [GrpcBus] clients.
pub struct BusServer<L> {
    bus: LocalBus<L>,
}

impl<L: RetentionLog> BusServer<L> {
    pub fn new(bus: LocalBus<L>) -> Self {
        Self { bus }
    }

    /// Bind to `address` and serve until `shutdown` is cancelled.
    pub async fn serve(
        self,
        address: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        info!("Bus server running on {}", address);
        let service = BusService::new(self.bus, shutdown.clone());
        Server::builder()
            .add_service(BusApiServer::new(service))
            .serve_with_shutdown(address, async move { shutdown.cancelled().await })
            .await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve_with_incoming(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        if let Ok(address) = listener.local_addr() {
            info!("Bus server running on {}", address);
        }
        let service = BusService::new(self.bus, shutdown.clone());
        Server::builder()
            .add_service(BusApiServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await
    }
}

/// Connects to a [BusServer].
#[derive(Debug, Clone)]
pub struct GrpcBus {
    gap_timeout: Duration,
}

impl Default for GrpcBus {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcBus {
    pub fn new() -> Self {
        Self {
            gap_timeout: DEFAULT_GAP_TIMEOUT,
        }
    }

    pub fn with_gap_timeout(mut self, gap_timeout: Duration) -> Self {
        self.gap_timeout = gap_timeout;
        self
    }
}

#[async_trait]
impl Bus for GrpcBus {
    type Connection = GrpcConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, ConnectionError> {
        let endpoint =
            Endpoint::from_shared(url.to_string()).map_err(|e| ConnectionError::Handshake {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let channel = endpoint.connect().await.map_err(|e| {
            debug!("Connecting to {} failed: {:?}", url, e);
            ConnectionError::Unreachable(url.to_string())
        })?;
        info!("Connected to bus at {}", url);
        Ok(GrpcConnection {
            client: BusApiClient::new(channel),
            token: CancellationToken::new(),
            gap_timeout: self.gap_timeout,
        })
    }
}

/// A connection to a [BusServer].
pub struct GrpcConnection {
    client: BusApiClient<Channel>,
    token: CancellationToken,
    gap_timeout: Duration,
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        let request = PublishRequest {
            topic: topic.to_string(),
            headers: headers.into(),
            payload: payload.to_vec(),
        };
        let mut client = self.client.clone();
        tokio::select! {
            _ = self.token.cancelled() => Err(PublishError::Closed),
            result = client.publish(request) => {
                let ack = result.map_err(|status| PublishError::Failed {
                    topic: topic.to_string(),
                    reason: status.message().to_string(),
                })?;
                debug!("Published to {} at sequence {}", topic, ack.get_ref().sequence);
                Ok(())
            }
        }
    }

    async fn subscribe_ordered(
        &self,
        topic: &str,
        policy: DeliverPolicy,
    ) -> Result<Subscription, SubscribeError> {
        if self.is_closed() {
            return Err(SubscribeError::Closed);
        }
        let request = SubscribeRequest {
            topic: topic.to_string(),
            deliver_all: policy == DeliverPolicy::All,
        };
        let response = self
            .client
            .clone()
            .subscribe(request)
            .await
            .map_err(|status| match status.code() {
                Code::PermissionDenied | Code::InvalidArgument => SubscribeError::Rejected {
                    topic: topic.to_string(),
                    reason: status.message().to_string(),
                },
                _ => SubscribeError::Bus(status.into()),
            })?;
        let messages = response
            .into_inner()
            .map(|result| result.map(BusMessage::from).map_err(BusError::from));
        Ok(Subscription::new(
            topic,
            Box::pin(messages),
            self.gap_timeout,
            &self.token,
        ))
    }

    async fn close(&self) {
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}
