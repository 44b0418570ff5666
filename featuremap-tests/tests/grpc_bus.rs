use std::time::Duration;

use bytes::Bytes;
use featuremap::{
    bus::{BusServer, GrpcBus},
    error::{ConnectionError, PublishError},
    Bus, ChannelSink, Connection, DeliverPolicy, EngineConfig, FeatureRecord, Headers, LocalBus,
    RenderEvent, SessionConfig, SyncEngine,
};
use futures_util::StreamExt;
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "featuremap.grpc";

struct TestServer {
    url: String,
    bus: LocalBus,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let bus = LocalBus::new();
        let shutdown = CancellationToken::new();
        let server = BusServer::new(bus.clone());
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            server.serve_with_incoming(listener, signal).await.unwrap();
        });
        Ok(Self {
            url,
            bus,
            shutdown,
            task,
        })
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        timeout(Duration::from_secs(5), self.task).await??;
        Ok(())
    }
}

#[tokio::test]
async fn publish_and_replay() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let connection = GrpcBus::new().connect(&server.url).await?;

    for payload in ["a", "b"] {
        connection
            .publish(TOPIC, Bytes::from(payload), Headers::new())
            .await?;
    }
    let mut replay = connection
        .subscribe_ordered(TOPIC, DeliverPolicy::All)
        .await?;
    let mut live = connection
        .subscribe_ordered(TOPIC, DeliverPolicy::New)
        .await?;
    connection
        .publish(TOPIC, Bytes::from("c"), Headers::rollup())
        .await?;

    let mut replayed = Vec::new();
    for _ in 0..3 {
        let message = timeout(Duration::from_secs(5), replay.next()).await?.unwrap()?;
        replayed.push((message.sequence, message.payload));
    }
    assert_eq!(
        replayed,
        vec![
            (1, Bytes::from("a")),
            (2, Bytes::from("b")),
            (3, Bytes::from("c"))
        ]
    );

    let message = timeout(Duration::from_secs(5), live.next()).await?.unwrap()?;
    assert_eq!(message.sequence, 3);
    assert!(message.headers.is_rollup());

    // the rollup dropped everything before it
    let mut replay = connection
        .subscribe_ordered(TOPIC, DeliverPolicy::All)
        .await?;
    let message = timeout(Duration::from_secs(5), replay.next()).await?.unwrap()?;
    assert_eq!(message.sequence, 3);

    drop((replay, live));
    connection.close().await;
    drop(connection);
    server.stop().await
}

#[tokio::test]
async fn closed_connection() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let connection = GrpcBus::new().connect(&server.url).await?;
    let mut subscription = connection
        .subscribe_ordered(TOPIC, DeliverPolicy::All)
        .await?;

    connection.close().await;
    assert!(connection.is_closed());
    assert!(subscription.next().await.is_none());
    assert!(matches!(
        connection
            .publish(TOPIC, Bytes::from("a"), Headers::new())
            .await,
        Err(PublishError::Closed)
    ));

    drop((subscription, connection));
    server.stop().await
}

#[tokio::test]
async fn unreachable_server() -> anyhow::Result<()> {
    // bind and release a port so that nothing is listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    drop(listener);

    assert!(matches!(
        GrpcBus::new().connect(&url).await,
        Err(ConnectionError::Unreachable(_))
    ));
    assert!(matches!(
        GrpcBus::new().connect("not a url").await,
        Err(ConnectionError::Handshake { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn engines_share_a_room_over_grpc() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let config = EngineConfig::default()
        .with_bus_url(server.url.clone())
        .with_throttle_window(Duration::from_millis(5));

    let (alice_sink, _) = ChannelSink::new();
    let mut alice = SyncEngine::new(
        GrpcBus::new(),
        SessionConfig::new("grpc", "alice"),
        config.clone(),
        alice_sink,
    );
    let (bob_sink, mut bob_rendered) = ChannelSink::new();
    let mut bob = SyncEngine::new(
        GrpcBus::new(),
        SessionConfig::new("grpc", "bob"),
        config,
        bob_sink,
    );
    alice.connect().await?;
    bob.connect().await?;

    let pier = FeatureRecord::new("pier", Bytes::from("{}")).with_text("north pier");
    alice.submit_add(pier.clone());
    let rendered = timeout(Duration::from_secs(5), bob_rendered.recv()).await?;
    assert_eq!(rendered, Some(RenderEvent::Upserted(pier.clone())));
    assert_eq!(bob.snapshot().await, vec![pier]);

    // the server's bus retains what the engines published
    let mut retained = server.bus.subscribe_raw(TOPIC, DeliverPolicy::All).await?;
    assert_eq!(retained.next().await.unwrap()?.sequence, 1);
    drop(retained);

    alice.disconnect().await;
    bob.disconnect().await;
    server.stop().await
}
