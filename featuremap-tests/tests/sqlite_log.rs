use std::time::Duration;

use bytes::Bytes;
use featuremap::{
    codec::encode,
    persistence::{sqlite::SqliteLog, RetentionLog},
    Bus, Connection, DeliverPolicy, EngineConfig, Event, FeatureRecord, Headers, LocalBus,
    SessionConfig, SyncEngine,
};
use futures_util::StreamExt;
use sqlx::SqlitePool;
use tokio::time::timeout;

const TOPIC: &str = "featuremap.sqlite";

async fn test_db_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    SqliteLog::migrate(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn empty_topic() {
    let log = SqliteLog::new(test_db_pool().await);
    assert_eq!(log.last_sequence(TOPIC).await.unwrap(), None);
    assert!(log.retained(TOPIC).await.unwrap().is_empty());
}

#[tokio::test]
async fn append_and_read_back() -> anyhow::Result<()> {
    let log = SqliteLog::new(test_db_pool().await);
    let mut headers = Headers::new();
    headers.insert("origin", "me");

    let first = log.append(TOPIC, 10, &headers, b"one", false).await?;
    let second = log.append(TOPIC, 20, &Headers::new(), b"two", false).await?;
    log.append("featuremap.other", 30, &Headers::new(), b"x", false)
        .await?;

    assert_eq!((first.sequence, second.sequence), (1, 2));
    assert_eq!(log.retained(TOPIC).await?, vec![first.clone(), second]);
    assert_eq!(first.headers.get("origin"), Some("me"));
    assert_eq!(first.payload, Bytes::from_static(b"one"));
    assert_eq!(log.last_sequence(TOPIC).await?, Some(2));
    assert_eq!(log.last_sequence("featuremap.other").await?, Some(1));
    Ok(())
}

#[tokio::test]
async fn rollup_discards_earlier_messages() -> anyhow::Result<()> {
    let log = SqliteLog::new(test_db_pool().await);
    for i in 0..5 {
        log.append(TOPIC, i, &Headers::new(), b"add", false).await?;
    }
    let anchor = log.append(TOPIC, 5, &Headers::rollup(), b"clear", true).await?;
    let after = log.append(TOPIC, 6, &Headers::new(), b"add", false).await?;

    // sequences carry on past the rollup
    assert_eq!(anchor.sequence, 6);
    assert_eq!(log.retained(TOPIC).await?, vec![anchor, after]);
    assert_eq!(log.last_sequence(TOPIC).await?, Some(7));
    Ok(())
}

#[tokio::test]
async fn connect_migrates() -> anyhow::Result<()> {
    let log = SqliteLog::connect("sqlite::memory:").await?;
    log.append(TOPIC, 0, &Headers::new(), b"one", false).await?;
    assert_eq!(log.retained(TOPIC).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn history_outlives_the_bus() -> anyhow::Result<()> {
    let pool = test_db_pool().await;
    let record = FeatureRecord::new("a", Bytes::from_static(b"{}")).with_color("red");

    let bus = LocalBus::with_log(SqliteLog::new(pool.clone()));
    let connection = bus.connect("sqlite").await?;
    connection
        .publish(TOPIC, encode("me", &Event::AddFeature(record.clone())), Headers::new())
        .await?;
    connection.close().await;
    drop(bus);

    // a new bus over the same database replays it
    let bus = LocalBus::with_log(SqliteLog::new(pool));
    let mut replay = bus.subscribe_raw(TOPIC, DeliverPolicy::All).await?;
    let message = timeout(Duration::from_secs(5), replay.next()).await?.unwrap()?;
    assert_eq!(message.sequence, 1);

    let config = EngineConfig::default().with_throttle_window(Duration::from_millis(5));
    let mut engine = SyncEngine::new(bus, SessionConfig::new("sqlite", "you"), config, ());
    engine.connect().await?;
    let mut positions = engine.subscribe_positions();
    timeout(Duration::from_secs(5), positions.wait_for(|p| p.current >= 1)).await??;
    assert_eq!(engine.snapshot().await, vec![record]);
    Ok(())
}
