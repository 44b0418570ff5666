use prost::Message;
use sqlx::{Row, SqlitePool};

use super::error::SqlError;
use crate::{
    bus::{BusMessage, Headers},
    persistence::RetentionLog,
    proto::bus::StreamMessage,
};

/// A retention log backed by sqlite. Each row holds the protobuf encoded
/// [StreamMessage] as it is sent to subscribers.
pub struct SqliteLog {
    /// Connection pool
    pool: SqlitePool,
}

impl SqliteLog {
    /// Wrap a pool whose database has already been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and bring its schema up to date.
    pub async fn connect(url: &str) -> Result<Self, SqlError> {
        let pool = SqlitePool::connect(url).await?;
        Self::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), SqlError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RetentionLog for SqliteLog {
    type Error = SqlError;

    async fn append(
        &self,
        topic: &str,
        timestamp: i64,
        headers: &Headers,
        payload: &[u8],
        rollup: bool,
    ) -> Result<BusMessage, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let last = sqlx::query(
            r#"
                SELECT last_sequence
                FROM bus_topic
                WHERE topic = ?1
            "#,
        )
        .bind(topic)
        .fetch_optional(&mut tx)
        .await?
        .map(|r| r.get::<i64, _>("last_sequence"))
        .unwrap_or(0);
        let sequence = last + 1;

        sqlx::query(
            r#"
                INSERT INTO bus_topic (topic, last_sequence)
                VALUES (?1, ?2)
                ON CONFLICT (topic) DO UPDATE SET last_sequence = excluded.last_sequence
            "#,
        )
        .bind(topic)
        .bind(sequence)
        .execute(&mut tx)
        .await?;

        if rollup {
            sqlx::query(
                r#"
                    DELETE FROM bus_log
                    WHERE topic = ?1
                "#,
            )
            .bind(topic)
            .execute(&mut tx)
            .await?;
        }

        let message = BusMessage {
            sequence: sequence as u64,
            timestamp,
            topic: topic.to_string(),
            headers: headers.clone(),
            payload: payload.to_vec().into(),
        };
        let raw = StreamMessage::from(message.clone()).encode_to_vec();
        sqlx::query(
            r#"
                INSERT INTO bus_log (topic, sequence, ts, raw)
                VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(topic)
        .bind(sequence)
        .bind(timestamp)
        .bind(raw)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn retained(&self, topic: &str) -> Result<Vec<BusMessage>, Self::Error> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"
                SELECT raw
                FROM bus_log
                WHERE topic = ?1
                ORDER BY sequence
            "#,
        )
        .bind(topic)
        .fetch_all(&mut conn)
        .await?;
        // TODO: stream rows straight from the connection instead of loading
        //  the whole log in to memory; replays of long-lived rooms are big.
        rows.iter()
            .map(|row| -> Result<BusMessage, SqlError> {
                let raw = row.get::<Vec<u8>, _>("raw");
                Ok(StreamMessage::decode(raw.as_slice())?.into())
            })
            .collect()
    }

    async fn last_sequence(&self, topic: &str) -> Result<Option<u64>, Self::Error> {
        let mut conn = self.pool.acquire().await?;
        let maybe_row = sqlx::query(
            r#"
                SELECT last_sequence
                FROM bus_topic
                WHERE topic = ?1
            "#,
        )
        .bind(topic)
        .fetch_optional(&mut conn)
        .await?;
        Ok(maybe_row.map(|r| r.get::<i64, _>("last_sequence") as u64))
    }
}
