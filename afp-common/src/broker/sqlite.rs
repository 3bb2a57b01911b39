//! SQLite-backed durable message broker
//!
//! Same contract as the in-memory broker, with queue contents surviving a
//! process restart. Work-queue consumption removes the head row with a
//! single `DELETE ... RETURNING` statement, which is what makes competing
//! consumers exactly-once: two concurrent consumers can never delete the
//! same row. Fan-out publish copies the payload into one inbox row per
//! registered subscription inside one statement, so a subscription
//! registered mid-publish either sees the whole message or none of it.
//!
//! The bounded-timeout consume polls the queue with short sleeps up to the
//! deadline; the underlying storage I/O is the suspension point here, not
//! an in-process wakeup.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{Error, Result};
use crate::messages::Message;

use super::{FanoutInbox, FanoutSubscription, MessageBroker};

/// Poll interval for a blocking `consume_work` against the database
const CONSUME_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Durable broker backed by a SQLite database file
pub struct SqliteBroker {
    pool: SqlitePool,
}

impl SqliteBroker {
    /// Open (creating if needed) the broker database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        // WAL allows concurrent readers alongside the consuming writer
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        let broker = Self { pool };
        broker.ensure_schema().await?;
        info!("Opened broker database: {}", db_path.display());
        Ok(broker)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_messages (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                queue   TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_work_messages_queue
             ON work_messages (queue, id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fanout_subscriptions (
                id    INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fanout_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL
                    REFERENCES fanout_subscriptions(id) ON DELETE CASCADE,
                payload         TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fanout_messages_subscription
             ON fanout_messages (subscription_id, id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically remove and return the head row of a queue
    async fn pop_head(&self, queue: &str) -> Result<Option<Message>> {
        let row: Option<(String,)> = sqlx::query_as(
            "DELETE FROM work_messages
             WHERE id = (
                 SELECT id FROM work_messages
                 WHERE queue = ?
                 ORDER BY id
                 LIMIT 1
             )
             RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(payload,)| decode_payload(&payload)).transpose()
    }
}

fn decode_payload(payload: &str) -> Result<Message> {
    serde_json::from_str(payload)
        .map_err(|e| Error::Validation(format!("stored payload is not valid JSON: {e}")))
}

fn encode_payload(message: &Message) -> String {
    message.to_string()
}

#[async_trait]
impl MessageBroker for SqliteBroker {
    async fn publish_work(&self, queue: &str, message: Message) -> Result<()> {
        sqlx::query("INSERT INTO work_messages (queue, payload) VALUES (?, ?)")
            .bind(queue)
            .bind(encode_payload(&message))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_work(&self, queue: &str, timeout: Duration) -> Result<Option<Message>> {
        if let Some(message) = self.pop_head(queue).await? {
            return Ok(Some(message));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::time::sleep(CONSUME_POLL_INTERVAL).await;
            if let Some(message) = self.pop_head(queue).await? {
                return Ok(Some(message));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM work_messages WHERE queue = ?")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn subscribe_fanout(&self, topic: &str) -> Result<FanoutSubscription> {
        let (subscription_id,): (i64,) =
            sqlx::query_as("INSERT INTO fanout_subscriptions (topic) VALUES (?) RETURNING id")
                .bind(topic)
                .fetch_one(&self.pool)
                .await?;
        Ok(Box::new(SqliteInbox {
            pool: self.pool.clone(),
            subscription_id,
        }))
    }

    async fn publish_fanout(&self, topic: &str, message: Message) -> Result<()> {
        // One statement copies the payload to every current subscription;
        // zero subscriptions means zero rows, silently.
        sqlx::query(
            "INSERT INTO fanout_messages (subscription_id, payload)
             SELECT id, ? FROM fanout_subscriptions WHERE topic = ?",
        )
        .bind(encode_payload(&message))
        .bind(topic)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fanout_subscriptions WHERE topic = ?")
                .bind(topic)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn purge_all(&self) -> Result<()> {
        // Work-queue contents only; subscriptions and their pending inbox
        // rows survive, matching the in-memory adapter.
        sqlx::query("DELETE FROM work_messages")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

struct SqliteInbox {
    pool: SqlitePool,
    subscription_id: i64,
}

#[async_trait]
impl FanoutInbox for SqliteInbox {
    async fn try_next(&mut self) -> Result<Option<Message>> {
        let row: Option<(String,)> = sqlx::query_as(
            "DELETE FROM fanout_messages
             WHERE id = (
                 SELECT id FROM fanout_messages
                 WHERE subscription_id = ?
                 ORDER BY id
                 LIMIT 1
             )
             RETURNING payload",
        )
        .bind(self.subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(payload,)| decode_payload(&payload)).transpose()
    }
}
