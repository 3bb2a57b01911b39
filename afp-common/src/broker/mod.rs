//! Message broker abstraction
//!
//! Provides the two delivery semantics the pipeline is built on:
//!
//! Work queue (competing consumers)
//!   Multiple consumers share one named queue. Each message is delivered to
//!   exactly one consumer: across N simultaneous consumers the set of
//!   delivered messages equals the set published, with no duplicates and no
//!   silent drops while the queue is non-empty.
//!
//! Fan-out topic (pub/sub)
//!   Every subscriber registered on a topic receives its own independent,
//!   ordered copy of each message published after the subscription was
//!   registered. Messages published before `subscribe_fanout` returns are
//!   never delivered to that subscriber, so every fan-out consumer must
//!   subscribe before its upstream producer starts publishing — the broker
//!   cannot detect a violation, it just silently loses the messages.
//!
//! Two adapters implement the contract: [`memory::InMemoryBroker`] for
//! in-process use and [`sqlite::SqliteBroker`] for durability across
//! restarts. Producer, stage, and writer logic never depend on which one is
//! behind the trait; the same contract test suite runs against both.

pub mod memory;
#[cfg(feature = "sqlx")]
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::messages::Message;

pub use memory::InMemoryBroker;
#[cfg(feature = "sqlx")]
pub use sqlite::SqliteBroker;

/// A per-subscriber fan-out inbox handle.
///
/// The only operation consumers need is a non-blocking drain; `try_next`
/// returns `Ok(None)` once the inbox is empty. A dead transport surfaces as
/// `Unavailable`, never as an empty inbox.
#[async_trait]
pub trait FanoutInbox: Send {
    async fn try_next(&mut self) -> Result<Option<Message>>;
}

/// Boxed inbox handle returned by `subscribe_fanout`
pub type FanoutSubscription = Box<dyn FanoutInbox>;

/// The broker contract shared by all pipeline actors.
///
/// One broker instance is shared (by `Arc`) between the producer, the
/// competing stage-A consumers, stage B, the writer, and the read surface.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Enqueue a message at the tail of the named work queue.
    ///
    /// Never blocks the caller; the queue is created lazily on first use.
    /// Work queues have no subscribe step — any consumer that calls
    /// `consume_work` against the name participates.
    async fn publish_work(&self, queue: &str, message: Message) -> Result<()>;

    /// Remove and return the head message of the named work queue.
    ///
    /// With a zero timeout returns `Ok(None)` immediately when the queue is
    /// empty; with a positive timeout blocks up to that bound before
    /// returning `Ok(None)`. Timeout expiry is not an error.
    async fn consume_work(&self, queue: &str, timeout: Duration) -> Result<Option<Message>>;

    /// Current pending count; 0 for a queue that has never been touched
    async fn queue_depth(&self, queue: &str) -> Result<usize>;

    /// Register a new independent inbox on the topic.
    ///
    /// Registration happens-before any publish the caller expects to
    /// observe; there is no buffering of earlier publishes.
    async fn subscribe_fanout(&self, topic: &str) -> Result<FanoutSubscription>;

    /// Deliver an independent copy of `message` to every inbox currently
    /// registered on the topic, preserving per-subscriber order.
    ///
    /// A topic with zero subscribers silently drops the message.
    async fn publish_fanout(&self, topic: &str, message: Message) -> Result<()>;

    /// Current registered-subscriber count; 0 for an unknown topic
    async fn subscriber_count(&self, topic: &str) -> Result<usize>;

    /// Clear all work-queue contents.
    ///
    /// Fan-out subscriptions — and copies already delivered to their
    /// inboxes — are left intact: subscriptions model long-lived consumer
    /// processes that outlive a purge.
    async fn purge_all(&self) -> Result<()>;
}

/// Construct the broker backend named by the configuration
pub async fn build(config: &Config) -> Result<Arc<dyn MessageBroker>> {
    match config.broker_backend {
        BackendKind::Memory => Ok(Arc::new(InMemoryBroker::new())),
        #[cfg(feature = "sqlx")]
        BackendKind::Sqlite => Ok(Arc::new(
            SqliteBroker::open(&config.database_path).await?,
        )),
        #[cfg(not(feature = "sqlx"))]
        BackendKind::Sqlite => Err(crate::error::Error::Config(
            "sqlite broker backend requires the 'sqlx' feature".into(),
        )),
    }
}
