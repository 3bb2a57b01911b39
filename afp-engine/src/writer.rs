//! Idempotent feature writer
//!
//! Subscribes to both feature fan-out topics at construction time and
//! appends every unique record to the feature store. Duplicate detection
//! lives in the store's `write` (atomic insert-if-absent keyed by
//! `message_id`), which is what makes overlapping flushes safe: however
//! many times the same record is drained, exactly one insert lands.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use afp_common::broker::{FanoutInbox, FanoutSubscription, MessageBroker};
use afp_common::db::{FeatureFilter, FeatureStore};
use afp_common::messages::{FEATURES_A, FEATURES_B};
use afp_common::{FeatureRecord, Result};

/// Consumes type-A and type-B records and persists them
pub struct FeatureWriter {
    store: Arc<dyn FeatureStore>,
    // One mutex per inbox: concurrent flushes interleave drains safely
    // while the store's write atomicity keeps them duplicate-free.
    inbox_a: Mutex<FanoutSubscription>,
    inbox_b: Mutex<FanoutSubscription>,
}

impl FeatureWriter {
    /// Create the writer and register both fan-out subscriptions
    pub async fn new(
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn FeatureStore>,
    ) -> Result<Self> {
        let inbox_a = broker.subscribe_fanout(FEATURES_A).await?;
        let inbox_b = broker.subscribe_fanout(FEATURES_B).await?;
        Ok(Self {
            store,
            inbox_a: Mutex::new(inbox_a),
            inbox_b: Mutex::new(inbox_b),
        })
    }

    /// The store this writer persists into
    pub fn store(&self) -> Arc<dyn FeatureStore> {
        self.store.clone()
    }

    /// Drain both inboxes in full and write every pending record.
    ///
    /// Returns the number of genuine (non-duplicate) insertions. A record
    /// that does not parse is logged and skipped; store failures abort.
    pub async fn flush(&self) -> Result<usize> {
        let mut written = 0;
        written += self.drain(&self.inbox_a).await?;
        written += self.drain(&self.inbox_b).await?;
        if written > 0 {
            let total = self.store.count().await?;
            info!("Writer flushed {written} new record(s) (total={total})");
        }
        Ok(written)
    }

    async fn drain(&self, inbox: &Mutex<FanoutSubscription>) -> Result<usize> {
        let mut inbox = inbox.lock().await;
        let mut written = 0;
        while let Some(message) = inbox.try_next().await? {
            let record = match FeatureRecord::from_message(&message) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed feature record: {e}");
                    continue;
                }
            };
            if self.store.write(&record).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Query the underlying store
    pub async fn query(&self, filter: &FeatureFilter) -> Result<Vec<FeatureRecord>> {
        self.store.query(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afp_common::broker::InMemoryBroker;
    use afp_common::db::MemoryStore;
    use afp_common::FeatureType;
    use serde_json::json;

    fn record(id: &str) -> FeatureRecord {
        FeatureRecord {
            message_id: id.to_string(),
            source_message_id: "audio-1".to_string(),
            feature_type: FeatureType::A,
            sensor_id: "sensor-01".to_string(),
            timestamp: "2024-01-15T10:00:00+00:00".to_string(),
            processed_at: "2024-01-15T10:00:01+00:00".to_string(),
            features: json!({"rms_energy": 0.11}),
        }
    }

    async fn writer_with_broker() -> (Arc<InMemoryBroker>, FeatureWriter) {
        let broker = Arc::new(InMemoryBroker::new());
        let writer = FeatureWriter::new(broker.clone(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        (broker, writer)
    }

    #[tokio::test]
    async fn flush_writes_pending_records_from_both_topics() {
        let (broker, writer) = writer_with_broker().await;
        broker
            .publish_fanout(FEATURES_A, record("a-1").to_message())
            .await
            .unwrap();
        broker
            .publish_fanout(FEATURES_B, record("b-1").to_message())
            .await
            .unwrap();

        assert_eq!(writer.flush().await.unwrap(), 2);
        assert_eq!(writer.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn flush_on_drained_inboxes_returns_zero() {
        let (broker, writer) = writer_with_broker().await;
        broker
            .publish_fanout(FEATURES_A, record("a-1").to_message())
            .await
            .unwrap();

        assert_eq!(writer.flush().await.unwrap(), 1);
        assert_eq!(writer.flush().await.unwrap(), 0);
        assert_eq!(writer.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_publishes_of_one_record_store_once() {
        let (broker, writer) = writer_with_broker().await;
        let repeated = record("dup-1");
        for _ in 0..100 {
            broker
                .publish_fanout(FEATURES_A, repeated.to_message())
                .await
                .unwrap();
        }

        assert_eq!(writer.flush().await.unwrap(), 1);
        assert_eq!(writer.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_record_is_skipped_not_fatal() {
        let (broker, writer) = writer_with_broker().await;
        broker
            .publish_fanout(FEATURES_A, json!({"not": "a record"}))
            .await
            .unwrap();
        broker
            .publish_fanout(FEATURES_A, record("ok-1").to_message())
            .await
            .unwrap();

        assert_eq!(writer.flush().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_flushes_never_duplicate() {
        let broker = Arc::new(InMemoryBroker::new());
        let writer = Arc::new(
            FeatureWriter::new(broker.clone(), Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        );
        for i in 0..50 {
            broker
                .publish_fanout(FEATURES_A, record(&format!("r-{i}")).to_message())
                .await
                .unwrap();
        }

        let (left, right) = tokio::join!(
            {
                let writer = writer.clone();
                async move { writer.flush().await.unwrap() }
            },
            {
                let writer = writer.clone();
                async move { writer.flush().await.unwrap() }
            }
        );
        assert_eq!(left + right, 50);
        assert_eq!(writer.store().count().await.unwrap(), 50);
    }
}
