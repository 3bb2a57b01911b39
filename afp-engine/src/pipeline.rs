//! Pipeline assembly
//!
//! Gathers every actor against one shared broker and store. The one hard
//! rule lives here: fan-out consumers must register their subscriptions
//! before any upstream producer publishes, because a fan-out topic only
//! copies to inboxes that exist at publish time. A consumer wired up late
//! loses messages permanently and the broker raises nothing — the only
//! guard is this construction order.

use std::sync::Arc;

use afp_common::broker::MessageBroker;
use afp_common::db::FeatureStore;
use afp_common::Result;

use crate::sensor::AudioSensor;
use crate::stages::{FeatureClassifier, FeatureExtractor};
use crate::writer::FeatureWriter;

/// The fully wired pipeline, ready for its run loops
pub struct Pipeline {
    pub sensor: AudioSensor,
    pub extractor: FeatureExtractor,
    pub classifier: FeatureClassifier,
    pub writer: Arc<FeatureWriter>,
}

impl Pipeline {
    /// Wire up all actors in subscription-safe order.
    ///
    /// The classifier and writer subscribe to their fan-out topics here,
    /// before the extractor or sensor exist, so nothing can have published
    /// ahead of them. Read-surface subscriptions (when present) must be
    /// registered before calling this only if publishing has already
    /// started elsewhere; in the normal composition root the order is:
    /// broker, read-surface cache, `assemble`, then run loops.
    pub async fn assemble(
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn FeatureStore>,
        sensor_id: impl Into<String>,
    ) -> Result<Self> {
        let classifier = FeatureClassifier::new(broker.clone()).await?;
        let writer = Arc::new(FeatureWriter::new(broker.clone(), store).await?);
        let extractor = FeatureExtractor::new(broker.clone());
        let sensor = AudioSensor::new(broker, sensor_id);
        Ok(Self {
            sensor,
            extractor,
            classifier,
            writer,
        })
    }
}
