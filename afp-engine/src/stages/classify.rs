//! Stage B: feature classification
//!
//! Subscribes to the `features_a` fan-out topic at construction time so it
//! receives its own copy of every type-A record, independent of the writer
//! and the read surface. Derives a type-B record from each input and
//! publishes it to `features_b`. Construction must happen before stage A
//! starts publishing or the records published in between are lost.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use afp_common::broker::{FanoutInbox, FanoutSubscription, MessageBroker};
use afp_common::messages::{now_iso, required_str, Message, FEATURES_A, FEATURES_B};
use afp_common::{Error, FeatureRecord, FeatureType, Result};

const CLASSIFICATIONS: [&str; 5] = ["speech", "music", "noise", "silence", "mixed"];

/// Stage-B processor: type-A records in, type-B records out
pub struct FeatureClassifier {
    broker: Arc<dyn MessageBroker>,
    inbox: FanoutSubscription,
    processed: u64,
}

impl FeatureClassifier {
    /// Create the classifier and register its `features_a` subscription
    pub async fn new(broker: Arc<dyn MessageBroker>) -> Result<Self> {
        let inbox = broker.subscribe_fanout(FEATURES_A).await?;
        Ok(Self {
            broker,
            inbox,
            processed: 0,
        })
    }

    /// Messages successfully processed and published by this instance
    pub fn processed_count(&self) -> u64 {
        self.processed
    }

    /// Validate one type-A record and derive its type-B record.
    ///
    /// Pure. Fails with `Validation` when required fields are missing and
    /// with `TypeMismatch` when the discriminator tag is not `"A"`.
    pub fn process(&self, message: &Message) -> Result<FeatureRecord> {
        let input = validate(message)?;
        let features = derive_features(&input.features);
        Ok(FeatureRecord {
            message_id: Uuid::new_v4().to_string(),
            source_message_id: input.message_id,
            feature_type: FeatureType::B,
            sensor_id: input.sensor_id,
            timestamp: input.timestamp,
            processed_at: now_iso(),
            features,
        })
    }

    /// Consume one record from the fan-out inbox, process it, and publish.
    ///
    /// Returns `Ok(None)` without side effects when the inbox is empty.
    pub async fn process_one(&mut self) -> Result<Option<FeatureRecord>> {
        let Some(message) = self.inbox.try_next().await? else {
            return Ok(None);
        };
        let record = self.process(&message)?;
        self.broker
            .publish_fanout(FEATURES_B, record.to_message())
            .await?;
        self.processed += 1;
        info!(
            "Classified feature_a={} -> feature_b={} classification={}",
            record.source_message_id,
            record.message_id,
            record.features["classification"]
        );
        Ok(Some(record))
    }

    /// Drain all pending type-A records; returns the number of successes.
    ///
    /// Validation and type-mismatch failures are isolated per item;
    /// resource failures abort the drain.
    pub async fn process_all(&mut self) -> Result<u64> {
        let mut count = 0;
        loop {
            match self.process_one().await {
                Ok(Some(_)) => count += 1,
                Ok(None) => return Ok(count),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping invalid feature record: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The fields stage B reads from its input
struct ClassifierInput {
    message_id: String,
    sensor_id: String,
    timestamp: String,
    features: serde_json::Value,
}

fn validate(message: &Message) -> Result<ClassifierInput> {
    let input = ClassifierInput {
        message_id: required_str(message, "message_id")?,
        sensor_id: required_str(message, "sensor_id")?,
        timestamp: required_str(message, "timestamp")?,
        features: message
            .get("features")
            .cloned()
            .ok_or_else(|| Error::Validation("missing field 'features'".into()))?,
    };
    let feature_type = required_str(message, "feature_type")?;
    if feature_type != "A" {
        return Err(Error::TypeMismatch {
            expected: "A".into(),
            actual: feature_type,
        });
    }
    Ok(input)
}

/// Derive the type-B payload from a type-A feature payload.
///
/// Deterministic stand-in for higher-level classification; absent upstream
/// values fall back to neutral defaults rather than failing, since the
/// payload itself is opaque to the contract.
fn derive_features(features: &serde_json::Value) -> serde_json::Value {
    let mfcc: Vec<f64> = features["mfcc"]
        .as_array()
        .map(|values| values.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_else(|| vec![0.0]);
    let centroid = features["spectral_centroid"].as_f64().unwrap_or(440.0);
    let energy = features["rms_energy"].as_f64().unwrap_or(0.1);

    let mfcc_mean = if mfcc.is_empty() {
        0.0
    } else {
        mfcc.iter().sum::<f64>() / mfcc.len() as f64
    };
    let class_index = (mfcc_mean * centroid).abs().trunc() as u64 % CLASSIFICATIONS.len() as u64;

    json!({
        "classification": CLASSIFICATIONS[class_index as usize],
        "confidence": super::round_to(
            (mfcc_mean.tanh().abs() + energy).min(0.99), 4),
        "derived_metrics": {
            "mfcc_mean": super::round_to(mfcc_mean, 4),
            "spectral_spread": super::round_to(centroid * 0.1, 2),
            "activity_score": super::round_to(energy * 10.0, 4),
        },
    })
}
