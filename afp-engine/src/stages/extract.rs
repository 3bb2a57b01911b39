//! Stage A: spectral feature extraction
//!
//! Consumes audio messages from the audio stream work queue (competing
//! with any other extractor instances) and publishes type-A feature
//! records to the `features_a` fan-out topic. The extraction math is a
//! deterministic stand-in for real DSP: the same payload always yields
//! byte-identical feature values, which is what lets tests assert exact
//! output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use afp_common::broker::MessageBroker;
use afp_common::messages::{now_iso, AudioMessage, Message, AUDIO_STREAM, FEATURES_A};
use afp_common::{Error, FeatureRecord, FeatureType, Result};

/// Number of mfcc coefficients in a type-A payload
const MFCC_BANDS: usize = 13;

/// Stage-A processor: audio in, type-A feature records out
pub struct FeatureExtractor {
    broker: Arc<dyn MessageBroker>,
    processed: AtomicU64,
}

impl FeatureExtractor {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            processed: AtomicU64::new(0),
        }
    }

    /// Messages successfully processed and published by this instance
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Validate one audio message and derive its type-A record.
    ///
    /// Pure: no broker or store interaction, no counter update. Fails with
    /// `Validation` when required fields are missing or malformed
    /// (including an unparsable timestamp or undecodable payload).
    pub fn process(&self, message: &Message) -> Result<FeatureRecord> {
        let audio = AudioMessage::from_message(message)?;
        let features = extract_features(&audio.audio_data)?;
        Ok(FeatureRecord {
            message_id: Uuid::new_v4().to_string(),
            source_message_id: audio.message_id,
            feature_type: FeatureType::A,
            sensor_id: audio.sensor_id,
            timestamp: audio.timestamp,
            processed_at: now_iso(),
            features,
        })
    }

    /// Consume one audio message, process it, and publish the result.
    ///
    /// Returns `Ok(None)` without side effects when the queue is empty.
    /// A validation failure propagates; the consumed message is not
    /// requeued.
    pub async fn process_one(&self) -> Result<Option<FeatureRecord>> {
        let Some(message) = self
            .broker
            .consume_work(AUDIO_STREAM, Duration::ZERO)
            .await?
        else {
            return Ok(None);
        };
        let record = self.process(&message)?;
        self.broker
            .publish_fanout(FEATURES_A, record.to_message())
            .await?;
        self.processed.fetch_add(1, Ordering::Relaxed);
        info!(
            "Extracted audio={} -> feature_a={} sensor={}",
            record.source_message_id, record.message_id, record.sensor_id
        );
        Ok(Some(record))
    }

    /// Drain the audio queue completely; returns the number of successes.
    ///
    /// Each item's validation failure is isolated here so that one bad
    /// message does not stop the drain. Resource failures abort.
    pub async fn process_all(&self) -> Result<u64> {
        let mut count = 0;
        loop {
            match self.process_one().await {
                Ok(Some(_)) => count += 1,
                Ok(None) => return Ok(count),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping invalid audio message: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Derive the type-A feature payload from a base64 audio payload.
///
/// Deterministic given the same input; stands in for mfcc / spectral
/// analysis of the decoded samples.
fn extract_features(audio_data: &str) -> Result<serde_json::Value> {
    let raw = BASE64
        .decode(audio_data)
        .map_err(|e| Error::Validation(format!("audio_data is not valid base64: {e}")))?;
    let seed = raw.iter().map(|&b| b as u64).sum::<u64>() % 1000;
    let seed_f = seed as f64;

    let mfcc: Vec<f64> = (0..MFCC_BANDS)
        .map(|i| super::round_to((seed_f + i as f64).sin() * 10.0, 4))
        .collect();

    Ok(json!({
        "mfcc": mfcc,
        "spectral_centroid": super::round_to(440.0 + seed_f, 2),
        "zero_crossing_rate": super::round_to(0.05 + (seed % 50) as f64 / 1000.0, 4),
        "rms_energy": super::round_to(0.1 + (seed % 100) as f64 / 1000.0, 4),
    }))
}
