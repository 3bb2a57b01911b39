//! Audio sensor producer
//!
//! Simulates a distributed audio sensor that encodes audio as base64 and
//! transmits it to the audio stream work queue. In a deployed system
//! sensors transmit over a secured network channel; here they publish
//! directly to the shared broker.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use afp_common::broker::MessageBroker;
use afp_common::messages::{now_iso, AudioMessage, AUDIO_STREAM};
use afp_common::Result;

/// A single audio sensor publishing self-contained messages
pub struct AudioSensor {
    broker: Arc<dyn MessageBroker>,
    sensor_id: String,
}

impl AudioSensor {
    pub fn new(broker: Arc<dyn MessageBroker>, sensor_id: impl Into<String>) -> Self {
        Self {
            broker,
            sensor_id: sensor_id.into(),
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Publish one audio message to the audio stream queue.
    ///
    /// Generates a synthetic base64 payload when `audio_data` is not
    /// supplied and stamps the current UTC time when `timestamp` is not.
    /// Returns the message exactly as published.
    pub async fn publish_audio(
        &self,
        audio_data: Option<String>,
        timestamp: Option<String>,
    ) -> Result<AudioMessage> {
        let audio_data = audio_data.unwrap_or_else(synthetic_audio);
        let message = AudioMessage {
            message_id: Uuid::new_v4().to_string(),
            sensor_id: self.sensor_id.clone(),
            timestamp: timestamp.unwrap_or_else(now_iso),
            audio_data,
        };
        self.broker
            .publish_work(AUDIO_STREAM, message.to_message())
            .await?;
        info!(
            "Published audio msg={} sensor={}",
            message.message_id, self.sensor_id
        );
        Ok(message)
    }
}

/// Base64 payload standing in for a real capture buffer
fn synthetic_audio() -> String {
    let mut raw = Vec::with_capacity(32);
    raw.extend_from_slice(b"SYNTHETIC_AUDIO_");
    let mut noise = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut noise);
    raw.extend_from_slice(&noise);
    BASE64.encode(raw)
}
