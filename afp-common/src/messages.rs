//! Wire message types for the audio feature pipeline
//!
//! Messages travel through the broker as JSON values; field names are the
//! contract. The typed structs here are the validated forms that stages and
//! the writer work with, converting to and from the wire shape at the
//! boundary so that a malformed message surfaces as a `Validation` error
//! rather than a panic.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::error::{Error, Result};

/// Wire form of every message carried by the broker
pub type Message = serde_json::Value;

/// Work queue carrying raw audio messages (competing consumers)
pub const AUDIO_STREAM: &str = "audio_stream";
/// Fan-out topic carrying type-A feature records
pub const FEATURES_A: &str = "features_a";
/// Fan-out topic carrying type-B feature records
pub const FEATURES_B: &str = "features_b";

/// One unit of work from an audio sensor
///
/// Immutable once constructed; consumed exactly once across all competing
/// stage instances reading the audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMessage {
    pub message_id: String,
    pub sensor_id: String,
    /// ISO-8601 timestamp assigned by the sensor
    pub timestamp: String,
    /// Base64-encoded audio payload; never empty
    pub audio_data: String,
}

impl AudioMessage {
    /// Wire form of this message
    pub fn to_message(&self) -> Message {
        json!({
            "message_id": self.message_id,
            "sensor_id": self.sensor_id,
            "timestamp": self.timestamp,
            "audio_data": self.audio_data,
        })
    }

    /// Parse and validate the wire form.
    ///
    /// Fails with `Validation` when a required field is missing or
    /// malformed, when `audio_data` is empty, or when the timestamp does
    /// not parse as ISO-8601.
    pub fn from_message(message: &Message) -> Result<Self> {
        let parsed = Self {
            message_id: required_str(message, "message_id")?,
            sensor_id: required_str(message, "sensor_id")?,
            timestamp: required_str(message, "timestamp")?,
            audio_data: required_str(message, "audio_data")?,
        };
        if parsed.audio_data.is_empty() {
            return Err(Error::Validation("audio_data cannot be empty".into()));
        }
        parse_timestamp(&parsed.timestamp)?;
        Ok(parsed)
    }
}

/// Discriminator tag for the two feature record variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::A => "A",
            FeatureType::B => "B",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "A" => Ok(FeatureType::A),
            "B" => Ok(FeatureType::B),
            other => Err(Error::Validation(format!(
                "unknown feature_type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived feature record produced by a pipeline stage
///
/// `source_message_id` links back to the upstream message this record was
/// derived from (the lineage chain); `sensor_id` and `timestamp` propagate
/// unchanged from the lineage root. Records are never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub message_id: String,
    pub source_message_id: String,
    pub feature_type: FeatureType,
    pub sensor_id: String,
    pub timestamp: String,
    /// Wall-clock of the transformation that produced this record
    pub processed_at: String,
    /// Opaque type-specific key-value payload
    pub features: serde_json::Value,
}

impl FeatureRecord {
    /// Wire form of this record
    pub fn to_message(&self) -> Message {
        json!({
            "message_id": self.message_id,
            "source_message_id": self.source_message_id,
            "feature_type": self.feature_type.as_str(),
            "sensor_id": self.sensor_id,
            "timestamp": self.timestamp,
            "processed_at": self.processed_at,
            "features": self.features,
        })
    }

    /// Parse and validate the wire form
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            message_id: required_str(message, "message_id")?,
            source_message_id: required_str(message, "source_message_id")?,
            feature_type: FeatureType::parse(&required_str(message, "feature_type")?)?,
            sensor_id: required_str(message, "sensor_id")?,
            timestamp: required_str(message, "timestamp")?,
            processed_at: required_str(message, "processed_at")?,
            features: message
                .get("features")
                .cloned()
                .ok_or_else(|| Error::Validation("missing field 'features'".into()))?,
        })
    }
}

/// Extract a required string field from a wire message
pub fn required_str(message: &Message, field: &str) -> Result<String> {
    message
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::Validation(format!("missing or non-string field '{field}'")))
}

/// Parse an ISO-8601 timestamp string.
///
/// Accepts an explicit UTC offset or trailing `Z`; a timestamp with no
/// offset at all is taken as UTC. Anything else is a `Validation` error.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Validation(format!("invalid timestamp '{value}': {e}")))
}

/// Current UTC time as an ISO-8601 string
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
