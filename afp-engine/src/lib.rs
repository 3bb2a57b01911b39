//! # AFP Engine
//!
//! The processing pipeline: an audio sensor publishes work onto the audio
//! stream queue, two stages transform and re-publish features over fan-out
//! topics, and a writer persists every unique record. Assembly order is
//! load-bearing — see [`pipeline::Pipeline::assemble`].

pub mod pipeline;
pub mod runtime;
pub mod sensor;
pub mod stages;
pub mod writer;

pub use pipeline::Pipeline;
pub use sensor::AudioSensor;
pub use stages::{FeatureClassifier, FeatureExtractor};
pub use writer::FeatureWriter;
