//! Pipeline stage processors
//!
//! Both stages follow one contract. `process` is a pure function from a
//! wire message to a new feature record: it validates, transforms, and
//! touches no shared state, so a rejected message leaves the broker and
//! store exactly as they were. `process_one` consumes a single message
//! from the stage's input source and publishes the result only when
//! `process` succeeded — there is no partial publish. `process_all` drains
//! the source, isolating each item's validation failure so one poison
//! message never halts the rest of the batch; resource failures still
//! abort the drain.
//!
//! A validation failure on a consumed message is not retried or requeued.
//! The message is gone from this stage's perspective; the drain loop logs
//! it and moves on. Callers that want retry or dead-lettering implement it
//! above this layer.

mod classify;
mod extract;

pub use classify::FeatureClassifier;
pub use extract::FeatureExtractor;

/// Round to a fixed number of decimal places.
///
/// Feature payloads are part of the wire contract and tests assert exact
/// values, so both stages round through this one helper.
pub(crate) fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
