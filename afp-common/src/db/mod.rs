//! Feature store abstraction
//!
//! The pipeline's sole persistent-looking state: an ordered collection of
//! feature records keyed by `message_id`, with a uniqueness invariant — no
//! two stored records share a `message_id`. The [`memory::MemoryStore`] and
//! [`sqlite::SqliteStore`] adapters satisfy the same contract and run the
//! same test suite.

pub mod memory;
#[cfg(feature = "sqlx")]
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::messages::{FeatureRecord, FeatureType};

pub use memory::MemoryStore;
#[cfg(feature = "sqlx")]
pub use sqlite::SqliteStore;

/// Optional conjunction of query filters; all `None` matches everything
#[derive(Debug, Clone, Default)]
pub struct FeatureFilter {
    pub feature_type: Option<FeatureType>,
    pub sensor_id: Option<String>,
    /// Inclusive lower bound on record timestamp
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on record timestamp
    pub end: Option<DateTime<Utc>>,
}

impl FeatureFilter {
    /// Filter to a time window only
    pub fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }
}

/// Idempotent persistence for feature records
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Insert the record if its `message_id` is not already present.
    ///
    /// Returns `Ok(true)` on a genuine insert, `Ok(false)` on a detected
    /// duplicate. Atomic under concurrent calls: two near-simultaneous
    /// writes of the same `message_id` store exactly one row and exactly
    /// one caller observes `true`.
    async fn write(&self, record: &FeatureRecord) -> Result<bool>;

    /// Stored records matching the filter, ordered by timestamp ascending
    async fn query(&self, filter: &FeatureFilter) -> Result<Vec<FeatureRecord>>;

    /// Total number of stored records
    async fn count(&self) -> Result<usize>;

    /// Remove all rows; test isolation between runs
    async fn clear(&self) -> Result<()>;
}

/// Construct the store backend named by the configuration
pub async fn build(config: &Config) -> Result<Arc<dyn FeatureStore>> {
    match config.store_backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlx")]
        BackendKind::Sqlite => Ok(Arc::new(
            SqliteStore::open(&config.database_path).await?,
        )),
        #[cfg(not(feature = "sqlx"))]
        BackendKind::Sqlite => Err(crate::error::Error::Config(
            "sqlite store backend requires the 'sqlx' feature".into(),
        )),
    }
}
