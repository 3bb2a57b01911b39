//! In-memory feature store

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::messages::{parse_timestamp, FeatureRecord};

use super::{FeatureFilter, FeatureStore};

/// Records in insertion order plus the id set that enforces uniqueness.
/// Both live under one mutex so a duplicate check and its insert are a
/// single atomic step.
#[derive(Default)]
struct Inner {
    records: Vec<FeatureRecord>,
    ids: HashSet<String>,
}

/// Feature store holding everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn write(&self, record: &FeatureRecord) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.ids.insert(record.message_id.clone()) {
            debug!("Skipped duplicate message_id={}", record.message_id);
            return Ok(false);
        }
        inner.records.push(record.clone());
        debug!(
            "Wrote feature {} msg={} sensor={}",
            record.feature_type, record.message_id, record.sensor_id
        );
        Ok(true)
    }

    async fn query(&self, filter: &FeatureFilter) -> Result<Vec<FeatureRecord>> {
        let records = {
            let inner = self.inner.lock().unwrap();
            inner.records.clone()
        };
        let mut matched: Vec<FeatureRecord> = records
            .into_iter()
            .filter(|r| {
                if let Some(feature_type) = filter.feature_type {
                    if r.feature_type != feature_type {
                        return false;
                    }
                }
                if let Some(sensor_id) = &filter.sensor_id {
                    if &r.sensor_id != sensor_id {
                        return false;
                    }
                }
                if filter.start.is_some() || filter.end.is_some() {
                    // Stored records passed stage validation, but guard
                    // anyway: an unparsable timestamp never matches a window
                    let Ok(ts) = parse_timestamp(&r.timestamp) else {
                        return false;
                    };
                    if let Some(start) = filter.start {
                        if ts < start {
                            return false;
                        }
                    }
                    if let Some(end) = filter.end {
                        if ts > end {
                            return false;
                        }
                    }
                }
                true
            })
            .collect();
        matched.sort_by(|a, b| {
            let ta = parse_timestamp(&a.timestamp).ok();
            let tb = parse_timestamp(&b.timestamp).ok();
            ta.cmp(&tb)
        });
        Ok(matched)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().records.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.records.clear();
        inner.ids.clear();
        Ok(())
    }
}
