//! Actor run loops
//!
//! Each pipeline actor runs as an independent tokio task: the sensor
//! publishes on a fixed interval, the stages poll their sources with a
//! short back-off when idle, and the writer flushes periodically. All
//! loops stop promptly when the shared cancellation token fires.
//!
//! Recoverable (per-message) failures are logged and the loop continues;
//! a resource failure stops the affected loop, since retrying against a
//! dead transport would silently lose data.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use afp_common::config::Config;

use crate::pipeline::Pipeline;
use crate::sensor::AudioSensor;
use crate::stages::{FeatureClassifier, FeatureExtractor};
use crate::writer::FeatureWriter;

pub async fn run_sensor(sensor: AudioSensor, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = sensor.publish_audio(None, None).await {
                    error!("Sensor publish failed, stopping: {e}");
                    return;
                }
            }
        }
    }
}

pub async fn run_extractor(
    extractor: FeatureExtractor,
    idle_backoff: Duration,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            return;
        }
        match extractor.process_one().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(idle_backoff) => {}
                }
            }
            Err(e) if e.is_recoverable() => warn!("Extractor skipped message: {e}"),
            Err(e) => {
                error!("Extractor stopping: {e}");
                return;
            }
        }
    }
}

pub async fn run_classifier(
    mut classifier: FeatureClassifier,
    idle_backoff: Duration,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            return;
        }
        match classifier.process_one().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(idle_backoff) => {}
                }
            }
            Err(e) if e.is_recoverable() => warn!("Classifier skipped message: {e}"),
            Err(e) => {
                error!("Classifier stopping: {e}");
                return;
            }
        }
    }
}

pub async fn run_writer(
    writer: Arc<FeatureWriter>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // Final drain so records published just before shutdown land
                if let Err(e) = writer.flush().await {
                    warn!("Final writer flush failed: {e}");
                }
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = writer.flush().await {
                    error!("Writer flush failed, stopping: {e}");
                    return;
                }
            }
        }
    }
}

/// Spawn every actor loop; the returned handles finish after `token` fires
pub fn spawn_all(
    pipeline: Pipeline,
    config: &Config,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let Pipeline {
        sensor,
        extractor,
        classifier,
        writer,
    } = pipeline;
    vec![
        tokio::spawn(run_sensor(
            sensor,
            config.sensor_interval(),
            token.clone(),
        )),
        tokio::spawn(run_extractor(
            extractor,
            config.idle_backoff(),
            token.clone(),
        )),
        tokio::spawn(run_classifier(
            classifier,
            config.idle_backoff(),
            token.clone(),
        )),
        tokio::spawn(run_writer(
            writer,
            config.writer_flush_interval(),
            token.clone(),
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use afp_common::broker::InMemoryBroker;
    use afp_common::db::{FeatureStore, MemoryStore};

    #[tokio::test]
    async fn spawned_pipeline_processes_and_stops_on_cancel() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::assemble(broker, store.clone(), "sensor-rt")
            .await
            .unwrap();

        let config = Config {
            sensor_interval_ms: 5,
            writer_flush_ms: 10,
            idle_backoff_ms: 1,
            ..Config::default()
        };
        let token = CancellationToken::new();
        let handles = spawn_all(pipeline, &config, &token);

        // Let a few sensor ticks flow through all stages
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(store.count().await.unwrap() > 0);
    }
}
