//! SQLite-backed feature store
//!
//! Schema mirrors the broker-side record shape with `message_id UNIQUE` as
//! the idempotency key. `INSERT OR IGNORE` plus a rows-affected check gives
//! the same atomic insert-if-absent the in-memory store provides under its
//! mutex: under concurrent writers exactly one insert lands.

use std::path::Path;

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::error::{Error, Result};
use crate::messages::{FeatureRecord, FeatureType};

use super::{FeatureFilter, FeatureStore};

/// Feature store backed by a SQLite database file
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the store database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Opened feature store database: {}", db_path.display());
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS features (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id        TEXT NOT NULL UNIQUE,
                source_message_id TEXT NOT NULL,
                feature_type      TEXT NOT NULL,
                sensor_id         TEXT NOT NULL,
                timestamp         TEXT NOT NULL,
                processed_at      TEXT NOT NULL,
                features          TEXT NOT NULL,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_features_timestamp
             ON features (timestamp)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FeatureRecord> {
    let feature_type: String = row.get("feature_type");
    let features: String = row.get("features");
    Ok(FeatureRecord {
        message_id: row.get("message_id"),
        source_message_id: row.get("source_message_id"),
        feature_type: FeatureType::parse(&feature_type)?,
        sensor_id: row.get("sensor_id"),
        timestamp: row.get("timestamp"),
        processed_at: row.get("processed_at"),
        features: serde_json::from_str(&features)
            .map_err(|e| Error::Validation(format!("stored features are not valid JSON: {e}")))?,
    })
}

#[async_trait]
impl FeatureStore for SqliteStore {
    async fn write(&self, record: &FeatureRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO features
                 (message_id, source_message_id, feature_type,
                  sensor_id, timestamp, processed_at, features)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.message_id)
        .bind(&record.source_message_id)
        .bind(record.feature_type.as_str())
        .bind(&record.sensor_id)
        .bind(&record.timestamp)
        .bind(&record.processed_at)
        .bind(record.features.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, filter: &FeatureFilter) -> Result<Vec<FeatureRecord>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT message_id, source_message_id, feature_type,
                    sensor_id, timestamp, processed_at, features
             FROM features WHERE 1 = 1",
        );
        if let Some(feature_type) = filter.feature_type {
            builder.push(" AND feature_type = ");
            builder.push_bind(feature_type.as_str());
        }
        if let Some(sensor_id) = &filter.sensor_id {
            builder.push(" AND sensor_id = ");
            builder.push_bind(sensor_id.clone());
        }
        // Bounds compare through datetime() so mixed offset spellings
        // ("Z" vs "+00:00") still order correctly
        if let Some(start) = filter.start {
            builder.push(" AND datetime(timestamp) >= datetime(");
            builder.push_bind(start.to_rfc3339_opts(SecondsFormat::Micros, false));
            builder.push(")");
        }
        if let Some(end) = filter.end {
            builder.push(" AND datetime(timestamp) <= datetime(");
            builder.push_bind(end.to_rfc3339_opts(SecondsFormat::Micros, false));
            builder.push(")");
        }
        builder.push(" ORDER BY datetime(timestamp), id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM features")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM features").execute(&self.pool).await?;
        Ok(())
    }
}
