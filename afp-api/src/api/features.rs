//! Feature read endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use afp_common::db::FeatureFilter;
use afp_common::messages::parse_timestamp;

use crate::AppState;

use super::ApiError;

/// GET /features/realtime
///
/// Features received on the fan-out topics within the cache window.
pub async fn realtime(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let features = state.cache.refresh().await?;
    Ok(Json(json!({
        "features": features,
        "count": features.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoricalParams {
    start: Option<String>,
    end: Option<String>,
}

/// GET /features/historical?start=<ISO-8601>&end=<ISO-8601>
///
/// Features stored in the database for the given time window. Malformed
/// parameters are a client error.
pub async fn historical(
    State(state): State<AppState>,
    Query(params): Query<HistoricalParams>,
) -> Result<Json<Value>, ApiError> {
    let (Some(start_str), Some(end_str)) = (params.start, params.end) else {
        return Err(ApiError::BadRequest(
            "'start' and 'end' query parameters are required".to_string(),
        ));
    };

    let start = parse_timestamp(&start_str)
        .map_err(|_| ApiError::BadRequest("Invalid timestamp format; use ISO-8601".to_string()))?;
    let end = parse_timestamp(&end_str)
        .map_err(|_| ApiError::BadRequest("Invalid timestamp format; use ISO-8601".to_string()))?;
    if start >= end {
        return Err(ApiError::BadRequest(
            "'start' must be earlier than 'end'".to_string(),
        ));
    }

    let records = state.store.query(&FeatureFilter::window(start, end)).await?;
    Ok(Json(json!({
        "features": records,
        "count": records.len(),
    })))
}
