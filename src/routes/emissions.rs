//! Emissions HTTP endpoints.
//!
//! - GET /api/v1/emissions?max_points=N&year=Y&gwp_horizon=H
//! - GET /api/v1/emissions/stream?max_points=N&year=Y&gwp_horizon=H

use std::convert::Infallible;
use std::ops::RangeInclusive;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::models::{FetchParameters, GwpHorizon, NormalizedPoint};
use crate::services::emissions::EmissionsService;
use crate::services::trace::TraceClient;

/// Default number of sources per request.
const DEFAULT_MAX_POINTS: usize = 16_500;
/// Allowed `max_points` for the bulk endpoint.
const BULK_MAX_POINTS_RANGE: RangeInclusive<usize> = 1_000..=100_000;
/// Allowed `max_points` for the streaming endpoint.
const STREAM_MAX_POINTS_RANGE: RangeInclusive<usize> = 5_000..=100_000;
/// Default emissions year.
const DEFAULT_YEAR: i32 = 2024;
/// Years the provider publishes inventories for.
const YEAR_RANGE: RangeInclusive<i32> = 2015..=2024;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared application state for emissions endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<EmissionsService<TraceClient>>,
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmissionsQuery {
    /// Emissions sources to fetch (default 16500)
    pub max_points: Option<usize>,
    /// Emissions year, 2015-2024 (default 2024)
    pub year: Option<i32>,
    /// GWP horizon in years: 20 or 100. Other values fall back to 100.
    #[serde(alias = "gwp_years")]
    pub gwp_horizon: Option<i64>,
}

impl EmissionsQuery {
    /// Validate ranges and coerce the horizon into a cache/pipeline key.
    fn into_params(
        self,
        max_points_range: &RangeInclusive<usize>,
    ) -> Result<FetchParameters, AppError> {
        let max_points = self.max_points.unwrap_or(DEFAULT_MAX_POINTS);
        if !max_points_range.contains(&max_points) {
            return Err(AppError::BadRequest(format!(
                "max_points must be between {} and {}",
                max_points_range.start(),
                max_points_range.end()
            )));
        }

        let year = self.year.unwrap_or(DEFAULT_YEAR);
        if !YEAR_RANGE.contains(&year) {
            return Err(AppError::BadRequest(format!(
                "year must be between {} and {}",
                YEAR_RANGE.start(),
                YEAR_RANGE.end()
            )));
        }

        Ok(FetchParameters {
            max_points,
            year: Some(year),
            horizon: GwpHorizon::from_years(self.gwp_horizon.unwrap_or(100)),
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Bulk emissions response.
#[derive(Debug, Serialize, ToSchema)]
pub struct EmissionsResponse {
    /// Normalized emissions sources
    #[schema(value_type = Vec<NormalizedPoint>)]
    pub points: Arc<Vec<NormalizedPoint>>,
    /// Number of points returned
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Get emissions sources from Climate TRACE.
///
/// Pages through the Climate TRACE asset inventory until `max_points`
/// sources are collected or the inventory is exhausted. Results are cached
/// for one hour per exact parameter set. If the provider fails mid-way, the
/// sources gathered so far are returned.
#[utoipa::path(
    get,
    path = "/api/v1/emissions",
    tag = "Emissions",
    params(EmissionsQuery),
    responses(
        (status = 200, description = "Emissions sources", body = EmissionsResponse),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
    )
)]
pub async fn get_emissions(
    State(state): State<AppState>,
    Query(query): Query<EmissionsQuery>,
) -> Result<Json<EmissionsResponse>, AppError> {
    let params = query.into_params(&BULK_MAX_POINTS_RANGE)?;
    let points = state.service.collect(params).await;

    Ok(Json(EmissionsResponse {
        total: points.len(),
        points,
    }))
}

/// Stream emissions sources as NDJSON.
///
/// Each line is a JSON array holding one provider page's worth of sources,
/// written as soon as the page is transformed so the map can render
/// progressively. Never cached.
#[utoipa::path(
    get,
    path = "/api/v1/emissions/stream",
    tag = "Emissions",
    params(EmissionsQuery),
    responses(
        (status = 200, description = "Newline-delimited JSON arrays of emissions sources",
         content_type = "application/x-ndjson", body = Vec<NormalizedPoint>),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
    )
)]
pub async fn stream_emissions(
    State(state): State<AppState>,
    Query(query): Query<EmissionsQuery>,
) -> Result<Response, AppError> {
    let params = query.into_params(&STREAM_MAX_POINTS_RANGE)?;
    let chunk_size = state.service.page_size();
    let lines = state
        .service
        .stream(params, chunk_size)
        .into_stream()
        .filter_map(|chunk| async move { ndjson_line(&chunk).map(Ok::<_, Infallible>) });

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

/// Serialize one chunk as a newline-terminated JSON array.
fn ndjson_line(chunk: &[NormalizedPoint]) -> Option<String> {
    match serde_json::to_string(chunk) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        }
        Err(e) => {
            tracing::warn!("Dropping chunk of {} points: {}", chunk.len(), e);
            None
        }
    }
}
