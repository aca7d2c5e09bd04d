//! Recording REST endpoints

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::AppState;
use crate::api::ApiResponse;
use crate::error::RecordError;
use crate::services::{SegmentDetail, StreamSummary, SweepSummary, segment_seconds_for};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Application name, e.g. `live`
    pub app: String,
    /// Stream id, e.g. `cam1`
    pub stream: String,
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub app: String,
    pub stream: String,
    /// Date directory, `YYYY-MM-DD`
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct RetentionInfo {
    pub keep_segments: usize,
    /// Segment length at which `keep_segments` segments cover one day
    pub day_segment_secs: f64,
    pub schedule: String,
    pub grace_secs: u64,
    pub sweep_running: bool,
}

/// Summaries of every stream with recordings
async fn list_streams(State(state): State<AppState>) -> Json<ApiResponse<Vec<StreamSummary>>> {
    match state.index.summarize().await {
        Ok(summaries) => Json(ApiResponse::ok(summaries)),
        Err(e) => {
            warn!(error = %e, "Recording summary failed");
            Json(ApiResponse::failure(e.to_string()))
        }
    }
}

/// Segments of one stream for one day, oldest first
async fn list_segments(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> Json<ApiResponse<Vec<SegmentDetail>>> {
    match state
        .index
        .list_detailed(&query.app, &query.stream, &query.date)
        .await
    {
        Ok(listing) if !listing.exists => Json(ApiResponse::not_found(
            format!("directory does not exist: {}", listing.dir.display()),
            Vec::new(),
        )),
        Ok(listing) => Json(ApiResponse::ok(listing.segments)),
        Err(e) => Json(ApiResponse::failure(e.to_string())),
    }
}

/// Delete all recordings of a stream
async fn delete_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Json<ApiResponse<()>> {
    match state.index.purge_stream(&query.app, &query.stream).await {
        Ok(()) => Json(ApiResponse::message(format!(
            "deleted all recordings of {}/{}",
            query.app, query.stream
        ))),
        Err(e @ RecordError::Io { .. }) => {
            error!(app = %query.app, stream = %query.stream, error = %e, "Stream purge failed");
            Json(ApiResponse::failure(e.to_string()))
        }
        Err(e) => Json(ApiResponse::failure(e.to_string())),
    }
}

/// Whether a stream directory exists (recording into it would mix footage)
async fn stream_exists(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Json<ApiResponse<bool>> {
    match state.index.stream_exists(&query.app, &query.stream) {
        Ok(exists) => Json(ApiResponse::ok(exists)),
        Err(e) => Json(ApiResponse::failure(e.to_string())),
    }
}

async fn retention_info(State(state): State<AppState>) -> Json<ApiResponse<RetentionInfo>> {
    Json(ApiResponse::ok(RetentionInfo {
        keep_segments: state.config.keep_segments,
        day_segment_secs: segment_seconds_for(1, state.config.keep_segments),
        schedule: state.config.retention_schedule.clone(),
        grace_secs: state.config.retention_grace.as_secs(),
        sweep_running: state.sweeper.is_running(),
    }))
}

/// Run a retention sweep now, unless one is already running
async fn trigger_sweep(State(state): State<AppState>) -> Json<ApiResponse<SweepSummary>> {
    match state.sweeper.run().await {
        Ok(Some(summary)) => Json(ApiResponse::ok(summary)),
        Ok(None) => Json(ApiResponse::failure("a retention sweep is already running")),
        Err(e) => Json(ApiResponse::failure(format!("{e:#}"))),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/record/videos-list", get(list_streams))
        .route("/record/videos", get(list_segments).delete(delete_stream))
        .route("/record/stream-exists", get(stream_exists))
        .route("/record/retention", get(retention_info))
        .route("/record/retention/sweep", post(trigger_sweep))
}
