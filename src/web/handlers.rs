//! HTTP request handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::validate_channels;
use crate::model::Channel;

use super::AppState;

// ============================================================================
// Snapshots
// ============================================================================

pub async fn handle_get_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.snapshot().await)
}

pub async fn handle_get_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.channel_state(&id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown channel").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutageQuery {
    pub channel_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

pub async fn handle_get_outages(
    State(state): State<AppState>,
    Query(query): Query<OutageQuery>,
) -> impl IntoResponse {
    match state
        .engine
        .list_outages(query.channel_id.as_deref(), query.since)
    {
        Ok(outages) => Json(outages).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Control surface
// ============================================================================

pub async fn handle_pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.pause(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "unknown channel").into_response()
    }
}

pub async fn handle_resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.resume(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "unknown channel").into_response()
    }
}

pub async fn handle_run_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.engine.run_now(&id).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::NOT_FOUND, "unknown channel").into_response()
    }
}

pub async fn handle_stop_all(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.stop_all().await;
    StatusCode::NO_CONTENT
}

pub async fn handle_reload(
    State(state): State<AppState>,
    Json(channels): Json<Vec<Channel>>,
) -> impl IntoResponse {
    if let Err(e) = validate_channels(&channels) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    state.engine.reload(channels).await;
    StatusCode::NO_CONTENT.into_response()
}
