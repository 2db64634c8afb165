//! Ingestion and query handlers.
//!
//! Provides:
//! - `POST /beacon/arrival`, `POST /beacon/departure`: ingest with the kind taken from the path
//! - `POST /events`: ingest with the kind taken from the body
//! - `GET /events`: newest-first page of the log
//! - `GET /beacons/status`: latest state per source
//! - `GET /stats`: counters over a trailing window
//! - `GET /beacon/{sourceId}/events`: recent history of one source
//! - `DELETE /events/cleanup`: on-demand sweep

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_types::{Attributes, Event, EventKind, RawEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error_response, AppState};

const SECS_PER_HOUR: u64 = 60 * 60;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Body returned when an event is accepted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub event: Event,
    /// Number of events retained after this one was appended.
    pub events_count: usize,
}

/// Decodes a request body into a [`RawEvent`], mapping failures to `400`.
pub(crate) fn decode_raw(body: &Bytes) -> Result<RawEvent, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "undecodable event payload");
        error_response(StatusCode::BAD_REQUEST, format!("invalid event payload: {e}"))
    })
}

/// Runs a raw event through ingress and renders the outcome.
pub(crate) async fn ingest(state: &AppState, raw: RawEvent, accepted: StatusCode) -> Response {
    match state.ingress.accept(raw).await {
        Ok(event) => {
            let message = format!("{} event accepted", event.kind);
            (
                accepted,
                Json(IngestResponse {
                    success: true,
                    message,
                    event,
                    events_count: state.store.len(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejected presence event");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn ingest_kind(state: &AppState, body: &Bytes, kind: EventKind) -> Response {
    match decode_raw(body) {
        Ok(raw) => ingest(state, raw.with_kind(kind), StatusCode::OK).await,
        Err(response) => response,
    }
}

/// Handler for `POST /beacon/arrival`.
pub async fn arrival_handler(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> Response {
    ingest_kind(&state, &body, EventKind::Arrival).await
}

/// Handler for `POST /beacon/departure`.
pub async fn departure_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    ingest_kind(&state, &body, EventKind::Departure).await
}

/// Handler for `POST /events`. The body must carry `kind` (or `eventType`).
pub async fn ingest_handler(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> Response {
    match decode_raw(&body) {
        Ok(raw) => ingest(&state, raw, StatusCode::OK).await,
        Err(response) => response,
    }
}

/// Query parameters for `GET /events`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Page size (default: 100, max: 1000).
    pub limit: Option<usize>,
    /// Number of newest events to skip (default: 0).
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub events: Vec<Event>,
    pub total: usize,
    pub connected_entities: Vec<String>,
}

/// Handler for `GET /events`.
pub async fn list_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Json<ListResponse> {
    let limit = params.limit.filter(|l| *l > 0).unwrap_or(100).min(1000);
    let page = state.store.list(limit, params.offset.unwrap_or(0));

    Json(ListResponse {
        events: page.events,
        total: page.total,
        connected_entities: state.store.entities(),
    })
}

/// One source in `GET /beacons/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconStatus {
    pub source_id: String,
    pub entity_id: String,
    pub status: EventKind,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug, Serialize)]
pub struct BeaconsStatusResponse {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub beacons: Vec<BeaconStatus>,
}

/// Handler for `GET /beacons/status`.
pub async fn beacons_status_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<BeaconsStatusResponse> {
    let entries = state.store.current_state();
    let present = entries.iter().filter(|entry| entry.is_present()).count();

    let beacons: Vec<BeaconStatus> = entries
        .into_iter()
        .map(|entry| BeaconStatus {
            source_id: entry.source_id,
            entity_id: entry.last_event.entity_id,
            status: entry.last_event.kind,
            last_seen: entry.last_event.occurred_at,
            signal_strength: entry.last_event.signal_strength,
            attributes: entry.last_event.attributes,
        })
        .collect();

    Json(BeaconsStatusResponse {
        total: beacons.len(),
        present,
        absent: beacons.len() - present,
        beacons,
    })
}

/// Query parameters for `GET /stats`.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Trailing window in hours (default: 24).
    pub hours: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsWindow {
    pub hours: u64,
    pub total: usize,
    pub arrivals: usize,
    pub departures: usize,
    pub unique_sources: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_events: usize,
    pub window: StatsWindow,
    pub connected_entities: Vec<String>,
    pub uptime_secs: u64,
    pub observers: usize,
}

/// Handler for `GET /stats`.
pub async fn stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StatsQuery>,
) -> Json<StatsResponse> {
    let hours = params.hours.unwrap_or(24);
    let stats = state
        .store
        .stats(Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR)));

    Json(StatsResponse {
        total_events: stats.total_events,
        window: StatsWindow {
            hours,
            total: stats.window_total,
            arrivals: stats.arrivals,
            departures: stats.departures,
            unique_sources: stats.unique_sources,
        },
        connected_entities: state.store.entities(),
        uptime_secs: state.uptime_secs(),
        observers: state.resource.observer_count(),
    })
}

/// Query parameters for `GET /beacon/{sourceId}/events`.
#[derive(Debug, Deserialize)]
pub struct SourceEventsQuery {
    /// Maximum number of events (default: 50).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEventsResponse {
    pub source_id: String,
    pub events: Vec<Event>,
    pub total: usize,
}

/// Handler for `GET /beacon/{sourceId}/events`.
pub async fn source_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(source_id): Path<String>,
    Query(params): Query<SourceEventsQuery>,
) -> Json<SourceEventsResponse> {
    let limit = params.limit.filter(|l| *l > 0).unwrap_or(50);
    let events = state.store.events_for(&source_id, limit);

    Json(SourceEventsResponse {
        total: events.len(),
        source_id,
        events,
    })
}

/// Query parameters for `DELETE /events/cleanup`.
#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    /// Keep events from the last `days` days (default: 7).
    pub days: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub removed: usize,
    pub remaining: usize,
}

/// Handler for `DELETE /events/cleanup`.
pub async fn cleanup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<CleanupQuery>,
) -> Json<CleanupResponse> {
    let days = params.days.unwrap_or(7);
    let removed = state
        .store
        .sweep(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)));

    tracing::info!(removed, days, "cleanup requested");
    Json(CleanupResponse {
        success: true,
        message: format!("removed {removed} events older than {days} days"),
        removed,
        remaining: state.store.len(),
    })
}
