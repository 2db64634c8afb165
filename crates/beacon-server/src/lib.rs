//! Beacon relay server library logic.

pub mod api_events;
pub mod api_resource;
pub mod background;
pub mod config;
pub mod ingress;
pub mod publisher;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, delete, get, post},
    Extension, Json, Router,
};
use beacon_observe::ObservableResource;
use beacon_store::EventStore;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};
use crate::ingress::Ingress;
use crate::publisher::{MqttPublisher, PublishError};

/// Paths routed independently of the observable resource.
const FIXED_ROUTES: &[&str] = &[
    "/health",
    "/ping",
    "/beacon/arrival",
    "/beacon/departure",
    "/events",
    "/events/cleanup",
    "/beacons/status",
    "/stats",
];

/// Errors that prevent the server state from being built.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The broker publisher could not be created.
    #[error(transparent)]
    Publisher(#[from] PublishError),

    /// The configured resource path cannot be routed.
    #[error("invalid observe.resource {path:?}: {reason}")]
    ResourcePath { path: String, reason: &'static str },
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Canonical event log.
    pub store: Arc<EventStore>,
    /// Observable resource fed by every accepted event.
    pub resource: Arc<ObservableResource>,
    /// Validation and fan-out of new events.
    pub ingress: Arc<Ingress>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Builds state with no broker publishing.
    pub fn new(store: Arc<EventStore>, resource: Arc<ObservableResource>) -> Self {
        let ingress = Ingress::new(store.clone(), resource.clone());
        Self::with_ingress(store, resource, ingress)
    }

    pub fn with_ingress(
        store: Arc<EventStore>,
        resource: Arc<ObservableResource>,
        ingress: Ingress,
    ) -> Self {
        Self {
            store,
            resource,
            ingress: Arc::new(ingress),
            started_at: Instant::now(),
        }
    }

    /// Builds state from configuration, wiring the broker publisher when
    /// enabled.
    ///
    /// Must be called from within a Tokio runtime when publishing is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::ResourcePath` if the resource path collides
    /// with a fixed route or contains route syntax, and
    /// `StartupError::Publisher` if the broker address is invalid.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let resource_path = resource_path(&config.observe.resource)?;
        let store = Arc::new(EventStore::new(config.store.max_events));
        let resource = Arc::new(ObservableResource::new(
            resource_path,
            config.observe.observer_buffer,
        ));

        let mut ingress = Ingress::new(store.clone(), resource.clone());
        if config.publisher.enabled {
            let publisher = MqttPublisher::connect(
                &config.publisher.broker_url,
                &config.publisher.client_id,
                config.publisher.timeout(),
            )?;
            tracing::info!(
                broker = %config.publisher.broker_url,
                topic = %config.publisher.topic,
                "broker publishing enabled"
            );
            ingress = ingress.with_publisher(Arc::new(publisher), config.publisher.topic.clone());
        } else {
            tracing::info!("broker publishing disabled");
        }

        Ok(Self::with_ingress(store, resource, ingress))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Normalizes the configured resource path and checks that it can be
/// mounted next to the fixed routes.
fn resource_path(configured: &str) -> Result<String, StartupError> {
    let path = normalize_path(configured);
    let reason = if path.contains(['{', '}', '*']) {
        Some("route syntax is not allowed")
    } else if FIXED_ROUTES.contains(&path.as_str()) {
        Some("collides with a built-in route")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StartupError::ResourcePath { path, reason }),
        None => Ok(path),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Installs the global tracing subscriber.
///
/// An unparseable level falls back to `info`.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Maximum request body size (64 KiB). Events are small.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// JSON error body: `{"error": message}`.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Liveness probe used by the gateway firmware.
async fn ping() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "pong",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Fallback for unknown paths.
async fn not_found(Extension(state): Extension<Arc<AppState>>) -> Response {
    let resource = state.resource.path();
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not found",
            "availableEndpoints": [
                "POST /beacon/arrival",
                "POST /beacon/departure",
                "POST /events",
                "GET /ping",
                "GET /health",
                "GET /events",
                "GET /stats",
                "GET /beacons/status",
                "GET /beacon/{sourceId}/events",
                "DELETE /events/cleanup",
                format!("GET|POST {resource}"),
            ]
        })),
    )
        .into_response()
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let resource_path = state.resource.path().to_string();

    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/beacon/arrival", post(api_events::arrival_handler))
        .route("/beacon/departure", post(api_events::departure_handler))
        .route(
            "/events",
            get(api_events::list_events_handler).post(api_events::ingest_handler),
        )
        .route("/events/cleanup", delete(api_events::cleanup_handler))
        .route("/beacons/status", get(api_events::beacons_status_handler))
        .route("/stats", get(api_events::stats_handler))
        .route(
            "/beacon/{sourceId}/events",
            get(api_events::source_events_handler),
        )
        .route(&resource_path, any(api_resource::resource_handler))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
