//! The observable resource endpoint.
//!
//! One path, dispatched on method:
//! - `GET` with an `Observe` header: register an observer and stream
//!   newline-delimited JSON envelopes, snapshot first
//! - `GET`: status summary
//! - `POST`: submit an event through ingress (`201` on acceptance)
//! - anything else: `405`

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::Extension,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use beacon_observe::{ObservableResource, Observer, ObserverId, NDJSON_CONTENT_TYPE, OBSERVE_HEADER};
use serde::Serialize;

use crate::api_events::{decode_raw, ingest};
use crate::{error_response, AppState};

/// Body of a plain `GET` on the resource.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub status: &'static str,
    pub events_count: usize,
    pub resource: String,
    pub observers: usize,
}

/// Handler for every method on the resource path.
pub async fn resource_handler(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::GET if headers.contains_key(OBSERVE_HEADER) => observe(&state),
        Method::GET => Json(ResourceStatus {
            status: "ready",
            events_count: state.store.len(),
            resource: state.resource.path().to_string(),
            observers: state.resource.observer_count(),
        })
        .into_response(),
        Method::POST => match decode_raw(&body) {
            Ok(raw) => ingest(&state, raw, StatusCode::CREATED).await,
            Err(response) => response,
        },
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

/// Detaches the observer when the response stream is dropped, which is how
/// hyper reports a closed connection.
struct DetachOnDrop {
    resource: Arc<ObservableResource>,
    id: ObserverId,
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        if self.resource.unsubscribe(self.id) {
            tracing::debug!(observer = %self.id, "observer connection closed");
        }
    }
}

fn observe(state: &AppState) -> Response {
    let summary = state.store.summary(state.resource.path());
    let observer = match state.resource.subscribe(summary) {
        Ok(observer) => observer,
        Err(e) => {
            tracing::warn!(error = %e, "observer registration failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
    };

    let guard = DetachOnDrop {
        resource: state.resource.clone(),
        id: observer.id(),
    };
    let frames = futures_util::stream::unfold((observer, guard), next_frame);

    (
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

async fn next_frame(
    (mut observer, guard): (Observer, DetachOnDrop),
) -> Option<(Result<String, Infallible>, (Observer, DetachOnDrop))> {
    loop {
        let envelope = observer.recv().await?;
        match envelope.to_frame() {
            Ok(frame) => return Some((Ok(frame), (observer, guard))),
            Err(e) => tracing::warn!(observer = %observer.id(), error = %e, "failed to encode envelope"),
        }
    }
}
