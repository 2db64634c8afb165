use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use beacon_observe::ObservableResource;
use beacon_server::{app, AppState};
use beacon_store::EventStore;
use beacon_types::{Event, EventKind};
use chrono::{TimeDelta, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(
        Arc::new(EventStore::default()),
        Arc::new(ObservableResource::new("/beacon/events", 16)),
    )
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ── ingestion ────────────────────────────────────────────────────────

#[tokio::test]
async fn arrival_route_accepts_gateway_payload() {
    let state = test_state();
    let (status, body) = send(
        app(state.clone()),
        post_json(
            "/beacon/arrival",
            json!({"beaconId": "tag-7", "deviceId": "esp32-01", "rssi": -70, "name": "Lobby"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["eventsCount"], 1);
    assert_eq!(body["event"]["kind"], "arrival");
    assert_eq!(body["event"]["sourceId"], "tag-7");
    assert_eq!(body["event"]["entityId"], "esp32-01");
    assert_eq!(body["event"]["signalStrength"], -70.0);
    assert_eq!(body["event"]["attributes"]["name"], "Lobby");
    assert_eq!(state.store.len(), 1);
}

#[tokio::test]
async fn departure_route_overrides_body_kind() {
    let state = test_state();
    let (status, body) = send(
        app(state),
        post_json(
            "/beacon/departure",
            json!({"eventType": "arrival", "beaconId": "tag-7", "deviceId": "esp32-01"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"]["kind"], "departure");
}

#[tokio::test]
async fn missing_required_field_is_rejected_without_side_effects() {
    let state = test_state();
    let (status, body) = send(
        app(state.clone()),
        post_json("/beacon/arrival", json!({"beaconId": "tag-7"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("entityId"));
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn undecodable_body_is_a_bad_request() {
    let state = test_state();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app(state), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("invalid event payload"));
}

#[tokio::test]
async fn generic_ingest_requires_kind() {
    let state = test_state();
    let (status, _) = send(
        app(state.clone()),
        post_json("/events", json!({"entityId": "p", "sourceId": "s"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app(state),
        post_json(
            "/events",
            json!({"kind": "departure", "entityId": "p", "sourceId": "s"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"]["kind"], "departure");
}

// ── queries ──────────────────────────────────────────────────────────

async fn seed(state: &AppState, events: &[(&str, &str, &str)]) {
    for (route, source, entity) in events {
        let (status, _) = send(
            app(state.clone()),
            post_json(route, json!({"sourceId": source, "entityId": entity})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn events_are_listed_newest_first_with_paging() {
    let state = test_state();
    seed(
        &state,
        &[
            ("/beacon/arrival", "beacon-A", "p1"),
            ("/beacon/arrival", "beacon-B", "p2"),
            ("/beacon/departure", "beacon-A", "p1"),
        ],
    )
    .await;

    let (status, body) = send(app(state), get("/events?limit=2&offset=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let sources: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["sourceId"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["beacon-B", "beacon-A"]);
    assert_eq!(body["connectedEntities"], json!(["p1", "p2"]));
}

#[tokio::test]
async fn beacon_status_reports_latest_event_per_source() {
    let state = test_state();
    seed(
        &state,
        &[
            ("/beacon/arrival", "beacon-A", "phone-1"),
            ("/beacon/arrival", "beacon-B", "phone-2"),
            ("/beacon/departure", "beacon-A", "phone-1"),
        ],
    )
    .await;

    let (status, body) = send(app(state), get("/beacons/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["present"], 1);
    assert_eq!(body["absent"], 1);
    assert_eq!(body["beacons"][0]["sourceId"], "beacon-A");
    assert_eq!(body["beacons"][0]["status"], "departure");
    assert_eq!(body["beacons"][1]["status"], "arrival");
}

#[tokio::test]
async fn stats_count_the_requested_window() {
    let state = test_state();
    state.store.append(Event::new(
        EventKind::Arrival,
        "old-phone",
        "beacon-Z",
        Utc::now() - TimeDelta::hours(30),
    ));
    seed(
        &state,
        &[
            ("/beacon/arrival", "beacon-A", "p1"),
            ("/beacon/departure", "beacon-A", "p1"),
        ],
    )
    .await;

    let (status, body) = send(app(state.clone()), get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalEvents"], 3);
    assert_eq!(body["window"]["hours"], 24);
    assert_eq!(body["window"]["total"], 2);
    assert_eq!(body["window"]["arrivals"], 1);
    assert_eq!(body["window"]["departures"], 1);
    assert_eq!(body["window"]["uniqueSources"], 1);
    assert_eq!(body["observers"], 0);

    let (_, body) = send(app(state), get("/stats?hours=48")).await;
    assert_eq!(body["window"]["total"], 3);
}

#[tokio::test]
async fn source_history_is_newest_first_and_limited() {
    let state = test_state();
    seed(
        &state,
        &[
            ("/beacon/arrival", "beacon-A", "first"),
            ("/beacon/arrival", "beacon-B", "other"),
            ("/beacon/departure", "beacon-A", "second"),
            ("/beacon/arrival", "beacon-A", "third"),
        ],
    )
    .await;

    let (status, body) = send(app(state), get("/beacon/beacon-A/events?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sourceId"], "beacon-A");
    assert_eq!(body["total"], 2);
    assert_eq!(body["events"][0]["entityId"], "third");
    assert_eq!(body["events"][1]["entityId"], "second");
}

#[tokio::test]
async fn cleanup_removes_events_older_than_days() {
    let state = test_state();
    state.store.append(Event::new(
        EventKind::Arrival,
        "p",
        "beacon-A",
        Utc::now() - TimeDelta::days(3),
    ));
    state.store.append(Event::new(EventKind::Arrival, "p", "beacon-A", Utc::now()));

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/events/cleanup?days=1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(state.clone()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["removed"], 1);
    assert_eq!(body["remaining"], 1);
    assert_eq!(state.store.len(), 1);
}

// ── liveness / fallback ──────────────────────────────────────────────

#[tokio::test]
async fn ping_and_health_respond() {
    let state = test_state();
    let (status, body) = send(app(state.clone()), get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(app(state), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_path_lists_available_endpoints() {
    let (status, body) = send(app(test_state()), get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
    let endpoints = body["availableEndpoints"].as_array().unwrap();
    assert!(endpoints.iter().any(|e| e == "POST /beacon/arrival"));
    assert!(endpoints.iter().any(|e| e == "GET|POST /beacon/events"));
}
