use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use delivery_tracker::api::rest::router;
use delivery_tracker::api::rest::ws::tracking_messages;
use delivery_tracker::geo::geocoder::GeocoderConfig;
use delivery_tracker::state::AppState;
use delivery_tracker::tracking::tracker::TrackerSettings;
use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;
use tower::ServiceExt;

fn app_state() -> Arc<AppState> {
    let geocoder = GeocoderConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        retries: 0,
        backoff: Duration::from_millis(1),
        ..GeocoderConfig::default()
    };
    let settings = TrackerSettings {
        poll_interval: Duration::from_millis(20),
        ..TrackerSettings::default()
    };

    Arc::new(AppState::new(1024, geocoder, settings).unwrap())
}

fn setup() -> axum::Router {
    router(app_state())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    empty_request("GET", uri)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_merchant(app: &axum::Router) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/merchants",
            json!({ "name": "Pho 24", "address": "Ben Thanh Market, District 1" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn create_drone(app: &axum::Router) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({ "name": "drone-1", "location": { "lat": 10.7725, "lng": 106.698 } }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn create_order(app: &axum::Router, merchant_id: &str) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({ "merchant_id": merchant_id, "delivery_address": "Landmark 81, Binh Thanh" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["merchants"], 0);
    assert_eq!(body["drones"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["active_trackers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("active_trackers"));
    assert!(body.contains("deliveries_auto_failed_total"));
}

#[tokio::test]
async fn create_merchant_empty_name_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/merchants",
            json!({ "name": "  ", "address": "Ben Thanh Market" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_drone_starts_idle() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({ "name": "drone-9", "location": { "lat": 10.8, "lng": 106.7 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "drone-9");
    assert_eq!(body["status"], "Idle");
    assert_eq!(body["location"]["lat"], 10.8);
}

#[tokio::test]
async fn create_drone_out_of_range_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({ "name": "drone-9", "location": { "lat": 95.0, "lng": 106.7 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_for_unknown_merchant_returns_404() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "merchant_id": "00000000-0000-0000-0000-000000000000",
                "delivery_address": "Landmark 81"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_order_returns_pending() {
    let app = setup();
    let merchant_id = create_merchant(&app).await;
    let order_id = create_order(&app, &merchant_id).await;

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await;
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["merchant_id"], merchant_id);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shipping_requires_an_assignment() {
    let app = setup();
    let merchant_id = create_merchant(&app).await;
    let order_id = create_order(&app, &merchant_id).await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "Shipping" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelled_order_cannot_be_confirmed() {
    let app = setup();
    let merchant_id = create_merchant(&app).await;
    let order_id = create_order(&app, &merchant_id).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "Cancelled" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "Confirmed" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn busy_drone_cannot_be_assigned_twice() {
    let app = setup();
    let merchant_id = create_merchant(&app).await;
    let drone_id = create_drone(&app).await;
    let first = create_order(&app, &merchant_id).await;
    let second = create_order(&app, &merchant_id).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{first}/assignment"),
            json!({ "drone_id": drone_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{second}/assignment"),
            json!({ "drone_id": drone_id }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn tracking_unknown_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";

    let res = app
        .clone()
        .oneshot(empty_request("POST", &format!("/orders/{fake_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app
        .oneshot(get_request(&format!("/orders/{fake_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_tracking_flow() {
    let state = app_state();
    let app = router(state.clone());

    let merchant_id = create_merchant(&app).await;
    let drone_id = create_drone(&app).await;
    let order_id = create_order(&app, &merchant_id).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/assignment"),
            json!({
                "drone_id": drone_id,
                "pickup": { "lat": 10.7725, "lng": 106.698 },
                "dropoff": { "lat": 10.795, "lng": 106.7218 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assignment = body_json(res).await;
    assert_eq!(assignment["drone_id"], drone_id);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["status"], "Shipping");

    let res = app
        .clone()
        .oneshot(empty_request("POST", &format!("/orders/{order_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tracking = body_json(res).await;
    assert_eq!(tracking["order_id"], order_id);
    assert_eq!(tracking["order_status"], "Shipping");
    assert_eq!(tracking["loading"], false);
    assert_eq!(tracking["arrived"], false);
    assert!(tracking["remaining_km"].as_f64().unwrap() > 0.0);
    assert!(tracking["position"]["lat"].as_f64().unwrap() >= 10.7725);
    assert_eq!(state.trackers.active(), 1);

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "Completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}/tracking")))
        .await
        .unwrap();
    let tracking = body_json(res).await;
    assert_eq!(tracking["order_status"], "Completed");
    assert_eq!(state.trackers.active(), 0);

    let res = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/orders/{order_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}/tracking")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tracking_stream_delivers_snapshots_until_the_order_is_final() {
    let state = app_state();
    let app = router(state.clone());

    let merchant_id = create_merchant(&app).await;
    let drone_id = create_drone(&app).await;
    let order_id = create_order(&app, &merchant_id).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/assignment"),
            json!({
                "drone_id": drone_id,
                "pickup": { "lat": 10.7725, "lng": 106.698 },
                "dropoff": { "lat": 10.795, "lng": 106.7218 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let rx = state
        .trackers
        .start(Uuid::parse_str(&order_id).unwrap())
        .unwrap();
    let mut messages = Box::pin(tracking_messages(rx));

    let first: Value = serde_json::from_str(&messages.next().await.unwrap()).unwrap();
    assert_eq!(first["order_id"], order_id);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            json!({ "status": "Completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let rest: Vec<String> = tokio::time::timeout(Duration::from_secs(2), messages.collect())
        .await
        .expect("stream ends once tracking halts");
    let last: Value = serde_json::from_str(rest.last().unwrap()).unwrap();
    assert_eq!(last["order_status"], "Completed");
    assert_eq!(last["loading"], false);
}
