//! End-to-end tests: real batcher, real HTTP dispatch against an
//! in-process stub model server, and the assembled ingress router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use nexus_proxy::batcher::Batcher;
use nexus_proxy::client::ModelClient;
use nexus_proxy::AppState;

/// How the stub model server answers a batch.
#[derive(Clone, Copy)]
enum BackendMode {
    /// Result mirrors each request's data
    Echo,
    /// Plain 503 for the whole batch
    Unavailable,
    /// Requests whose data contains `"fail": true` get a per-request error
    PartialError,
    /// The first request in the batch gets no response entry at all
    DropFirst,
}

async fn stub_batch(State(mode): State<BackendMode>, Json(body): Json<Value>) -> axum::response::Response {
    let requests = body["requests"].as_array().cloned().unwrap_or_default();

    match mode {
        BackendMode::Unavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response()
        }
        BackendMode::Echo => {
            let responses: Vec<Value> = requests
                .iter()
                .map(|r| json!({ "id": r["id"], "result": r["data"] }))
                .collect();
            Json(json!({ "responses": responses })).into_response()
        }
        BackendMode::PartialError => {
            let responses: Vec<Value> = requests
                .iter()
                .map(|r| {
                    if r["data"]["fail"] == json!(true) {
                        json!({ "id": r["id"], "error": "bad input" })
                    } else {
                        json!({ "id": r["id"], "result": r["data"] })
                    }
                })
                .collect();
            Json(json!({ "responses": responses })).into_response()
        }
        BackendMode::DropFirst => {
            let responses: Vec<Value> = requests
                .iter()
                .skip(1)
                .map(|r| json!({ "id": r["id"], "result": r["data"] }))
                .collect();
            Json(json!({ "responses": responses })).into_response()
        }
    }
}

/// Bind a stub model server on an ephemeral port and return its base URL.
async fn spawn_backend(mode: BackendMode) -> String {
    let app = Router::new()
        .route("/predict/batch", post(stub_batch))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .with_state(mode);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// Assemble the proxy against the given backend.
fn proxy_app(base_url: &str, batch_size: usize, timeout: Duration) -> (Router, Arc<AppState>) {
    let client = Arc::new(ModelClient::new(base_url, batch_size));
    let batcher = Batcher::start(batch_size, timeout, client);
    let state = Arc::new(AppState::new(batcher));
    (nexus_proxy::app(Arc::clone(&state)), state)
}

async fn post_predict(app: &Router, body: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_predict_round_trip() {
    let backend = spawn_backend(BackendMode::Echo).await;
    let (app, _state) = proxy_app(&backend, 4, Duration::from_millis(10));

    let (status, body) = post_predict(&app, r#"{"data":{"input":[1,2,3]}}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["request_id"].is_string());
    assert_eq!(body["result"], json!({ "input": [1, 2, 3] }));
    assert!(body.get("error").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_failure_fans_out_to_every_caller() {
    let backend = spawn_backend(BackendMode::Unavailable).await;
    let (app, state) = proxy_app(&backend, 3, Duration::from_millis(200));

    let (a, b, c) = tokio::join!(
        post_predict(&app, r#"{"data":1}"#),
        post_predict(&app, r#"{"data":2}"#),
        post_predict(&app, r#"{"data":3}"#),
    );

    for (status, body) in [&a, &b, &c] {
        assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("503"));
    }
    // Every caller sees the same batch-wide error
    assert_eq!(a.1["error"], b.1["error"]);
    assert_eq!(b.1["error"], c.1["error"]);

    let totals = state.batcher.metrics().snapshot();
    assert_eq!(totals.total_requests, 3);
    assert_eq!(totals.total_batches, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_per_request_backend_error_is_isolated() {
    let backend = spawn_backend(BackendMode::PartialError).await;
    let (app, _state) = proxy_app(&backend, 2, Duration::from_millis(200));

    let (ok, failed) = tokio::join!(
        post_predict(&app, r#"{"data":{"x":1}}"#),
        post_predict(&app, r#"{"data":{"fail":true}}"#),
    );

    assert_eq!(ok.0, StatusCode::OK);
    assert_eq!(ok.1["result"], json!({ "x": 1 }));

    assert_eq!(failed.0, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(failed.1["error"], json!("bad input"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routing_miss_surfaces_not_found() {
    let backend = spawn_backend(BackendMode::DropFirst).await;
    let (app, _state) = proxy_app(&backend, 2, Duration::from_millis(200));

    let (a, b) = tokio::join!(
        post_predict(&app, r#"{"data":1}"#),
        post_predict(&app, r#"{"data":2}"#),
    );

    let errors: Vec<&Value> =
        [&a, &b].iter().filter_map(|(_, body)| body.get("error")).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], &json!("response not found for request"));
    assert_eq!([&a, &b].iter().filter(|(s, _)| *s == StatusCode::OK).count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_request_is_rejected() {
    let backend = spawn_backend(BackendMode::Echo).await;
    let (app, _state) = proxy_app(&backend, 4, Duration::from_millis(10));

    let (status, body) = post_predict(&app, "not json at all").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = post_predict(&app, r#"{"payload":1}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_ready_and_metrics_surfaces() {
    let backend = spawn_backend(BackendMode::Echo).await;
    let (app, _state) = proxy_app(&backend, 4, Duration::from_millis(10));
    nexus_proxy::init_metrics();

    let (status, _) = post_predict(&app, r#"{"data":42}"#).await;
    assert_eq!(status, StatusCode::OK);

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], json!("healthy"));
    assert!(health["uptime"].is_string());
    assert_eq!(health["total_requests"], json!(1));
    assert_eq!(health["total_batches"], json!(1));
    assert_eq!(health["avg_batch_size"], json!(1.0));

    let (status, ready) = get_json(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["status"], json!("ready"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text =
        String::from_utf8(response.into_body().collect().await.unwrap().to_bytes().to_vec())
            .unwrap();
    assert!(text.contains("nexus_proxy_requests_total"));
    assert!(text.contains("nexus_proxy_batches_total"));
    assert!(text.contains("nexus_proxy_batch_size_avg"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_health_check() {
    let backend = spawn_backend(BackendMode::Echo).await;
    let client = ModelClient::new(&backend, 4);
    assert!(client.health_check().await.is_ok());

    let unreachable = ModelClient::new("http://127.0.0.1:1", 4);
    assert!(unreachable.health_check().await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_completes_in_flight_work() {
    let backend = spawn_backend(BackendMode::Echo).await;
    let client = Arc::new(ModelClient::new(&backend, 8));
    let batcher = Arc::new(Batcher::start(8, Duration::from_secs(5), client));

    let submit = {
        let batcher = Arc::clone(&batcher);
        tokio::spawn(async move {
            let payload = serde_json::value::to_raw_value(&json!({ "x": 1 })).unwrap();
            batcher.submit(uuid::Uuid::new_v4(), payload).await
        })
    };

    // Let the request reach the queue, then stop; the pending request must
    // still be dispatched rather than dropped.
    tokio::time::sleep(Duration::from_millis(50)).await;
    batcher.shutdown().await;

    let result = submit.await.unwrap().unwrap();
    assert_eq!(result.get(), r#"{"x":1}"#);
}
