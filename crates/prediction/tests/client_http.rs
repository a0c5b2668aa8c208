use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use readytime_prediction::{
    ApiConfig, CartLineItem, PredictionBackend, PredictionClient, PredictionError,
    PredictionMethod, PredictionRequest, PredictionResult,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

#[derive(Clone)]
struct MockBackendState {
    status: StatusCode,
    body: String,
    delay: Duration,
    received: Arc<Mutex<Vec<PredictionRequest>>>,
}

struct MockBackend {
    address: String,
    received: Arc<Mutex<Vec<PredictionRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    async fn start(status: StatusCode, body: impl Into<String>, delay: Duration) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = MockBackendState {
            status,
            body: body.into(),
            delay,
            received: received.clone(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend listener");
        let addr = listener.local_addr().expect("listener addr lookup");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = Router::new()
            .route("/predict", post(predict))
            .route("/health", get(health))
            .with_state(state);

        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            let graceful = server.with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = graceful.await;
        });

        Self {
            address: format!("http://{}", addr),
            received,
            shutdown: Some(shutdown_tx),
        }
    }

    async fn json(body: Value) -> Self {
        Self::start(StatusCode::OK, body.to_string(), Duration::ZERO).await
    }

    fn client(&self) -> PredictionClient {
        PredictionClient::new(&ApiConfig {
            endpoint: self.address.clone(),
            timeout_seconds: 1,
            max_retries: 0,
        })
        .expect("client for mock backend")
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn predict(
    State(state): State<MockBackendState>,
    Json(request): Json<PredictionRequest>,
) -> (StatusCode, String) {
    state.received.lock().push(request);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, state.body.clone())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "model_loaded": true, "version": "1.0.0"}))
}

fn cart() -> Vec<CartLineItem> {
    vec![
        CartLineItem::new("dosa", 2).with_base_time(6.0).with_complexity(2),
        CartLineItem::new("chai", 1),
    ]
}

fn model_response() -> Value {
    json!({
        "predicted_ready_time": "2024-03-01T12:24:00",
        "estimated_minutes": 24.25,
        "confidence": 0.82,
        "queue_position": 4,
        "method": "ml_model",
        "rush_detected": true,
        "breakdown": {
            "base_time_minutes": 17.0,
            "queue_effect_minutes": 7.25,
            "demand_factor_label": "lunch_rush"
        }
    })
}

fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("allocate ephemeral port")
        .local_addr()
        .expect("extract ephemeral addr")
        .port()
}

#[tokio::test]
async fn well_formed_response_is_trusted_verbatim() {
    let backend = MockBackend::json(model_response()).await;
    let result = backend
        .client()
        .request_prediction("canteen-1", &cart())
        .await
        .expect("prediction");

    assert_eq!(result.estimated_minutes, 24.25);
    assert_eq!(result.confidence, 0.82);
    assert_eq!(result.queue_position, 4);
    assert_eq!(result.method, PredictionMethod::Model);
    assert!(result.rush_detected);
    assert_eq!(
        result.breakdown.as_ref().map(|b| b.demand_factor_label.as_str()),
        Some("lunch_rush")
    );
    assert_eq!(result.predicted_ready_time.to_rfc3339(), "2024-03-01T12:24:00+00:00");
}

#[tokio::test]
async fn request_body_carries_defaults_and_aggregates() {
    let backend = MockBackend::json(model_response()).await;
    backend
        .client()
        .request_prediction("canteen-1", &cart())
        .await
        .expect("prediction");

    let received = backend.received.lock().clone();
    assert_eq!(received.len(), 1);
    let request = &received[0];
    assert_eq!(request.vendor_id, "canteen-1");
    assert_eq!(request.total_base_time_minutes, 17.0);
    assert_eq!(request.max_complexity, 2);
    assert_eq!(request.total_items, 3);
    assert_eq!(request.items[1].menu_item_id, "chai");
    assert_eq!(request.items[1].base_preparation_time_minutes, 5.0);
    assert_eq!(request.items[1].preparation_complexity, 1);
}

#[tokio::test]
async fn missing_method_reads_as_model() {
    let backend = MockBackend::json(json!({
        "predicted_ready_time": "2024-03-01T12:10:00Z",
        "estimated_minutes": 10.0,
        "confidence": 0.7
    }))
    .await;
    let result = backend
        .client()
        .request_prediction("canteen-1", &cart())
        .await
        .expect("prediction");

    assert_eq!(result.method, PredictionMethod::Model);
    assert_eq!(result.queue_position, -1);
    assert!(!result.rush_detected);
    assert!(result.breakdown.is_none());
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let backend =
        MockBackend::start(StatusCode::INTERNAL_SERVER_ERROR, "model exploded", Duration::ZERO)
            .await;
    let err = backend
        .client()
        .request_prediction("canteen-1", &cart())
        .await
        .expect_err("500 must fail");

    match err {
        PredictionError::Transport(message) => assert!(message.contains("500")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_bodies_are_transport_errors() {
    let bodies = [
        "not json".to_string(),
        json!({"estimated_minutes": 10.0, "confidence": 0.5}).to_string(),
        json!({
            "predicted_ready_time": "2024-03-01T12:10:00Z",
            "estimated_minutes": "ten",
            "confidence": 0.5
        })
        .to_string(),
        json!({
            "predicted_ready_time": "2024-03-01T12:10:00Z",
            "estimated_minutes": 10.0,
            "confidence": 0.5,
            "method": "tea_leaves"
        })
        .to_string(),
    ];

    for body in bodies {
        let backend = MockBackend::start(StatusCode::OK, body.clone(), Duration::ZERO).await;
        let err = backend
            .client()
            .request_prediction("canteen-1", &cart())
            .await
            .expect_err("malformed body must fail");
        assert!(
            matches!(err, PredictionError::Transport(_)),
            "body {body} gave {err:?}"
        );
    }
}

#[tokio::test]
async fn slow_backend_times_out() {
    let backend = MockBackend::start(
        StatusCode::OK,
        model_response().to_string(),
        Duration::from_secs(3),
    )
    .await;
    let err = backend
        .client()
        .request_prediction("canteen-1", &cart())
        .await
        .expect_err("slow backend must time out");

    assert_eq!(err, PredictionError::Timeout);
    assert!(err.is_transient());
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let client = PredictionClient::new(&ApiConfig {
        endpoint: format!("http://127.0.0.1:{}", unused_port()),
        timeout_seconds: 1,
        max_retries: 0,
    })
    .expect("client");

    let err = client
        .request_prediction("canteen-1", &cart())
        .await
        .expect_err("nothing is listening");
    assert!(err.is_transient(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn validation_happens_before_any_request() {
    let backend = MockBackend::json(model_response()).await;
    let client = backend.client();

    let err = client.request_prediction("", &cart()).await.expect_err("empty vendor");
    assert!(matches!(err, PredictionError::Validation(_)));
    let err = client.request_prediction("canteen-1", &[]).await.expect_err("empty cart");
    assert!(matches!(err, PredictionError::Validation(_)));

    assert!(backend.received.lock().is_empty());
}

#[tokio::test]
async fn health_probe_reports_model_state() {
    let backend = MockBackend::json(model_response()).await;
    let health = backend.client().health().await.expect("health");
    assert_eq!(health.status, "healthy");
    assert!(health.model_loaded);
    assert_eq!(health.version, "1.0.0");
}

#[test]
fn parsed_response_reserializes_field_for_field() {
    let original = json!({
        "predicted_ready_time": "2024-03-01T12:24:00.125Z",
        "estimated_minutes": 24.123456789,
        "confidence": 0.8125,
        "queue_position": 4,
        "method": "model",
        "rush_detected": true,
        "breakdown": {
            "base_time_minutes": 17.0,
            "queue_effect_minutes": 7.123456789,
            "demand_factor_label": "lunch_rush"
        }
    });

    let parsed = PredictionResult::from_value(original.clone()).expect("well-formed");
    let mut reserialized = serde_json::to_value(&parsed).expect("serialize");

    let original_time = original["predicted_ready_time"].as_str().unwrap();
    let reserialized_time = reserialized["predicted_ready_time"].as_str().unwrap().to_string();
    assert_eq!(
        chrono::DateTime::parse_from_rfc3339(original_time).unwrap(),
        chrono::DateTime::parse_from_rfc3339(&reserialized_time).unwrap()
    );

    reserialized["predicted_ready_time"] = original["predicted_ready_time"].clone();
    assert_eq!(reserialized, original);
}
