use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rinha_gateway::{api, GatewayConfig, MockHttpClient, PaymentGateway, Storage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const DEFAULT_HEALTH: &str = "http://default.example.com/payments/service-health";
const DEFAULT_PAYMENTS: &str = "http://default.example.com/payments";

fn create_test_config() -> GatewayConfig {
    GatewayConfig {
        default_processor_url: "http://default.example.com".to_string(),
        fallback_processor_url: "http://fallback.example.com".to_string(),
        worker_concurrency: 2,
        queue_capacity: 100,
        queue_receive_timeout: Duration::from_millis(20),
        health_check_cycle_interval: Duration::from_secs(60),
        ..GatewayConfig::default()
    }
}

fn create_app(config: GatewayConfig) -> (Router, Arc<PaymentGateway>) {
    let http_client = Arc::new(
        MockHttpClient::new()
            .with_response(
                DEFAULT_HEALTH,
                200,
                r#"{"failing": false, "minResponseTime": 1}"#,
            )
            .with_response(DEFAULT_PAYMENTS, 200, "{}"),
    );
    let gateway = PaymentGateway::start(
        Storage::in_memory(config.queue_capacity),
        http_client,
        config,
    );
    (api::router(gateway.clone()), gateway)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_post_payment_returns_success() {
    let (app, gateway) = create_app(create_test_config());

    let (status, body) = send(
        &app,
        post_json("/payments", r#"{"correlationId":"abc-1","amount":19.90}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "correlationId": "abc-1"}));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_post_payment_rejects_invalid_input() {
    let (app, gateway) = create_app(create_test_config());

    for payload in [
        r#"{"correlationId":"abc-1","amount":0}"#,
        r#"{"correlationId":"abc-1","amount":-10.5}"#,
        r#"{"correlationId":"","amount":10}"#,
        r#"{"amount":10}"#,
        r#"{"correlationId":"abc-1""#,
    ] {
        let (status, body) = send(&app, post_json("/payments", payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
        assert!(body["error"].is_string());
    }

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_post_payment_on_full_queue_is_unavailable() {
    let config = GatewayConfig {
        worker_concurrency: 0,
        queue_capacity: 1,
        ..create_test_config()
    };
    let (app, gateway) = create_app(config);

    let first_payment = post_json("/payments", r#"{"correlationId":"q-1","amount":1}"#);
    let (first, _) = send(&app, first_payment).await;
    let second_payment = post_json("/payments", r#"{"correlationId":"q-2","amount":1}"#);
    let (second, body) = send(&app, second_payment).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("full"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_summary_reflects_delivered_payments() {
    let (app, gateway) = create_app(create_test_config());

    for payload in [
        r#"{"correlationId":"sum-1","amount":19.90}"#,
        r#"{"correlationId":"sum-2","amount":0.10}"#,
    ] {
        send(&app, post_json("/payments", payload)).await;
    }

    let mut body = Value::Null;
    for _ in 0..300 {
        let (status, summary) = send(&app, get("/payments-summary")).await;
        assert_eq!(status, StatusCode::OK);
        body = summary;
        if body["default"]["totalRequests"] == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        body,
        json!({
            "default": {"totalRequests": 2, "totalAmount": 20.0},
            "fallback": {"totalRequests": 0, "totalAmount": 0.0}
        })
    );

    let (status, ranged) = send(
        &app,
        get("/payments-summary?from=2000-01-01T00:00:00.000Z&to=2999-12-31T23:59:59.000Z"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranged, body);

    let (status, past) =
        send(&app, get("/payments-summary?from=2000-01-01&to=2000-01-02")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(past["default"]["totalRequests"], 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_summary_rejects_bad_bounds() {
    let (app, gateway) = create_app(create_test_config());

    let (status, _) = send(
        &app,
        get("/payments-summary?from=2025-07-02T00:00:00&to=2025-07-01T00:00:00"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/payments-summary?from=not-a-date")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/payments-summary?to=2025-07-01")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("together"));

    let (status, _) = send(&app, get("/payments-summary?from=2025-07-01")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // blank bounds are absent, so this is the unbounded summary
    let (status, _) = send(&app, get("/payments-summary?from=&to=")).await;
    assert_eq!(status, StatusCode::OK);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_purge_payments() {
    let (app, gateway) = create_app(create_test_config());

    let (status, body) = send(&app, post_json("/purge-payments", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "success", "message": "Payment data purged successfully"})
    );

    let (status, _) = send(&app, get("/purge-payments")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, gateway) = create_app(create_test_config());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    gateway.shutdown().await;
}
