//! Marketplace gateway behavior: error decoding, retry, and circuit
//! breaker integration.

use std::{sync::Arc, time::Duration};

use ordercast_common::{CircuitBreaker, CircuitConfig, CircuitState};
use receiver_sync::{GatewayConfig, MarketplaceGateway, SyncError};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway_for(
    server: &MockServer,
    max_attempts: u32,
    circuit_config: CircuitConfig,
) -> (MarketplaceGateway, Arc<CircuitBreaker>) {
    let circuit = Arc::new(CircuitBreaker::new(circuit_config));
    let gateway = MarketplaceGateway::new(
        GatewayConfig {
            base_url: server.uri(),
            timeout: Duration::from_millis(500),
            max_attempts,
        },
        circuit.clone(),
    )
    .expect("gateway builds");
    (gateway, circuit)
}

#[tokio::test]
async fn fetches_order_by_id() {
    let server = MockServer::start().await;
    let order = json!({"id": "order-1", "status": "PAID", "total_amount": "28.90"});
    Mock::given(method("GET"))
        .and(path("/api/v1/orders/order-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&order))
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, 1, CircuitConfig::default());

    let fetched = gateway.find_order("order-1").await.expect("fetch succeeds");
    assert_eq!(fetched, order);
}

#[tokio::test]
async fn marketplace_not_found_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "type": "ORDER_NOT_FOUND",
            "message": "order missing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Three attempts configured, but the permanent error must not retry.
    let (gateway, _) = gateway_for(&server, 3, CircuitConfig::default());

    match gateway.find_order("missing").await {
        Err(SyncError::OrderNotFound { order_id }) => assert_eq!(order_id, "missing"),
        other => panic!("expected OrderNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn foreign_404_stays_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<html>not here</html>"))
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, 1, CircuitConfig::default());

    match gateway.find_order("order-1").await {
        Err(SyncError::HttpStatus { status }) => assert_eq!(status, 404),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried_up_to_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, 3, CircuitConfig::default());

    match gateway.find_order("order-1").await {
        Err(SyncError::HttpStatus { status }) => assert_eq!(status, 503),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn open_circuit_maps_to_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (gateway, circuit) = gateway_for(&server, 1, CircuitConfig::default());
    circuit.force_state(&server.uri(), CircuitState::Open).await;

    match gateway.find_order("order-1").await {
        Err(SyncError::ServiceUnavailable { .. }) => {},
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_does_not_consume_the_failure_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "type": "ORDER_NOT_FOUND",
            "message": "order missing"
        })))
        .mount(&server)
        .await;

    let tight = CircuitConfig {
        window_size: 2,
        failure_rate_threshold: 0.5,
        cooldown: Duration::from_secs(30),
        half_open_max_probes: 1,
        success_threshold: 1,
    };
    let (gateway, circuit) = gateway_for(&server, 1, tight);

    // Far more permanent misses than the window tolerates for failures.
    for _ in 0..10 {
        let result = gateway.find_order("missing").await;
        assert!(matches!(result, Err(SyncError::OrderNotFound { .. })));
    }

    // The breaker never saw them; other traffic still flows.
    assert_ne!(circuit.state(&server.uri()).await, Some(CircuitState::Open));
    assert!(circuit.should_allow(&server.uri()).await);
}

#[tokio::test]
async fn transient_failures_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let tight = CircuitConfig {
        window_size: 2,
        failure_rate_threshold: 0.5,
        cooldown: Duration::from_secs(30),
        half_open_max_probes: 1,
        success_threshold: 1,
    };
    let (gateway, circuit) = gateway_for(&server, 1, tight);

    let _ = gateway.find_order("order-1").await;
    let _ = gateway.find_order("order-1").await;

    assert_eq!(circuit.state(&server.uri()).await, Some(CircuitState::Open));
    match gateway.find_order("order-1").await {
        Err(SyncError::ServiceUnavailable { .. }) => {},
        other => panic!("expected ServiceUnavailable, got {other:?}"),
    }
}
