//! Dispatch gateway behavior: headers, status handling, timeouts, bounded
//! attempts, and circuit breaker integration.

use std::{sync::Arc, time::Duration};

use market_delivery::{DispatchConfig, DispatchError, DispatchGateway};
use ordercast_common::{CircuitBreaker, CircuitConfig, CircuitState};
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway_with(config: DispatchConfig) -> (DispatchGateway, Arc<CircuitBreaker>) {
    let circuit = Arc::new(CircuitBreaker::new(CircuitConfig::default()));
    let gateway = DispatchGateway::new(config, circuit.clone()).expect("gateway builds");
    (gateway, circuit)
}

#[tokio::test]
async fn sends_payload_with_authorization_header() {
    let server = MockServer::start().await;
    let payload = json!({"id": "order-1", "status": "CREATED"});

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("authorization", "secret-token"))
        .and(header("content-type", "application/json"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_with(DispatchConfig::default());
    let url = format!("{}/hook", server.uri());

    gateway.send(&url, "secret-token", &payload).await.expect("dispatch succeeds");
}

#[tokio::test]
async fn any_2xx_counts_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(204)).mount(&server).await;

    let (gateway, _) = gateway_with(DispatchConfig::default());

    assert!(gateway.send(&server.uri(), "t", &json!({})).await.is_ok());
}

#[tokio::test]
async fn non_2xx_is_a_dispatch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

    let (gateway, _) = gateway_with(DispatchConfig::default());

    match gateway.send(&server.uri(), "t", &json!({})).await {
        Err(DispatchError::HttpStatus { status }) => assert_eq!(status, 404),
        other => panic!("expected HttpStatus error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_destination_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = DispatchConfig { timeout: Duration::from_millis(100), ..Default::default() };
    let (gateway, _) = gateway_with(config);

    match gateway.send(&server.uri(), "t", &json!({})).await {
        Err(DispatchError::Timeout { .. }) => {},
        other => panic!("expected Timeout error, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_failure_maps_to_network_error() {
    // Nothing listens here.
    let (gateway, _) = gateway_with(DispatchConfig::default());

    match gateway.send("http://127.0.0.1:1/hook", "t", &json!({})).await {
        Err(DispatchError::Network { .. } | DispatchError::Timeout { .. }) => {},
        other => panic!("expected Network error, got {other:?}"),
    }
}

#[tokio::test]
async fn bounded_attempts_are_exhausted_then_surface_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let config = DispatchConfig { max_attempts: 3, ..Default::default() };
    let (gateway, _) = gateway_with(config);

    match gateway.send(&server.uri(), "t", &json!({})).await {
        Err(DispatchError::HttpStatus { status }) => assert_eq!(status, 500),
        other => panic!("expected HttpStatus error, got {other:?}"),
    }
}

#[tokio::test]
async fn no_retry_after_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = DispatchConfig { max_attempts: 3, ..Default::default() };
    let (gateway, _) = gateway_with(config);

    gateway.send(&server.uri(), "t", &json!({})).await.expect("dispatch succeeds");
}

#[tokio::test]
async fn open_circuit_rejects_without_calling_destination() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (gateway, circuit) = gateway_with(DispatchConfig::default());
    let url = server.uri();
    circuit.force_state(&url, CircuitState::Open).await;

    match gateway.send(&url, "t", &json!({})).await {
        Err(DispatchError::CircuitOpen { destination }) => assert_eq!(destination, url),
        other => panic!("expected CircuitOpen error, got {other:?}"),
    }
}

#[tokio::test]
async fn failures_feed_the_circuit_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let circuit = Arc::new(CircuitBreaker::new(CircuitConfig {
        window_size: 4,
        failure_rate_threshold: 0.5,
        cooldown: Duration::from_secs(30),
        half_open_max_probes: 1,
        success_threshold: 1,
    }));
    let gateway =
        DispatchGateway::new(DispatchConfig::default(), circuit.clone()).expect("gateway builds");
    let url = server.uri();

    for _ in 0..4 {
        let _ = gateway.send(&url, "t", &json!({})).await;
    }

    assert_eq!(circuit.state(&url).await, Some(CircuitState::Open));
    match gateway.send(&url, "t", &json!({})).await {
        Err(DispatchError::CircuitOpen { .. }) => {},
        other => panic!("expected CircuitOpen error, got {other:?}"),
    }
}
