//! Marketplace gateway client: pull authoritative order state.
//!
//! Synchronous fetch-by-id with retry and circuit breaking. The decisive
//! piece is error decoding: a 404 whose body carries the marketplace's
//! `ORDER_NOT_FOUND` type is a permanent condition surfaced immediately,
//! bypassing both the retry loop and the breaker's failure budget. All
//! other failures are transient, and an open breaker maps to the
//! distinguishable `ServiceUnavailable`.

use std::{sync::Arc, time::Duration};

use ordercast_common::CircuitBreaker;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Error type the marketplace uses for a missing order.
const ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";

/// Configuration for the marketplace gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the marketplace service.
    pub base_url: String,
    /// Per-call timeout for the fetch.
    pub timeout: Duration,
    /// Total attempts per fetch, including the first.
    pub max_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

/// Error body shape the marketplace returns on failures.
#[derive(Debug, Deserialize)]
struct MarketplaceError {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    message: String,
}

/// Resilient HTTP client used by the snapshot processor.
pub struct MarketplaceGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    circuit: Arc<CircuitBreaker>,
}

impl MarketplaceGateway {
    /// Creates a gateway with the given configuration and breaker.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: GatewayConfig, circuit: Arc<CircuitBreaker>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("ordercast-receiver/1.0")
            .build()
            .map_err(|e| SyncError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, circuit })
    }

    /// Fetches the authoritative order by its marketplace id.
    ///
    /// Returns the raw order representation; the processor stores it as
    /// the event's snapshot without interpreting it.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` immediately on the marketplace's not-found answer,
    /// `ServiceUnavailable` when the breaker rejects the call, otherwise
    /// the categorized error of the last attempt.
    pub async fn find_order(&self, order_id: &str) -> Result<serde_json::Value> {
        let destination = self.config.base_url.as_str();

        if !self.circuit.should_allow(destination).await {
            debug!(order_id, "order fetch rejected by open circuit");
            return Err(SyncError::unavailable(format!(
                "circuit breaker open for {destination}"
            )));
        }

        let mut last_error = SyncError::network("no fetch attempt made");

        for attempt in 1..=self.config.max_attempts.max(1) {
            match self.fetch_once(order_id).await {
                Ok(order) => {
                    self.circuit.record_success(destination).await;
                    debug!(order_id, attempt, "order snapshot fetched");
                    return Ok(order);
                },
                // Permanent: surface without recording against the breaker,
                // so one deleted order cannot block other traffic.
                Err(error @ SyncError::OrderNotFound { .. }) => return Err(error),
                Err(error) => {
                    self.circuit.record_failure(destination).await;
                    warn!(order_id, attempt, error = %error, "order fetch attempt failed");
                    last_error = error;
                },
            }
        }

        Err(last_error)
    }

    async fn fetch_once(&self, order_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/api/v1/orders/{order_id}", self.config.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::timeout(self.config.timeout.as_secs())
            } else if e.is_connect() {
                SyncError::network(format!("connection failed: {e}"))
            } else {
                SyncError::network(e.to_string())
            }
        })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SyncError::decode(e.to_string()));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            // Only the marketplace's own not-found type is permanent; any
            // other 404 (a proxy, a misrouted request) stays transient.
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<MarketplaceError>(&body) {
                if error.error_type == ORDER_NOT_FOUND {
                    return Err(SyncError::order_not_found(order_id));
                }
            }
            return Err(SyncError::http_status(404));
        }

        Err(SyncError::http_status(status.as_u16()))
    }
}
