//! Webhook dispatch gateway: HTTP push with timeout, bounded retry, and a
//! per-destination circuit breaker.
//!
//! The gateway owns the only suspension point on the producer side: the
//! outbound POST, bounded by the configured timeout. Failures are
//! categorized for the processor's retry bookkeeping; both retry exhaustion
//! and an open breaker surface as transient errors, and the processor
//! applies its own backoff on top.

use std::{sync::Arc, time::Duration};

use ordercast_common::CircuitBreaker;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// Configuration for the dispatch gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-call timeout for the outbound POST.
    pub timeout: Duration,
    /// Total attempts per dispatch call, including the first.
    pub max_attempts: u32,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            user_agent: "ordercast-market/1.0".to_string(),
        }
    }
}

/// Resilient HTTP sender used by the outbox processor.
///
/// One instance is constructed at process start and shared across workers;
/// the circuit breaker keys on the callback URL, so an unhealthy subscriber
/// is rejected fast without affecting others.
pub struct DispatchGateway {
    client: reqwest::Client,
    config: DispatchConfig,
    circuit: Arc<CircuitBreaker>,
}

impl DispatchGateway {
    /// Creates a gateway with the given configuration and breaker.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: DispatchConfig, circuit: Arc<CircuitBreaker>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, circuit })
    }

    /// Pushes a payload to a subscriber endpoint.
    ///
    /// Sends `POST <url>` with the shared token as the `Authorization`
    /// header and the raw serialized aggregate snapshot as the body. Any
    /// 2xx response is success; anything else, or a timeout or connection
    /// failure, is a dispatch failure. Attempts are bounded by
    /// `max_attempts`; every outcome is recorded against the destination's
    /// circuit.
    ///
    /// # Errors
    ///
    /// Returns the categorized error of the last attempt, or
    /// `CircuitOpen` without any attempt when the breaker rejects the call.
    pub async fn send(&self, url: &str, token: &str, payload: &serde_json::Value) -> Result<()> {
        if !self.circuit.should_allow(url).await {
            debug!(destination = url, "dispatch rejected by open circuit");
            return Err(DispatchError::circuit_open(url));
        }

        let body = serde_json::to_vec(payload)
            .map_err(|e| DispatchError::serialization(e.to_string()))?;

        let mut last_error = DispatchError::network("no dispatch attempt made");

        for attempt in 1..=self.config.max_attempts.max(1) {
            match self.post_once(url, token, body.clone()).await {
                Ok(()) => {
                    self.circuit.record_success(url).await;
                    debug!(destination = url, attempt, "webhook dispatched");
                    return Ok(());
                },
                Err(error) => {
                    self.circuit.record_failure(url).await;
                    warn!(
                        destination = url,
                        attempt,
                        error = %error,
                        "webhook dispatch attempt failed"
                    );
                    last_error = error;
                },
            }
        }

        Err(last_error)
    }

    async fn post_once(&self, url: &str, token: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("authorization", token)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    DispatchError::network(format!("connection failed: {e}"))
                } else {
                    DispatchError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::http_status(status.as_u16()))
        }
    }
}
