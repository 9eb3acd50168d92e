//! Per-destination circuit breaker for outbound HTTP calls.
//!
//! Tracks the outcome of recent calls to each destination in a sliding
//! window. When the failure rate over a full window crosses the configured
//! threshold the circuit opens and new calls are rejected immediately for a
//! cool-down period, after which a limited number of probe requests decide
//! whether the destination has recovered.
//!
//! ```text
//!   Closed --(failure rate >= threshold over window)--> Open
//!   Open   --(cool-down elapsed)------------------->    HalfOpen
//!   HalfOpen --(success_threshold successes)-------->   Closed
//!   HalfOpen --(any failure)------------------------>   Open
//! ```

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Circuit breaker configuration, shared by all destinations of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Number of recent calls considered for the failure rate.
    pub window_size: usize,
    /// Failure rate (0.0 to 1.0) over a full window that opens the circuit.
    pub failure_rate_threshold: f64,
    /// How long an open circuit rejects calls before probing recovery.
    pub cooldown: Duration,
    /// Maximum probe requests allowed while half-open.
    pub half_open_max_probes: u32,
    /// Consecutive successes required to close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_secs(30),
            half_open_max_probes: 3,
            success_threshold: 2,
        }
    }
}

/// Current state of one destination's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Destination unhealthy, calls rejected immediately.
    Open,
    /// Cool-down elapsed, limited probes allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct DestinationStats {
    state: CircuitState,
    /// Outcomes of recent calls, `true` meaning failure. Bounded by
    /// `window_size`.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_probes: u32,
    consecutive_successes: u32,
}

impl DestinationStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            half_open_probes: 0,
            consecutive_successes: 0,
        }
    }

    fn push_outcome(&mut self, failed: bool, window_size: usize) {
        if self.window.len() == window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failed = self.window.iter().filter(|f| **f).count();
        failed as f64 / self.window.len() as f64
    }
}

/// Thread-safe circuit breaker keyed by destination.
///
/// One instance guards one class of destinations (webhook callback URLs,
/// the upstream marketplace) and is shared across workers. Internal locking
/// keeps state transitions atomic under concurrent delivery.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    destinations: Mutex<HashMap<String, DestinationStats>>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given configuration.
    pub fn new(config: CircuitConfig) -> Self {
        Self { config, destinations: Mutex::new(HashMap::new()) }
    }

    /// Whether a call to `destination` should proceed.
    ///
    /// Transitions an open circuit to half-open once the cool-down has
    /// elapsed; while half-open, only `half_open_max_probes` calls pass.
    pub async fn should_allow(&self, destination: &str) -> bool {
        let mut destinations = self.destinations.lock().await;
        let stats =
            destinations.entry(destination.to_string()).or_insert_with(DestinationStats::new);

        if stats.state == CircuitState::Open {
            let cooled_down =
                stats.opened_at.is_some_and(|at| at.elapsed() >= self.config.cooldown);
            if cooled_down {
                Self::to_half_open(stats);
            }
        }

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if stats.half_open_probes < self.config.half_open_max_probes {
                    stats.half_open_probes += 1;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Records a successful call outcome.
    pub async fn record_success(&self, destination: &str) {
        let mut destinations = self.destinations.lock().await;
        let stats =
            destinations.entry(destination.to_string()).or_insert_with(DestinationStats::new);

        stats.push_outcome(false, self.config.window_size);

        match stats.state {
            CircuitState::Closed | CircuitState::Open => {},
            CircuitState::HalfOpen => {
                stats.consecutive_successes += 1;
                if stats.consecutive_successes >= self.config.success_threshold {
                    Self::to_closed(destination, stats);
                }
            },
        }
    }

    /// Records a failed call outcome.
    pub async fn record_failure(&self, destination: &str) {
        let mut destinations = self.destinations.lock().await;
        let stats =
            destinations.entry(destination.to_string()).or_insert_with(DestinationStats::new);

        stats.push_outcome(true, self.config.window_size);
        stats.consecutive_successes = 0;

        match stats.state {
            CircuitState::Closed => {
                let window_full = stats.window.len() >= self.config.window_size;
                if window_full && stats.failure_rate() >= self.config.failure_rate_threshold {
                    Self::to_open(destination, stats);
                }
            },
            CircuitState::Open => {},
            CircuitState::HalfOpen => Self::to_open(destination, stats),
        }
    }

    /// Current state for a destination, if any calls were recorded.
    pub async fn state(&self, destination: &str) -> Option<CircuitState> {
        self.destinations.lock().await.get(destination).map(|s| s.state)
    }

    /// Forces a destination into a specific state.
    ///
    /// Intended for tests and operational overrides.
    pub async fn force_state(&self, destination: &str, state: CircuitState) {
        let mut destinations = self.destinations.lock().await;
        let stats =
            destinations.entry(destination.to_string()).or_insert_with(DestinationStats::new);

        stats.state = state;
        match state {
            CircuitState::Open => stats.opened_at = Some(Instant::now()),
            CircuitState::HalfOpen => {
                stats.half_open_probes = 0;
                stats.consecutive_successes = 0;
            },
            CircuitState::Closed => {
                stats.window.clear();
                stats.opened_at = None;
                stats.half_open_probes = 0;
                stats.consecutive_successes = 0;
            },
        }
    }

    fn to_open(destination: &str, stats: &mut DestinationStats) {
        tracing::warn!(
            destination,
            failure_rate = stats.failure_rate(),
            "circuit breaker opening"
        );
        stats.state = CircuitState::Open;
        stats.opened_at = Some(Instant::now());
    }

    fn to_half_open(stats: &mut DestinationStats) {
        tracing::info!("circuit breaker transitioning to half-open");
        stats.state = CircuitState::HalfOpen;
        stats.half_open_probes = 0;
        stats.consecutive_successes = 0;
    }

    fn to_closed(destination: &str, stats: &mut DestinationStats) {
        tracing::info!(destination, "circuit breaker closing, destination recovered");
        stats.state = CircuitState::Closed;
        stats.window.clear();
        stats.opened_at = None;
        stats.half_open_probes = 0;
        stats.consecutive_successes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitConfig {
        CircuitConfig {
            window_size: 4,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_millis(50),
            half_open_max_probes: 2,
            success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn circuit_starts_closed() {
        let breaker = CircuitBreaker::new(test_config());

        assert!(breaker.should_allow("dest").await);
        assert_eq!(breaker.state("dest").await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn failure_rate_over_full_window_opens_circuit() {
        let breaker = CircuitBreaker::new(test_config());

        // Three failures over a window of four: not yet a full window.
        for _ in 0..3 {
            breaker.record_failure("dest").await;
        }
        assert!(breaker.should_allow("dest").await);

        breaker.record_failure("dest").await;
        assert!(!breaker.should_allow("dest").await);
        assert_eq!(breaker.state("dest").await, Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn mixed_outcomes_below_threshold_stay_closed() {
        let breaker = CircuitBreaker::new(test_config());

        breaker.record_success("dest").await;
        breaker.record_failure("dest").await;
        breaker.record_success("dest").await;
        breaker.record_success("dest").await;

        // Full window, rate 0.25 < 0.5.
        assert!(breaker.should_allow("dest").await);
        assert_eq!(breaker.state("dest").await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn open_circuit_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..4 {
            breaker.record_failure("dest").await;
        }
        assert!(!breaker.should_allow("dest").await);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(breaker.should_allow("dest").await);
        assert_eq!(breaker.state("dest").await, Some(CircuitState::HalfOpen));
    }

    #[tokio::test]
    async fn half_open_limits_probe_count() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_state("dest", CircuitState::HalfOpen).await;

        assert!(breaker.should_allow("dest").await);
        assert!(breaker.should_allow("dest").await);
        // Third probe exceeds half_open_max_probes.
        assert!(!breaker.should_allow("dest").await);
    }

    #[tokio::test]
    async fn successes_close_half_open_circuit() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_state("dest", CircuitState::HalfOpen).await;

        breaker.record_success("dest").await;
        assert_eq!(breaker.state("dest").await, Some(CircuitState::HalfOpen));

        breaker.record_success("dest").await;
        assert_eq!(breaker.state("dest").await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_state("dest", CircuitState::HalfOpen).await;

        breaker.record_success("dest").await;
        breaker.record_failure("dest").await;

        assert_eq!(breaker.state("dest").await, Some(CircuitState::Open));
        assert!(!breaker.should_allow("dest").await);
    }

    #[tokio::test]
    async fn destinations_are_isolated() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..4 {
            breaker.record_failure("bad").await;
        }

        assert!(!breaker.should_allow("bad").await);
        assert!(breaker.should_allow("good").await);
    }
}
