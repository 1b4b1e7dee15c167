//! Per-endpoint circuit breakers.
//!
//! Each endpoint key gets its own state machine:
//! - Closed: requests pass through; failures are counted in a rolling window
//! - Open: requests fail immediately with [`FetchError::CircuitOpen`]
//! - HalfOpen: after the cool-down, a single trial request is let through
//!
//! A successful trial closes the circuit and resets every counter. A failed
//! trial re-opens it with a doubled cool-down, capped at the configured
//! maximum. Endpoints are keyed by source and path template (see
//! [`endpoint_key`]) so pagination does not fragment circuit state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::FetchError;

/// Circuit breaker parameters, shared by every endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within `window` that open the circuit.
    pub failure_threshold: u32,
    /// Rolling window for counting failures.
    pub window: Duration,
    /// Cool-down after the first trip.
    pub cooldown: Duration,
    /// Cool-down cap for repeated trips.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

/// Observable state of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Requests fail fast until `until`.
    Open {
        /// When the next trial becomes possible.
        until: Instant,
    },
    /// A trial request is (or may be) in flight.
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Failure instants inside the rolling window (Closed only).
    failures: VecDeque<Instant>,
    /// Consecutive trips without an intervening close.
    trips: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    /// When the current HalfOpen trial was admitted.
    trial_started: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            trips: 0,
            last_failure: None,
            opened_at: None,
            trial_started: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(&mut self, now: Instant, config: &BreakerConfig) -> Duration {
        self.trips = self.trips.saturating_add(1);
        let factor = 2u32.saturating_pow(self.trips - 1);
        let cooldown = config
            .cooldown
            .saturating_mul(factor)
            .min(config.max_cooldown);
        self.state = CircuitState::Open {
            until: now + cooldown,
        };
        self.opened_at = Some(now);
        self.trial_started = None;
        self.failures.clear();
        cooldown
    }
}

/// Registry of circuit breakers keyed by endpoint.
///
/// Shared via `Arc`. As in the rate limiter, the `DashMap` entry is cloned
/// out before locking so no shard lock is held across an await.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    circuits: DashMap<String, Arc<Mutex<Circuit>>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry applying `config` to every endpoint.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Returns the shared configuration.
    #[must_use]
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn circuit(&self, endpoint: &str) -> Arc<Mutex<Circuit>> {
        self.circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Circuit::new())))
            .clone()
    }

    /// Admits or rejects a request to `endpoint`.
    ///
    /// Moves Open to HalfOpen once the cool-down has elapsed and admits that
    /// caller as the single trial. While a trial is outstanding other callers
    /// are rejected; a trial that never reports is superseded after one base
    /// cool-down.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::CircuitOpen`] when the request must not be sent.
    #[instrument(skip(self))]
    pub async fn check(&self, endpoint: &str) -> Result<(), FetchError> {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock().await;
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { until } if now >= until => {
                debug!(endpoint, "cool-down elapsed, admitting trial request");
                circuit.state = CircuitState::HalfOpen;
                circuit.trial_started = Some(now);
                Ok(())
            }
            CircuitState::Open { .. } => Err(FetchError::circuit_open(endpoint)),
            CircuitState::HalfOpen => {
                let stale = circuit
                    .trial_started
                    .is_none_or(|started| now.saturating_duration_since(started) >= self.config.cooldown);
                if stale {
                    debug!(endpoint, "previous trial went silent, admitting a new one");
                    circuit.trial_started = Some(now);
                    Ok(())
                } else {
                    Err(FetchError::circuit_open(endpoint))
                }
            }
        }
    }

    /// Reports a successful request. Closes the circuit and resets counters.
    #[instrument(skip(self))]
    pub async fn record_success(&self, endpoint: &str) {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock().await;
        if circuit.state != CircuitState::Closed {
            info!(endpoint, "circuit closed after successful trial");
        }
        circuit.state = CircuitState::Closed;
        circuit.failures.clear();
        circuit.trips = 0;
        circuit.opened_at = None;
        circuit.trial_started = None;
    }

    /// Reports a failed request.
    ///
    /// In Closed, opens the circuit when failures within the window reach
    /// the threshold. In HalfOpen, re-opens with an escalated cool-down.
    /// Reports arriving while Open (requests admitted before the trip) only
    /// update the last-failure time.
    #[instrument(skip(self))]
    pub async fn record_failure(&self, endpoint: &str) {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock().await;
        let now = Instant::now();
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failures.push_back(now);
                circuit.prune(now, self.config.window);
                let count = circuit.failures.len();
                debug!(endpoint, failures = count, "failure recorded");
                if count >= self.config.failure_threshold as usize {
                    let cooldown = circuit.trip(now, &self.config);
                    warn!(
                        endpoint,
                        failures = count,
                        cooldown_secs = cooldown.as_secs_f64(),
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                let cooldown = circuit.trip(now, &self.config);
                warn!(
                    endpoint,
                    trips = circuit.trips,
                    cooldown_secs = cooldown.as_secs_f64(),
                    "trial request failed, circuit re-opened"
                );
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Opens the circuit for `endpoint` immediately, as a trip.
    #[instrument(skip(self))]
    pub async fn force_open(&self, endpoint: &str) {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock().await;
        let cooldown = circuit.trip(Instant::now(), &self.config);
        warn!(endpoint, cooldown_secs = cooldown.as_secs_f64(), "circuit forced open");
    }

    /// Current state of `endpoint` (Closed for endpoints never seen).
    pub async fn state(&self, endpoint: &str) -> CircuitState {
        let Some(circuit) = self.circuits.get(endpoint).map(|c| Arc::clone(c.value())) else {
            return CircuitState::Closed;
        };
        let circuit = circuit.lock().await;
        circuit.state
    }

    /// Failures currently counted in the rolling window.
    pub async fn failure_count(&self, endpoint: &str) -> usize {
        let Some(circuit) = self.circuits.get(endpoint).map(|c| Arc::clone(c.value())) else {
            return 0;
        };
        let mut circuit = circuit.lock().await;
        circuit.prune(Instant::now(), self.config.window);
        circuit.failures.len()
    }

    /// When the circuit last opened and last saw a failure.
    pub async fn timestamps(&self, endpoint: &str) -> (Option<Instant>, Option<Instant>) {
        let Some(circuit) = self.circuits.get(endpoint).map(|c| Arc::clone(c.value())) else {
            return (None, None);
        };
        let circuit = circuit.lock().await;
        (circuit.opened_at, circuit.last_failure)
    }
}

/// Builds the circuit key for a request: `{source}:{path template}`.
///
/// All-digit path segments become `{n}` and the query is ignored, so
/// `/news/page/2?limit=50` and `/news/page/3` share one circuit.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use newswire::fetch::endpoint_key;
///
/// let url = Url::parse("https://example.com/news/page/2?limit=50").unwrap();
/// assert_eq!(endpoint_key("wire", &url), "wire:/news/page/{n}");
/// ```
#[must_use]
pub fn endpoint_key(source: &str, url: &Url) -> String {
    let template = url
        .path()
        .split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{n}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("{source}:{template}")
}
