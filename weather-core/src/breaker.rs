//! Per-upstream circuit breaker.
//!
//! ```text
//! Closed   → Open:     requests >= min_requests and failures/requests >= failure_ratio
//! Open     → HalfOpen: cooldown elapsed since the breaker opened
//! HalfOpen → Closed:   probe succeeded
//! HalfOpen → Open:     probe failed
//! ```
//!
//! Every transition into Open, and every cooldown expiry, starts a new
//! generation with zeroed counts. Outcomes that belong to an older generation
//! are discarded.

use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::BreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        })
    }
}

/// Outcome tallies for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
}

impl Counts {
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.failures) / f64::from(self.requests)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub name: String,
    /// Minimum requests in a generation before the failure ratio is considered.
    pub min_requests: u32,
    /// Trips when `failures / requests >= failure_ratio`.
    pub failure_ratio: f64,
    /// Time spent Open before a probe is allowed.
    pub cooldown: Duration,
    /// Closed-state window after which counts start over. `None` keeps
    /// accumulating until the breaker trips.
    pub interval: Option<Duration>,
    /// In-flight probes admitted while HalfOpen, and successes needed to close.
    pub half_open_max_requests: u32,
}

impl Settings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_requests: 3,
            failure_ratio: 0.6,
            cooldown: Duration::from_secs(60),
            interval: None,
            half_open_max_requests: 1,
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests > 0
            && counts.requests >= self.min_requests
            && counts.failure_ratio() >= self.failure_ratio
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    window_start: Instant,
    opened_at: Option<Instant>,
}

impl Inner {
    fn new(now: Instant) -> Self {
        Self {
            state: State::Closed,
            generation: 0,
            counts: Counts::default(),
            window_start: now,
            opened_at: None,
        }
    }

    /// Advances time-driven transitions and returns the resulting state.
    fn current_state(&mut self, now: Instant, settings: &Settings) -> State {
        match self.state {
            State::Closed => {
                if let Some(interval) = settings.interval {
                    if now.duration_since(self.window_start) >= interval {
                        self.new_generation(now);
                    }
                }
            }
            State::Open => {
                let cooled_down = self
                    .opened_at
                    .is_some_and(|opened| now.duration_since(opened) >= settings.cooldown);
                if cooled_down {
                    self.transition(State::HalfOpen, now, settings);
                }
            }
            State::HalfOpen => {}
        }

        self.state
    }

    fn transition(&mut self, to: State, now: Instant, settings: &Settings) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        self.new_generation(now);
        if to == State::Open {
            self.opened_at = Some(now);
        }

        info!(breaker = %settings.name, %from, %to, "circuit breaker changed state");
    }

    fn new_generation(&mut self, now: Instant) {
        self.generation += 1;
        self.counts = Counts::default();
        self.window_start = now;
    }

    fn on_success(&mut self, now: Instant, settings: &Settings) {
        self.counts.successes += 1;
        match self.state {
            State::Closed => self.trip_if_ready(now, settings),
            State::HalfOpen => {
                if self.counts.successes >= settings.half_open_max_requests {
                    self.transition(State::Closed, now, settings);
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(&mut self, now: Instant, settings: &Settings) {
        self.counts.failures += 1;
        match self.state {
            State::Closed => self.trip_if_ready(now, settings),
            State::HalfOpen => self.transition(State::Open, now, settings),
            State::Open => {}
        }
    }

    fn trip_if_ready(&mut self, now: Instant, settings: &Settings) {
        if settings.ready_to_trip(&self.counts) {
            debug!(
                breaker = %settings.name,
                requests = self.counts.requests,
                failures = self.counts.failures,
                "failure ratio reached"
            );
            self.transition(State::Open, now, settings);
        }
    }
}

/// Failure-isolation gate in front of one upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: Settings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::new(Instant::now())),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> State {
        self.lock().current_state(Instant::now(), &self.settings)
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        inner.current_state(Instant::now(), &self.settings);
        inner.counts
    }

    /// Runs `op` unless the breaker rejects it, recording the outcome.
    ///
    /// The lock is never held across `op`. If the returned future is dropped
    /// before `op` completes, the call is recorded as a failure.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_request().ok_or_else(|| BreakerError::Open {
            name: self.settings.name.clone(),
        })?;

        let mut pending = Pending {
            breaker: self,
            generation,
            settled: false,
        };
        let result = op().await;
        pending.settle(result.is_ok());

        result.map_err(BreakerError::Inner)
    }

    fn before_request(&self) -> Option<u64> {
        let mut inner = self.lock();
        let state = inner.current_state(Instant::now(), &self.settings);

        match state {
            State::Open => None,
            State::HalfOpen if inner.counts.requests >= self.settings.half_open_max_requests => {
                None
            }
            State::Closed | State::HalfOpen => {
                inner.counts.requests += 1;
                Some(inner.generation)
            }
        }
    }

    fn after_request(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.current_state(now, &self.settings);

        if inner.generation != generation {
            return;
        }

        if success {
            inner.on_success(now, &self.settings);
        } else {
            inner.on_failure(now, &self.settings);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Pending<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Pending<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_request(self.generation, false);
        }
    }
}
