//! Three-state circuit breaker guarding one downstream venue.
//!
//! Closed (normal) → Open (fail fast) → HalfOpen (probe). Failures are
//! counted within a monitoring window; reaching the threshold opens the
//! breaker until the reset timeout elapses, after which the next call is
//! admitted as a probe. One successful probe closes the breaker; a failed
//! probe reopens it.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use corelib::error::EngineError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the monitoring period before the breaker opens.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is admitted.
    pub reset_timeout: Duration,
    /// Window in which failures are counted toward the threshold.
    pub monitoring_period: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
        }
    }
}

pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    /// Start of the current failure-counting window.
    window_start: Mutex<Option<Instant>>,
    /// When the breaker last transitioned to Open.
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            failure_count: AtomicU32::new(0),
            window_start: Mutex::new(None),
            opened_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Gate a call. `Err` means fail fast without touching the venue.
    pub fn try_acquire(&self) -> Result<(), EngineError> {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = (*self.opened_at.lock()).map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.reset_timeout) {
                    self.transition_to_half_open();
                    Ok(())
                } else {
                    Err(EngineError::system(format!(
                        "circuit breaker OPEN for {}",
                        self.name
                    ))
                    .non_retryable()
                    .with_context("venue", self.name))
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::Release);
                *self.window_start.lock() = None;
            }
            // A single healthy probe is enough to close again.
            BreakerState::HalfOpen => self.transition_to_closed(),
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            BreakerState::Closed => {
                let failures = {
                    let mut window = self.window_start.lock();
                    let expired = window
                        .map(|start| start.elapsed() > self.config.monitoring_period)
                        .unwrap_or(true);
                    if expired {
                        *window = Some(Instant::now());
                        self.failure_count.store(1, Ordering::Release);
                        1
                    } else {
                        self.failure_count.fetch_add(1, Ordering::AcqRel) + 1
                    }
                };

                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            BreakerState::HalfOpen => self.transition_to_open(),
            BreakerState::Open => {}
        }
    }

    fn transition_to_closed(&self) {
        info!(venue = self.name, "circuit breaker CLOSED");
        self.state.store(BreakerState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        *self.window_start.lock() = None;
        *self.opened_at.lock() = None;
    }

    fn transition_to_open(&self) {
        warn!(
            venue = self.name,
            failures = self.failure_count(),
            "circuit breaker OPEN"
        );
        self.state.store(BreakerState::Open as u8, Ordering::Release);
        *self.opened_at.lock() = Some(Instant::now());
    }

    fn transition_to_half_open(&self) {
        debug!(venue = self.name, "circuit breaker HALF-OPEN; probing");
        self.state
            .store(BreakerState::HalfOpen as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        *self.window_start.lock() = None;
    }
}
