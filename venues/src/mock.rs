//! Scriptable in-process venue.
//!
//! Used both for `implementation = mock` runtime and for tests: price, fee,
//! latency, and the next swap outcomes can all be adjusted while the
//! adapter is live.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use common::time::now_ms;
use corelib::error::EngineError;
use corelib::swap::{Quote, SwapParams, SwapResult, VenueId};

use crate::adapter::VenueAdapter;

/// Scripted result for the next swap call.
#[derive(Debug, Clone)]
pub enum SwapOutcome {
    /// Fill with exactly this output; fails the slippage floor when below
    /// `min_amount_out`, the way an on-chain program would.
    Fill { amount_out: u64 },
    /// Fail with this message verbatim.
    Error { message: String },
}

pub struct MockVenue {
    id: VenueId,
    pool: String,
    fee: f64,
    price: Mutex<f64>,
    quote_delay: Mutex<Option<Duration>>,
    /// Fail this many upcoming quote calls.
    failing_quotes: AtomicUsize,
    /// Outcomes consumed front-to-back; empty means fill at the quoted
    /// effective price.
    swap_script: Mutex<VecDeque<SwapOutcome>>,
    quote_calls: AtomicUsize,
    swap_calls: AtomicUsize,
}

impl MockVenue {
    pub fn new(id: VenueId, price: f64, fee: f64) -> Self {
        Self {
            id,
            pool: format!("{id}-pool"),
            fee,
            price: Mutex::new(price),
            quote_delay: Mutex::new(None),
            failing_quotes: AtomicUsize::new(0),
            swap_script: Mutex::new(VecDeque::new()),
            quote_calls: AtomicUsize::new(0),
            swap_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock() = price;
    }

    /// Delay every quote answer; lets tests exercise the router timeout.
    pub fn set_quote_delay(&self, delay: Option<Duration>) {
        *self.quote_delay.lock() = delay;
    }

    /// Fail the next `n` quote calls with a routing error.
    pub fn fail_next_quotes(&self, n: usize) {
        self.failing_quotes.store(n, Ordering::SeqCst);
    }

    pub fn script_swap(&self, outcome: SwapOutcome) {
        self.swap_script.lock().push_back(outcome);
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn swap_calls(&self) -> usize {
        self.swap_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn id(&self) -> VenueId {
        self.id
    }

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
    ) -> Result<Quote, EngineError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.quote_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let remaining = self.failing_quotes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_quotes.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::routing(format!("{} quote unavailable", self.id))
                .with_context("venue", self.id.as_str()));
        }

        let price = *self.price.lock();
        debug!(venue = %self.id, token_in, token_out, amount_in, price, "mock quote");
        Ok(Quote::new(self.id, price, self.fee, amount_in, self.pool.clone()))
    }

    async fn swap(&self, params: SwapParams) -> Result<SwapResult, EngineError> {
        self.swap_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.swap_script.lock().pop_front();
        let amount_out = match scripted {
            Some(SwapOutcome::Error { message }) => {
                return Err(EngineError::execution(message)
                    .with_context("venue", self.id.as_str()));
            }
            Some(SwapOutcome::Fill { amount_out }) => amount_out,
            None => {
                let price = *self.price.lock();
                (params.amount_in as f64 * price * (1.0 - self.fee)).floor() as u64
            }
        };

        if amount_out < params.min_amount_out {
            return Err(EngineError::execution(format!(
                "slippage: output {amount_out} below minimum {}",
                params.min_amount_out
            ))
            .with_context("venue", self.id.as_str()));
        }

        let gross = (params.amount_in as f64 * *self.price.lock()).floor() as u64;
        Ok(SwapResult {
            tx_id: format!("{}-tx-{}", self.id, self.swap_calls.load(Ordering::SeqCst)),
            executed_price: amount_out as f64 / params.amount_in.max(1) as f64,
            amount_in: params.amount_in,
            amount_out,
            fee_amount: gross.saturating_sub(amount_out),
            ts_ms: now_ms(),
        })
    }
}
