//! Slippage-protected swap execution.
//!
//! Computes the output floor from the chosen quote, dispatches to the
//! matching venue adapter, and translates slippage breaches into
//! `EXECUTION` errors that name the venue. Never retries locally; the
//! worker's retry policy decides.

use std::sync::Arc;

use tracing::info;

use corelib::error::EngineError;
use corelib::swap::{Quote, SwapParams, SwapResult, rewrite_native};

use crate::venue_set::VenueSet;

pub struct Executor {
    venues: Arc<VenueSet>,
    default_slippage: f64,
    max_slippage: f64,
}

impl Executor {
    pub fn new(venues: Arc<VenueSet>, default_slippage: f64, max_slippage: f64) -> Self {
        Self {
            venues,
            default_slippage,
            max_slippage,
        }
    }

    /// Floor below which the fill must fail:
    /// `floor(estimated_out * (1 - slippage))`. Flooring keeps the bound in
    /// whole smallest units.
    pub fn min_amount_out(estimated_out: u64, slippage: f64) -> u64 {
        (estimated_out as f64 * (1.0 - slippage)).floor() as u64
    }

    pub async fn execute_swap(
        &self,
        quote: &Quote,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
        slippage: Option<f64>,
    ) -> Result<SwapResult, EngineError> {
        let slippage = slippage.unwrap_or(self.default_slippage);
        if !slippage.is_finite() || slippage < 0.0 || slippage > self.max_slippage {
            return Err(EngineError::validation(format!(
                "slippage must be between 0 and {}",
                self.max_slippage
            )));
        }

        let min_amount_out = Self::min_amount_out(quote.estimated_out, slippage);

        let slot = self.venues.get(quote.venue).ok_or_else(|| {
            EngineError::system(format!("no adapter configured for venue {}", quote.venue))
                .non_retryable()
        })?;
        slot.breaker.try_acquire()?;

        let params = SwapParams {
            venue: quote.venue,
            token_in: rewrite_native(token_in).to_string(),
            token_out: rewrite_native(token_out).to_string(),
            amount_in,
            min_amount_out,
            pool: quote.pool.clone(),
        };

        info!(
            venue = %quote.venue,
            amount_in,
            estimated_out = quote.estimated_out,
            min_amount_out,
            slippage,
            pool = %params.pool,
            "submitting swap"
        );

        match slot.adapter.swap(params).await {
            Ok(result) => {
                slot.breaker.record_success();
                let realized_slippage = if quote.estimated_out > 0 {
                    (quote.estimated_out as f64 - result.amount_out as f64)
                        / quote.estimated_out as f64
                } else {
                    0.0
                };
                info!(
                    venue = %quote.venue,
                    tx_id = %result.tx_id,
                    executed_price = result.executed_price,
                    amount_out = result.amount_out,
                    realized_slippage,
                    "swap executed"
                );
                Ok(result)
            }
            Err(err) if err.message.to_lowercase().contains("slippage") => {
                // Price moved, venue healthy: not a breaker event.
                Err(EngineError::execution(format!(
                    "slippage tolerance exceeded on {}: {}",
                    quote.venue, err.message
                ))
                .with_context("venue", quote.venue.as_str())
                .with_context("min_amount_out", min_amount_out.to_string()))
            }
            Err(err) => {
                slot.breaker.record_failure();
                Err(err)
            }
        }
    }
}
