//! Quote acquisition and venue selection.
//!
//! Fans one quote request out to every venue concurrently, each call bounded
//! by the configured timeout and gated by the venue's circuit breaker.
//! Partial failure is tolerated; only a full wipeout is an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use corelib::error::EngineError;
use corelib::swap::{Quote, VENUE_ORDER, rewrite_native};

use crate::venue_set::{VenueSet, VenueSlot};

pub struct Router {
    venues: Arc<VenueSet>,
    quote_timeout: Duration,
}

impl Router {
    pub fn new(venues: Arc<VenueSet>, quote_timeout: Duration) -> Self {
        Self {
            venues,
            quote_timeout,
        }
    }

    /// Collect quotes from every venue that answers in time.
    ///
    /// The native-token sentinel is rewritten to its wrapped mint before the
    /// fan-out. Fails with `ROUTING` only when no venue produced a quote.
    pub async fn quotes(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
    ) -> Result<Vec<Quote>, EngineError> {
        let token_in = rewrite_native(token_in);
        let token_out = rewrite_native(token_out);

        let calls = self
            .venues
            .slots()
            .iter()
            .map(|slot| self.venue_quote(slot, token_in, token_out, amount_in));
        let results = futures::future::join_all(calls).await;

        let mut quotes = Vec::with_capacity(results.len());
        for (slot, result) in self.venues.slots().iter().zip(results) {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(err) => {
                    warn!(
                        venue = %slot.adapter.id(),
                        error = %err,
                        "venue dropped from quote fan-out"
                    );
                }
            }
        }

        if quotes.is_empty() {
            return Err(EngineError::routing(
                "no venue available for quote: all venues failed or timed out",
            )
            .with_context("token_in", token_in)
            .with_context("token_out", token_out));
        }

        Ok(quotes)
    }

    async fn venue_quote(
        &self,
        slot: &VenueSlot,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
    ) -> Result<Quote, EngineError> {
        slot.breaker.try_acquire()?;

        match tokio::time::timeout(
            self.quote_timeout,
            slot.adapter.quote(token_in, token_out, amount_in),
        )
        .await
        {
            Ok(Ok(quote)) => {
                slot.breaker.record_success();
                Ok(quote)
            }
            Ok(Err(err)) => {
                slot.breaker.record_failure();
                Err(err)
            }
            Err(_) => {
                slot.breaker.record_failure();
                Err(EngineError::routing(format!(
                    "quote timed out after {}ms",
                    self.quote_timeout.as_millis()
                ))
                .with_context("venue", slot.adapter.id().as_str()))
            }
        }
    }

    /// Pick the quote with the strictly greatest effective price; ties break
    /// toward the first venue in the fixed preference order. Logs the full
    /// comparison so every routing decision is reconstructible.
    pub fn select_best<'a>(&self, quotes: &'a [Quote]) -> Result<&'a Quote, EngineError> {
        if quotes.is_empty() {
            return Err(EngineError::routing("no quotes to select from"));
        }

        for quote in quotes {
            info!(
                venue = %quote.venue,
                price = quote.price,
                fee = quote.fee,
                effective_price = quote.effective_price,
                estimated_out = quote.estimated_out,
                "quote candidate"
            );
        }

        let mut best: Option<&Quote> = None;
        for venue in VENUE_ORDER {
            for quote in quotes.iter().filter(|q| q.venue == venue) {
                best = match best {
                    Some(b) if quote.effective_price > b.effective_price => Some(quote),
                    None => Some(quote),
                    keep => keep,
                };
            }
        }
        let best = best.ok_or_else(|| EngineError::routing("no quotes to select from"))?;

        let runner_up = quotes
            .iter()
            .filter(|q| q.venue != best.venue)
            .map(|q| q.effective_price)
            .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.max(p))));

        info!(
            winner = %best.venue,
            effective_price = best.effective_price,
            estimated_out = best.estimated_out,
            price_advantage = runner_up.map(|r| best.effective_price - r).unwrap_or(0.0),
            single_venue = runner_up.is_none(),
            "best quote selected"
        );

        Ok(best)
    }
}
