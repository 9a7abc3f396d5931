//! HTTP-backed venue adapter.
//!
//! Talks to a venue aggregator node over REST. Transaction signing and
//! submission stay on the remote side; this adapter only carries the quote
//! and swap requests and maps responses into domain types.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use corelib::error::EngineError;
use corelib::swap::{Quote, SwapParams, SwapResult, VenueId};

use crate::adapter::VenueAdapter;

#[derive(Debug, Clone, Deserialize)]
struct QuoteEnvelope {
    price: f64,
    fee: f64,
    #[serde(rename = "poolId")]
    pool_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequestBody<'a> {
    input_mint: &'a str,
    output_mint: &'a str,
    amount: u64,
    min_amount_out: u64,
    pool_id: &'a str,
    signer: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapEnvelope {
    tx_id: String,
    executed_price: f64,
    amount_in: u64,
    amount_out: u64,
    fee_amount: u64,
    timestamp_ms: u64,
}

#[derive(Clone)]
pub struct HttpVenue {
    id: VenueId,
    http: Client,
    url: String,
    signer: String,
}

impl HttpVenue {
    pub fn new(id: VenueId, url: String, signer: String) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::system(format!("http client build failed: {e}")))?;

        Ok(Self { id, http, url, signer })
    }
}

#[async_trait]
impl VenueAdapter for HttpVenue {
    fn id(&self) -> VenueId {
        self.id
    }

    #[instrument(skip(self), fields(venue = %self.id), level = "debug")]
    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
    ) -> Result<Quote, EngineError> {
        let url = format!(
            "{}/v1/{}/quote?inputMint={token_in}&outputMint={token_out}&amount={amount_in}",
            self.url, self.id
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                EngineError::routing(format!("{} quote request failed: {e}", self.id))
                    .with_context("venue", self.id.as_str())
            })?;

        let envelope: QuoteEnvelope = resp.json().await.map_err(|e| {
            EngineError::routing(format!("{} quote response malformed: {e}", self.id))
                .with_context("venue", self.id.as_str())
        })?;

        debug!(
            price = envelope.price,
            fee = envelope.fee,
            pool = %envelope.pool_id,
            "venue quote fetched"
        );

        Ok(Quote::new(
            self.id,
            envelope.price,
            envelope.fee,
            amount_in,
            envelope.pool_id,
        ))
    }

    #[instrument(skip(self, params), fields(venue = %self.id, pool = %params.pool), level = "debug")]
    async fn swap(&self, params: SwapParams) -> Result<SwapResult, EngineError> {
        let url = format!("{}/v1/{}/swap", self.url, self.id);
        let body = SwapRequestBody {
            input_mint: &params.token_in,
            output_mint: &params.token_out,
            amount: params.amount_in,
            min_amount_out: params.min_amount_out,
            pool_id: &params.pool,
            signer: &self.signer,
        };

        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            EngineError::execution(format!("{} swap request failed: {e}", self.id))
                .with_context("venue", self.id.as_str())
        })?;

        if !resp.status().is_success() {
            // Venue error bodies carry the reason (e.g. a slippage breach);
            // keep the text so the executor's substring translation works.
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::execution(format!(
                "{} swap rejected ({status}): {text}",
                self.id
            ))
            .with_context("venue", self.id.as_str()));
        }

        let envelope: SwapEnvelope = resp.json().await.map_err(|e| {
            EngineError::execution(format!("{} swap response malformed: {e}", self.id))
                .with_context("venue", self.id.as_str())
        })?;

        Ok(SwapResult {
            tx_id: envelope.tx_id,
            executed_price: envelope.executed_price,
            amount_in: envelope.amount_in,
            amount_out: envelope.amount_out,
            fee_amount: envelope.fee_amount,
            ts_ms: envelope.timestamp_ms,
        })
    }
}
