use async_trait::async_trait;

use corelib::error::EngineError;
use corelib::swap::{Quote, SwapParams, SwapResult, VenueId};

/// Abstraction over one liquidity source.
///
/// Implementations hide transport and signing details and surface failures
/// as [`EngineError`]s. A swap that would fill below `min_amount_out` must
/// fail with a message containing `slippage` so the executor can translate
/// it.
#[async_trait]
pub trait VenueAdapter: Send + Sync + 'static {
    fn id(&self) -> VenueId;

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: u64,
    ) -> Result<Quote, EngineError>;

    async fn swap(&self, params: SwapParams) -> Result<SwapResult, EngineError>;
}
