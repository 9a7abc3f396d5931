use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel identifier clients may use for the native token.
pub const NATIVE_TOKEN: &str = "SOL";

/// Canonical mint of the wrapped native token. Venues only quote SPL mints,
/// so the router rewrites the sentinel before fanning out.
pub const WRAPPED_NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Rewrite the native-token sentinel to its wrapped mint; all other
/// identifiers pass through untouched.
pub fn rewrite_native(token: &str) -> &str {
    if token == NATIVE_TOKEN {
        WRAPPED_NATIVE_MINT
    } else {
        token
    }
}

/// The two candidate liquidity sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Raydium,
    Orca,
}

/// Fixed preference order; quote-selection ties break toward the earlier
/// entry.
pub const VENUE_ORDER: [VenueId; 2] = [VenueId::Raydium, VenueId::Orca];

impl VenueId {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Raydium => "raydium",
            VenueId::Orca => "orca",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VenueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raydium" => Ok(VenueId::Raydium),
            "orca" => Ok(VenueId::Orca),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

/// A venue's answer to "how much `token_out` for `amount_in` of `token_in`".
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub venue: VenueId,
    /// Raw output-per-input price, before fees.
    pub price: f64,
    /// Proportional fee, e.g. 0.0025.
    pub fee: f64,
    /// `price * (1 - fee)`.
    pub effective_price: f64,
    /// `floor(amount_in * price)`, smallest output units.
    pub estimated_out: u64,
    /// Opaque pool identifier to execute against.
    pub pool: String,
}

impl Quote {
    pub fn new(venue: VenueId, price: f64, fee: f64, amount_in: u64, pool: impl Into<String>) -> Self {
        Self {
            venue,
            price,
            fee,
            effective_price: price * (1.0 - fee),
            estimated_out: (amount_in as f64 * price).floor() as u64,
            pool: pool.into(),
        }
    }
}

/// Everything a venue needs to execute a swap under a slippage floor.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParams {
    pub venue: VenueId,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    /// Hard floor; the venue must fail rather than fill below it.
    pub min_amount_out: u64,
    pub pool: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapResult {
    pub tx_id: String,
    pub executed_price: f64,
    pub amount_in: u64,
    /// Realized output, `>= min_amount_out` on success.
    pub amount_out: u64,
    pub fee_amount: u64,
    pub ts_ms: u64,
}
