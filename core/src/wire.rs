//! JSON frames exchanged with submitting clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::OrderStatus;
use crate::swap::VenueId;

/// Body of a swap submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub token_in: String,
    pub token_out: String,
    /// Smallest input units; JSON number.
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
}

/// One lifecycle event pushed to every subscriber of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// ms since epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StatusData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_decision: Option<RoutingDecision>,
}

/// Outcome of the two-venue quote comparison, attached to `building`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub selected_venue: VenueId,
    /// Raydium's effective price, absent when the venue was dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_a_price: Option<f64>,
    /// Orca's effective price, absent when the venue was dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_b_price: Option<f64>,
}

/// Rejection frame sent before closing the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorFrame {
    pub fn validation(message: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            error: ErrorBody {
                code: "VALIDATION_ERROR".into(),
                message: message.into(),
            },
            timestamp_ms,
        }
    }
}
