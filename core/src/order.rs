use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::swap::VenueId;

/// Per-order lifecycle state.
///
/// Legal paths: `Pending → Routing → Building → Submitted → Confirmed`,
/// with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Routing,
    Building,
    Submitted,
    Confirmed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Routing) => true,
            (Routing, Building) => true,
            (Building, Submitted) => true,
            (Submitted, Confirmed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Routing => "routing",
            OrderStatus::Building => "building",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "routing" => Ok(OrderStatus::Routing),
            "building" => Ok(OrderStatus::Building),
            "submitted" => Ok(OrderStatus::Submitted),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Durable record of one swap order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub token_in: String,
    pub token_out: String,
    /// Smallest input units.
    pub amount_in: u64,
    /// Fraction in `[0, max_slippage]`.
    pub slippage: f64,
    pub status: OrderStatus,
    pub venue: Option<VenueId>,
    pub tx_id: Option<String>,
    pub executed_price: Option<f64>,
    pub amount_in_executed: Option<u64>,
    pub amount_out: Option<u64>,
    pub failure_reason: Option<String>,
    pub created_ms: u64,
    pub updated_ms: u64,
    pub confirmed_ms: Option<u64>,
}

/// Fields the submission endpoint needs to open an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub slippage: f64,
}

/// Optional fields applied alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub venue: Option<VenueId>,
    pub tx_id: Option<String>,
    pub executed_price: Option<f64>,
    pub amount_in_executed: Option<u64>,
    pub amount_out: Option<u64>,
    pub failure_reason: Option<String>,
}

impl StatusPatch {
    /// History-log metadata view of the patch; `None` when nothing is set.
    pub fn metadata(&self) -> Option<Value> {
        let mut map = serde_json::Map::new();
        if let Some(v) = self.venue {
            map.insert("venue".into(), Value::String(v.to_string()));
        }
        if let Some(tx) = &self.tx_id {
            map.insert("txId".into(), Value::String(tx.clone()));
        }
        if let Some(p) = self.executed_price {
            map.insert("executedPrice".into(), serde_json::json!(p));
        }
        if let Some(out) = self.amount_out {
            map.insert("amountOut".into(), serde_json::json!(out));
        }
        if let Some(reason) = &self.failure_reason {
            map.insert("failureReason".into(), Value::String(reason.clone()));
        }
        if map.is_empty() { None } else { Some(Value::Object(map)) }
    }
}

/// Append-only status-history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub ts_ms: u64,
    pub metadata: Option<Value>,
}
