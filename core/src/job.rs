use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Order;

/// Unit of work drained by the pipeline workers.
///
/// The job id IS the order id; the queue substrate deduplicates on it, which
/// is what makes enqueue idempotent and forbids two concurrent attempts on
/// one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub order_id: Uuid,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub slippage: f64,
    /// 1-based delivery attempt, stamped by the queue at dispatch.
    pub attempt: u32,
}

impl Job {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            token_in: order.token_in.clone(),
            token_out: order.token_out.clone(),
            amount_in: order.amount_in,
            slippage: order.slippage,
            attempt: 0,
        }
    }
}
