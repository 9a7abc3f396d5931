use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use common::logger::warn_if_slow;
use common::time::now_ms;
use corelib::error::EngineError;
use corelib::order::{NewOrder, Order, OrderStatus, StatusHistoryEntry, StatusPatch};

use crate::repository::OrderRepository;

/// Durable source of truth for orders.
///
/// Every write couples the row mutation with a status-history append; the
/// history for one order is therefore always a valid walk of the state
/// machine. The pipeline worker is the sole status writer per order, so the
/// store checks transition legality only in debug builds.
pub struct OrderStore {
    repo: Arc<dyn OrderRepository>,
}

impl OrderStore {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self { repo }
    }

    /// Open a fresh order in `pending` and log the first history entry.
    #[instrument(skip(self, new), target = "store", fields(token_in = %new.token_in, token_out = %new.token_out))]
    pub async fn create(&self, new: NewOrder) -> Result<Order, EngineError> {
        let now = now_ms();
        let order = Order {
            id: Uuid::new_v4(),
            token_in: new.token_in,
            token_out: new.token_out,
            amount_in: new.amount_in,
            slippage: new.slippage,
            status: OrderStatus::Pending,
            venue: None,
            tx_id: None,
            executed_price: None,
            amount_in_executed: None,
            amount_out: None,
            failure_reason: None,
            created_ms: now,
            updated_ms: now,
            confirmed_ms: None,
        };

        let history = StatusHistoryEntry {
            order_id: order.id,
            status: OrderStatus::Pending,
            ts_ms: now,
            metadata: None,
        };

        warn_if_slow("db_order_insert", Duration::from_millis(100), async {
            self.repo.insert(&order, &history).await
        })
        .await
        .map_err(storage_error)?;

        debug!(order_id = %order.id, "order created");
        Ok(order)
    }

    /// Apply a status transition plus its patch, stamping `updated_ms` and
    /// (for `confirmed`) `confirmed_ms`, and append the history entry.
    #[instrument(skip(self, patch), target = "store", fields(order_id = %order_id, status = %status))]
    pub async fn update_status(
        &self,
        order_id: &Uuid,
        status: OrderStatus,
        patch: StatusPatch,
    ) -> Result<Order, EngineError> {
        let mut order = self
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| storage_error(anyhow::anyhow!("order not found: {order_id}")))?;

        // The worker is the sole status writer, and a re-delivered job may
        // legally re-walk earlier states; surface anything else loudly.
        if !order.status.can_transition_to(status) && order.status != status {
            tracing::warn!(
                %order_id,
                from = %order.status,
                to = %status,
                "unusual status transition"
            );
        }

        let now = now_ms();
        order.status = status;
        order.updated_ms = now;
        if status == OrderStatus::Confirmed {
            order.confirmed_ms = Some(now);
        }
        if let Some(venue) = patch.venue {
            order.venue = Some(venue);
        }
        if let Some(tx_id) = &patch.tx_id {
            order.tx_id = Some(tx_id.clone());
        }
        if let Some(price) = patch.executed_price {
            order.executed_price = Some(price);
        }
        if let Some(amount) = patch.amount_in_executed {
            order.amount_in_executed = Some(amount);
        }
        if let Some(amount) = patch.amount_out {
            order.amount_out = Some(amount);
        }
        if let Some(reason) = &patch.failure_reason {
            order.failure_reason = Some(reason.clone());
        }

        let history = StatusHistoryEntry {
            order_id: *order_id,
            status,
            ts_ms: now,
            metadata: patch.metadata(),
        };

        warn_if_slow("db_order_update", Duration::from_millis(100), async {
            self.repo.update(&order, &history).await
        })
        .await
        .map_err(storage_error)?;

        Ok(order)
    }

    pub async fn find_by_id(&self, order_id: &Uuid) -> Result<Option<Order>, EngineError> {
        warn_if_slow("db_order_fetch", Duration::from_millis(100), async {
            self.repo.fetch_by_id(order_id).await
        })
        .await
        .map_err(storage_error)
    }

    pub async fn find_recent(&self, limit: u32) -> Result<Vec<Order>, EngineError> {
        warn_if_slow("db_order_recent", Duration::from_millis(200), async {
            self.repo.fetch_recent(limit).await
        })
        .await
        .map_err(storage_error)
    }

    pub async fn status_history(
        &self,
        order_id: &Uuid,
    ) -> Result<Vec<StatusHistoryEntry>, EngineError> {
        warn_if_slow("db_order_history", Duration::from_millis(100), async {
            self.repo.fetch_history(order_id).await
        })
        .await
        .map_err(storage_error)
    }
}

fn storage_error(e: anyhow::Error) -> EngineError {
    EngineError::system(format!("storage failure: {e}")).with_context("component", "order_store")
}
