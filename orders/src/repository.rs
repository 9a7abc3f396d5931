use async_trait::async_trait;
use uuid::Uuid;

use corelib::order::{Order, StatusHistoryEntry};

/// Persistence seam for orders.
///
/// Writes pair the row mutation with its status-history append in one
/// transaction so the history is always a faithful log of the row.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()>;

    async fn update(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()>;

    async fn fetch_by_id(&self, order_id: &Uuid) -> anyhow::Result<Option<Order>>;

    /// Most recent first by creation time.
    async fn fetch_recent(&self, limit: u32) -> anyhow::Result<Vec<Order>>;

    /// Oldest first.
    async fn fetch_history(&self, order_id: &Uuid) -> anyhow::Result<Vec<StatusHistoryEntry>>;
}
