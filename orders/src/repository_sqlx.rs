use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use corelib::order::{Order, OrderStatus, StatusHistoryEntry};
use corelib::swap::VenueId;

use crate::repository::OrderRepository;

/// SQLx-backed implementation of OrderRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxOrderRepository {
    pool: AnyPool,
}

impl SqlxOrderRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

const ORDER_COLUMNS: &str = r#"
  order_id, token_in, token_out, amount_in, slippage, status,
  venue, tx_id, executed_price, amount_in_executed, amount_out,
  failure_reason, created_ms, updated_ms, confirmed_ms
"#;

#[async_trait]
impl OrderRepository for SqlxOrderRepository {
    async fn insert(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO orders (
  order_id, token_in, token_out, amount_in, slippage, status,
  venue, tx_id, executed_price, amount_in_executed, amount_out,
  failure_reason, created_ms, updated_ms, confirmed_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(order.id.to_string())
        .bind(&order.token_in)
        .bind(&order.token_out)
        .bind(u64_to_i64(order.amount_in)?)
        .bind(order.slippage)
        .bind(order.status.as_str())
        .bind(order.venue.map(|v| v.to_string()))
        .bind(order.tx_id.as_deref())
        .bind(order.executed_price)
        .bind(order.amount_in_executed.map(u64_to_i64).transpose()?)
        .bind(order.amount_out.map(u64_to_i64).transpose()?)
        .bind(order.failure_reason.as_deref())
        .bind(u64_to_i64(order.created_ms)?)
        .bind(u64_to_i64(order.updated_ms)?)
        .bind(order.confirmed_ms.map(u64_to_i64).transpose()?)
        .execute(&mut *tx)
        .await?;

        append_history(&mut tx, history).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
UPDATE orders
SET status = ?,
    venue = ?,
    tx_id = ?,
    executed_price = ?,
    amount_in_executed = ?,
    amount_out = ?,
    failure_reason = ?,
    updated_ms = ?,
    confirmed_ms = ?
WHERE order_id = ?;
"#,
        )
        .bind(order.status.as_str())
        .bind(order.venue.map(|v| v.to_string()))
        .bind(order.tx_id.as_deref())
        .bind(order.executed_price)
        .bind(order.amount_in_executed.map(u64_to_i64).transpose()?)
        .bind(order.amount_out.map(u64_to_i64).transpose()?)
        .bind(order.failure_reason.as_deref())
        .bind(u64_to_i64(order.updated_ms)?)
        .bind(order.confirmed_ms.map(u64_to_i64).transpose()?)
        .bind(order.id.to_string())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            return Err(anyhow!("order not found for update: {}", order.id));
        }

        append_history(&mut tx, history).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_by_id(&self, order_id: &Uuid) -> anyhow::Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?;"
        ))
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_order(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_recent(&self, limit: u32) -> anyhow::Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_ms DESC LIMIT ?;"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_order(&r) {
                Ok(o) => out.push(o),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the listing
                    tracing::warn!(error = %e, "skipping malformed order row");
                }
            }
        }

        Ok(out)
    }

    async fn fetch_history(&self, order_id: &Uuid) -> anyhow::Result<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query(
            r#"
SELECT order_id, status, ts_ms, metadata
FROM order_status_history
WHERE order_id = ?
ORDER BY ts_ms ASC;
"#,
        )
        .bind(order_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_history(&r)?);
        }
        Ok(out)
    }
}

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    entry: &StatusHistoryEntry,
) -> anyhow::Result<()> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("history metadata serialization failed")?;

    sqlx::query(
        r#"
INSERT INTO order_status_history (history_id, order_id, status, ts_ms, metadata)
VALUES (?, ?, ?, ?, ?);
"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entry.order_id.to_string())
    .bind(entry.status.as_str())
    .bind(u64_to_i64(entry.ts_ms)?)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_order(r: &sqlx::any::AnyRow) -> anyhow::Result<Order> {
    let id_str: String = r.get("order_id");
    let id = Uuid::parse_str(&id_str).context("invalid order_id")?;

    let status_str: String = r.get("status");
    let status: OrderStatus = status_str
        .parse()
        .map_err(|e: String| anyhow!(e))
        .context("invalid status")?;

    let venue = r
        .get::<Option<String>, _>("venue")
        .map(|v| v.parse::<VenueId>())
        .transpose()
        .map_err(|e| anyhow!(e))?;

    Ok(Order {
        id,
        token_in: r.get("token_in"),
        token_out: r.get("token_out"),
        amount_in: i64_to_u64(r.get("amount_in"))?,
        slippage: r.get("slippage"),
        status,
        venue,
        tx_id: r.get("tx_id"),
        executed_price: r.get("executed_price"),
        amount_in_executed: r
            .get::<Option<i64>, _>("amount_in_executed")
            .map(i64_to_u64)
            .transpose()?,
        amount_out: r
            .get::<Option<i64>, _>("amount_out")
            .map(i64_to_u64)
            .transpose()?,
        failure_reason: r.get("failure_reason"),
        created_ms: i64_to_u64(r.get("created_ms"))?,
        updated_ms: i64_to_u64(r.get("updated_ms"))?,
        confirmed_ms: r
            .get::<Option<i64>, _>("confirmed_ms")
            .map(i64_to_u64)
            .transpose()?,
    })
}

fn row_to_history(r: &sqlx::any::AnyRow) -> anyhow::Result<StatusHistoryEntry> {
    let id_str: String = r.get("order_id");
    let order_id = Uuid::parse_str(&id_str).context("invalid order_id")?;

    let status_str: String = r.get("status");
    let status: OrderStatus = status_str.parse().map_err(|e: String| anyhow!(e))?;

    let metadata = r
        .get::<Option<String>, _>("metadata")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("invalid history metadata")?;

    Ok(StatusHistoryEntry {
        order_id,
        status,
        ts_ms: i64_to_u64(r.get("ts_ms"))?,
        metadata,
    })
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}
