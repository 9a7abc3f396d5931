use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Orders
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  order_id TEXT PRIMARY KEY,
  token_in TEXT NOT NULL,
  token_out TEXT NOT NULL,
  amount_in BIGINT NOT NULL,
  slippage DOUBLE PRECISION NOT NULL,
  status TEXT NOT NULL,

  venue TEXT,
  tx_id TEXT,
  executed_price DOUBLE PRECISION,
  amount_in_executed BIGINT,
  amount_out BIGINT,
  failure_reason TEXT,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL,
  confirmed_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    // Status history (append-only)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS order_status_history (
  history_id TEXT PRIMARY KEY,
  order_id TEXT NOT NULL REFERENCES orders(order_id),
  status TEXT NOT NULL,
  ts_ms BIGINT NOT NULL,
  metadata TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_ms DESC);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_tx ON orders(tx_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_history_order ON order_status_history(order_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_history_ts ON order_status_history(ts_ms DESC);"#)
        .execute(pool)
        .await?;

    Ok(())
}
