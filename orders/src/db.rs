use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::schema;

/// Handle to the order database.
///
/// `open` sizes the pool from configuration and applies the idempotent
/// schema migration before the pool is handed out, so a repository can
/// never observe a half-created schema.
#[derive(Clone)]
pub struct Db {
    pool: Arc<AnyPool>,
}

impl Db {
    pub async fn open(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        schema::migrate(&pool).await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Cheap clone of the underlying pool handle for repository
    /// construction.
    pub fn pool(&self) -> AnyPool {
        (*self.pool).clone()
    }
}
