//! Application container: owns every shared resource and wires the
//! pipeline together. Tests construct alternate instances with their own
//! configs; nothing in here is a process-wide singleton.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use corelib::swap::VenueId;
use orders::{Db, OrderCache, OrderStore, SqlxOrderRepository};
use pipeline::{CriticalBus, Executor, PipelineWorker, Router, StatusHub, VenueSet};
use queue::{MemorySubstrate, QueueConfig, WorkQueue};
use resilience::{BreakerConfig, RetryPolicy};
use venues::{HttpVenue, MockVenue, VenueAdapter};

use crate::config::{AppConfig, VenueImpl};

pub struct App {
    pub config: AppConfig,
    pub store: Arc<OrderStore>,
    pub cache: Arc<OrderCache>,
    pub hub: Arc<StatusHub>,
    pub queue: Arc<WorkQueue>,
    pub worker: Arc<PipelineWorker>,
    pub critical: CriticalBus,
}

impl App {
    pub async fn build(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let db = Db::open(&config.database_url, config.db_max_connections)
            .await
            .context("database open failed")?;

        let store = Arc::new(OrderStore::new(Arc::new(SqlxOrderRepository::new(
            db.pool(),
        ))));
        let cache = Arc::new(OrderCache::new(Duration::from_secs(config.cache_ttl_seconds)));
        let hub = Arc::new(StatusHub::new());
        let critical = CriticalBus::default();

        let venues = Arc::new(VenueSet::new(
            build_adapters(&config.venue_impl)?,
            BreakerConfig::default(),
        ));
        let router = Arc::new(Router::new(
            venues.clone(),
            Duration::from_millis(config.quote_timeout_ms),
        ));
        let executor = Arc::new(Executor::new(
            venues,
            config.default_slippage,
            config.max_slippage,
        ));

        let retry_policy = RetryPolicy {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_delay_ms),
            multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.backoff_max_ms),
        };

        let worker = Arc::new(PipelineWorker::new(
            store.clone(),
            cache.clone(),
            hub.clone(),
            router,
            executor,
            retry_policy,
            critical.clone(),
        ));

        let queue = Arc::new(WorkQueue::new(
            Arc::new(MemorySubstrate::new()),
            QueueConfig {
                concurrency: config.concurrency,
                max_attempts: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_delay_ms),
                backoff_multiplier: config.backoff_multiplier,
                backoff_max: Duration::from_millis(config.backoff_max_ms),
                ..Default::default()
            },
        ));

        // Replay anything the substrate kept across the last run.
        let restored = queue.restore().await?;
        if restored > 0 {
            info!(restored, "requeued jobs from previous run");
        }

        Ok(Arc::new(Self {
            config,
            store,
            cache,
            hub,
            queue,
            worker,
            critical,
        }))
    }

    /// Start the queue drain loop, maintenance sweeps, and the critical
    /// error monitor.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        {
            let queue = self.queue.clone();
            let worker = self.worker.clone();
            handles.push(tokio::spawn(async move {
                queue.run(worker).await;
            }));
        }

        {
            let cache = self.cache.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                loop {
                    ticker.tick().await;
                    cache.purge_expired();
                }
            }));
        }

        {
            let queue = self.queue.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
                loop {
                    ticker.tick().await;
                    if let Err(e) = queue.sweep_retention().await {
                        error!(error = %e, "queue retention sweep failed");
                    }
                }
            }));
        }

        {
            let mut rx = self.critical.subscribe();
            handles.push(tokio::spawn(async move {
                while let Ok(err) = rx.recv().await {
                    error!(
                        kind = %err.kind,
                        context = ?err.context,
                        "critical: {}",
                        err.message
                    );
                }
            }));
        }

        handles
    }

    /// Pause pickup, give active orders 30 s to reach a terminal state,
    /// then close the streaming side. Errors here surface as a non-zero
    /// exit.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("shutting down: pausing queue");
        self.queue.pause();

        let idle = self.queue.wait_for_idle(Duration::from_secs(30)).await;
        if !idle {
            warn!("active jobs did not finish within the shutdown window");
        }

        self.queue.shutdown();
        self.hub.close_all();

        if !idle {
            anyhow::bail!("shutdown timed out waiting for active jobs");
        }
        info!("shutdown complete");
        Ok(())
    }
}

fn build_adapters(venue_impl: &VenueImpl) -> anyhow::Result<Vec<Arc<dyn VenueAdapter>>> {
    match venue_impl {
        VenueImpl::Mock => {
            info!("using mock venue adapters");
            Ok(vec![
                Arc::new(MockVenue::new(VenueId::Raydium, 1.00, 0.0025)),
                Arc::new(MockVenue::new(VenueId::Orca, 1.01, 0.002)),
            ])
        }
        VenueImpl::Real {
            rpc_url,
            signer_key,
        } => {
            info!(url = %rpc_url, "using HTTP venue adapters");
            let raydium =
                HttpVenue::new(VenueId::Raydium, rpc_url.clone(), signer_key.clone())
                    .context("raydium adapter construction failed")?;
            let orca = HttpVenue::new(VenueId::Orca, rpc_url.clone(), signer_key.clone())
                .context("orca adapter construction failed")?;
            Ok(vec![Arc::new(raydium), Arc::new(orca)])
        }
    }
}
