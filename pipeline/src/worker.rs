//! Pipeline worker: drives one order from pickup to terminal status.
//!
//! State machine per job:
//! `pending → routing → building → submitted → confirmed`, `failed` from any
//! non-terminal state. Every transition is persisted, mirrored into the
//! cache, and emitted on the status hub; terminal transitions drop the
//! cache entry and detach the order's subscribers.
//!
//! The quote phase and the swap phase are each wrapped in the retry helper
//! with the full attempt budget; classified business failures terminate the
//! order here and complete the job. Only unexpected faults (a store write
//! failing mid-transition) propagate to the queue, whose own backoff
//! re-delivery then applies.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use corelib::error::{EngineError, ErrorKind};
use corelib::job::Job;
use corelib::order::{OrderStatus, StatusPatch};
use corelib::swap::{Quote, VenueId};
use corelib::wire::{RoutingDecision, StatusData};
use orders::{OrderCache, OrderStore};
use queue::JobHandler;
use resilience::{RetryPolicy, retry};

use crate::bus::CriticalBus;
use crate::executor::Executor;
use crate::hub::StatusHub;
use crate::router::Router;

pub struct PipelineWorker {
    store: Arc<OrderStore>,
    cache: Arc<OrderCache>,
    hub: Arc<StatusHub>,
    router: Arc<Router>,
    executor: Arc<Executor>,
    retry_policy: RetryPolicy,
    critical: CriticalBus,
}

impl PipelineWorker {
    pub fn new(
        store: Arc<OrderStore>,
        cache: Arc<OrderCache>,
        hub: Arc<StatusHub>,
        router: Arc<Router>,
        executor: Arc<Executor>,
        retry_policy: RetryPolicy,
        critical: CriticalBus,
    ) -> Self {
        Self {
            store,
            cache,
            hub,
            router,
            executor,
            retry_policy,
            critical,
        }
    }

    async fn drive(&self, job: Job) -> anyhow::Result<()> {
        let order_id = job.order_id;

        self.transition(&order_id, OrderStatus::Routing, StatusPatch::default(), None)
            .await?;

        // Quote phase: fan out, select, retry the whole phase on retryable
        // failure.
        let router = &self.router;
        let (token_in, token_out) = (job.token_in.as_str(), job.token_out.as_str());
        let amount_in = job.amount_in;

        let quoted = retry(&self.retry_policy, "quote_phase", move |_| async move {
            let quotes = router.quotes(token_in, token_out, amount_in).await?;
            let best = router.select_best(&quotes)?.clone();
            Ok((best, quotes))
        })
        .await;

        let (best, quotes) = match quoted {
            Ok(q) => q,
            Err(err) => return self.fail(&order_id, err).await,
        };

        let decision = routing_decision(&best, &quotes);
        self.transition(
            &order_id,
            OrderStatus::Building,
            StatusPatch {
                venue: Some(best.venue),
                ..Default::default()
            },
            Some(StatusData {
                routing_decision: Some(decision),
                ..Default::default()
            }),
        )
        .await?;

        // Swap phase: its own full retry budget, mirroring the quote phase.
        let executor = &self.executor;
        let best_ref = &best;
        let slippage = job.slippage;

        let swapped = retry(&self.retry_policy, "swap_phase", move |_| async move {
            executor
                .execute_swap(best_ref, token_in, token_out, amount_in, Some(slippage))
                .await
        })
        .await;

        let swap = match swapped {
            Ok(s) => s,
            Err(err) => return self.fail(&order_id, err).await,
        };

        self.transition(
            &order_id,
            OrderStatus::Submitted,
            StatusPatch {
                tx_id: Some(swap.tx_id.clone()),
                ..Default::default()
            },
            Some(StatusData {
                tx_hash: Some(swap.tx_id.clone()),
                ..Default::default()
            }),
        )
        .await?;

        self.transition(
            &order_id,
            OrderStatus::Confirmed,
            StatusPatch {
                executed_price: Some(swap.executed_price),
                amount_in_executed: Some(swap.amount_in),
                amount_out: Some(swap.amount_out),
                ..Default::default()
            },
            Some(StatusData {
                tx_hash: Some(swap.tx_id.clone()),
                executed_price: Some(swap.executed_price),
                ..Default::default()
            }),
        )
        .await?;

        info!(
            %order_id,
            venue = %best.venue,
            tx_id = %swap.tx_id,
            amount_out = swap.amount_out,
            "order confirmed"
        );
        self.hub.detach_all(&order_id);
        Ok(())
    }

    /// Persist the transition, refresh (or clear) the cache, emit the event.
    async fn transition(
        &self,
        order_id: &Uuid,
        status: OrderStatus,
        patch: StatusPatch,
        data: Option<StatusData>,
    ) -> Result<(), EngineError> {
        let order = self.store.update_status(order_id, status, patch).await?;
        if status.is_terminal() {
            self.cache.delete(order_id);
        } else {
            self.cache.set(order);
        }
        self.hub.emit(order_id, status, data);
        Ok(())
    }

    /// Terminal failure: record the reason, emit `failed`, release
    /// subscribers. System errors also go to the critical bus.
    async fn fail(&self, order_id: &Uuid, err: EngineError) -> anyhow::Result<()> {
        warn!(%order_id, kind = %err.kind, error = %err.message, "order failed");
        if err.kind == ErrorKind::System {
            self.critical.publish(err.clone());
        }

        self.transition(
            order_id,
            OrderStatus::Failed,
            StatusPatch {
                failure_reason: Some(err.message.clone()),
                ..Default::default()
            },
            Some(StatusData {
                error: Some(err.message),
                ..Default::default()
            }),
        )
        .await?;

        self.hub.detach_all(order_id);
        Ok(())
    }
}

fn routing_decision(best: &Quote, quotes: &[Quote]) -> RoutingDecision {
    let price_of = |venue: VenueId| {
        quotes
            .iter()
            .find(|q| q.venue == venue)
            .map(|q| q.effective_price)
    };
    RoutingDecision {
        selected_venue: best.venue,
        venue_a_price: price_of(VenueId::Raydium),
        venue_b_price: price_of(VenueId::Orca),
    }
}

#[async_trait]
impl JobHandler for PipelineWorker {
    async fn process(&self, job: Job) -> anyhow::Result<()> {
        let span = info_span!("order_pipeline", order_id = %job.order_id, delivery = job.attempt);
        self.drive(job).instrument(span).await
    }
}
