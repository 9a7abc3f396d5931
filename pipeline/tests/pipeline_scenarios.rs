//! End-to-end pipeline scenarios over mock venues, an in-memory order
//! repository, and the real work queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use corelib::error::ErrorKind;
use corelib::job::Job;
use corelib::order::{NewOrder, Order, OrderStatus, StatusHistoryEntry};
use corelib::swap::VenueId;
use corelib::wire::StatusUpdate;
use orders::repository::OrderRepository;
use orders::{OrderCache, OrderStore};
use pipeline::{CriticalBus, Executor, PipelineWorker, Router, StatusHub, VenueSet};
use queue::{MemorySubstrate, QueueConfig, WorkQueue};
use resilience::{BreakerConfig, RetryPolicy};
use venues::{MockVenue, SwapOutcome, VenueAdapter};

#[derive(Default)]
struct MemoryOrderRepo {
    orders: Mutex<HashMap<Uuid, Order>>,
    history: Mutex<Vec<StatusHistoryEntry>>,
}

#[async_trait::async_trait]
impl OrderRepository for MemoryOrderRepo {
    async fn insert(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()> {
        self.orders.lock().insert(order.id, order.clone());
        self.history.lock().push(history.clone());
        Ok(())
    }

    async fn update(&self, order: &Order, history: &StatusHistoryEntry) -> anyhow::Result<()> {
        self.orders.lock().insert(order.id, order.clone());
        self.history.lock().push(history.clone());
        Ok(())
    }

    async fn fetch_by_id(&self, order_id: &Uuid) -> anyhow::Result<Option<Order>> {
        Ok(self.orders.lock().get(order_id).cloned())
    }

    async fn fetch_recent(&self, limit: u32) -> anyhow::Result<Vec<Order>> {
        let mut all: Vec<_> = self.orders.lock().values().cloned().collect();
        all.sort_by(|a, b| b.created_ms.cmp(&a.created_ms));
        all.truncate(limit as usize);
        Ok(all)
    }

    async fn fetch_history(&self, order_id: &Uuid) -> anyhow::Result<Vec<StatusHistoryEntry>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|e| e.order_id == *order_id)
            .cloned()
            .collect())
    }
}

struct Harness {
    raydium: Arc<MockVenue>,
    orca: Arc<MockVenue>,
    store: Arc<OrderStore>,
    cache: Arc<OrderCache>,
    hub: Arc<StatusHub>,
    queue: Arc<WorkQueue>,
    worker: Arc<PipelineWorker>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    }
}

fn build_harness() -> Harness {
    let raydium = Arc::new(MockVenue::new(VenueId::Raydium, 1.00, 0.0025));
    let orca = Arc::new(MockVenue::new(VenueId::Orca, 1.01, 0.002));

    let adapters: Vec<Arc<dyn VenueAdapter>> = vec![raydium.clone(), orca.clone()];
    let venues = Arc::new(VenueSet::new(adapters, BreakerConfig::default()));

    let store = Arc::new(OrderStore::new(Arc::new(MemoryOrderRepo::default())));
    let cache = Arc::new(OrderCache::new(Duration::from_secs(60)));
    let hub = Arc::new(StatusHub::new());
    let router = Arc::new(Router::new(venues.clone(), Duration::from_millis(200)));
    let executor = Arc::new(Executor::new(venues, 0.01, 0.5));

    let worker = Arc::new(PipelineWorker::new(
        store.clone(),
        cache.clone(),
        hub.clone(),
        router,
        executor,
        fast_retry(),
        CriticalBus::default(),
    ));

    let queue = Arc::new(WorkQueue::new(
        Arc::new(MemorySubstrate::new()),
        QueueConfig {
            concurrency: 4,
            max_attempts: 3,
            backoff_base: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_millis(20),
            ..Default::default()
        },
    ));

    Harness {
        raydium,
        orca,
        store,
        cache,
        hub,
        queue,
        worker,
    }
}

/// Create the order, attach a stream, emit the endpoint's `pending`, and
/// enqueue: the submission endpoint's flow, minus the socket.
async fn submit(
    h: &Harness,
    slippage: f64,
) -> (Uuid, mpsc::UnboundedReceiver<String>) {
    let order = h
        .store
        .create(NewOrder {
            token_in: "SOL".into(),
            token_out: "USDC".into(),
            amount_in: 1_000_000,
            slippage,
        })
        .await
        .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    h.hub.attach(order.id, tx);
    h.hub.emit(&order.id, OrderStatus::Pending, None);
    h.cache.set(order.clone());
    h.queue.enqueue(Job::from_order(&order)).await.unwrap();

    (order.id, rx)
}

fn start(h: &Harness) {
    let queue = h.queue.clone();
    let worker = h.worker.clone();
    tokio::spawn(async move { queue.run(worker).await });
}

/// Collect frames until a terminal status arrives.
async fn collect_stream(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<StatusUpdate> {
    let mut frames = Vec::new();
    loop {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream stalled before a terminal status");
        let Some(frame) = frame else { break };
        let update: StatusUpdate = serde_json::from_str(&frame).unwrap();
        let terminal = update.status.is_terminal();
        frames.push(update);
        if terminal {
            break;
        }
    }
    frames
}

#[tokio::test]
async fn happy_path_confirms_on_the_better_venue() {
    let h = build_harness();
    // Orca fills above the 999_900 floor.
    h.orca.script_swap(SwapOutcome::Fill {
        amount_out: 1_005_000,
    });

    let (order_id, mut rx) = submit(&h, 0.01).await;
    start(&h);

    let frames = collect_stream(&mut rx).await;
    let statuses: Vec<_> = frames.iter().map(|f| f.status).collect();
    assert_eq!(statuses, vec![
        OrderStatus::Pending,
        OrderStatus::Routing,
        OrderStatus::Building,
        OrderStatus::Submitted,
        OrderStatus::Confirmed,
    ]);

    // The building frame carries the full routing decision.
    let decision = frames[2]
        .data
        .as_ref()
        .unwrap()
        .routing_decision
        .as_ref()
        .unwrap();
    assert_eq!(decision.selected_venue, VenueId::Orca);
    assert!((decision.venue_a_price.unwrap() - 0.9975).abs() < 1e-9);
    assert!((decision.venue_b_price.unwrap() - 1.00798).abs() < 1e-9);

    // Submitted and confirmed both carry the tx hash.
    assert!(frames[3].data.as_ref().unwrap().tx_hash.is_some());
    let confirmed_data = frames[4].data.as_ref().unwrap();
    assert!(confirmed_data.tx_hash.is_some());
    assert!(confirmed_data.executed_price.is_some());

    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.venue, Some(VenueId::Orca));
    assert_eq!(order.amount_out, Some(1_005_000));
    assert!(order.tx_id.is_some());
    assert!(order.confirmed_ms.is_some());
    // min_amount_out invariant: realized >= floor(estimate * (1 - slippage)).
    assert!(order.amount_out.unwrap() >= 999_900);

    // Cache entry removed on terminal status; subscribers released.
    assert!(!h.cache.exists(&order_id));
    assert_eq!(h.hub.subscriber_count(&order_id), 0);

    let history: Vec<_> = h
        .store
        .status_history(&order_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(history, vec![
        OrderStatus::Pending,
        OrderStatus::Routing,
        OrderStatus::Building,
        OrderStatus::Submitted,
        OrderStatus::Confirmed,
    ]);

    h.queue.shutdown();
}

#[tokio::test]
async fn slippage_breach_exhausts_retries_and_fails() {
    let h = build_harness();
    // Every attempt fills below the 999_900 floor.
    for _ in 0..3 {
        h.orca
            .script_swap(SwapOutcome::Fill { amount_out: 999_000 });
    }

    let (order_id, mut rx) = submit(&h, 0.01).await;
    start(&h);

    let frames = collect_stream(&mut rx).await;
    let last = frames.last().unwrap();
    assert_eq!(last.status, OrderStatus::Failed);
    let error = last.data.as_ref().unwrap().error.as_ref().unwrap();
    assert!(error.contains("slippage"));
    assert!(error.contains("orca"));

    // The swap phase used its full retry budget.
    assert_eq!(h.orca.swap_calls(), 3);

    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.failure_reason.as_deref().unwrap().contains("slippage"));
    assert!(!h.cache.exists(&order_id));

    h.queue.shutdown();
}

#[tokio::test]
async fn partial_venue_outage_routes_through_the_survivor() {
    let h = build_harness();
    // Raydium exceeds the quote timeout; Orca answers.
    h.raydium.set_quote_delay(Some(Duration::from_secs(10)));
    h.orca.script_swap(SwapOutcome::Fill {
        amount_out: 1_005_000,
    });

    let (order_id, mut rx) = submit(&h, 0.01).await;
    start(&h);

    let frames = collect_stream(&mut rx).await;
    assert_eq!(frames.last().unwrap().status, OrderStatus::Confirmed);

    let decision = frames[2]
        .data
        .as_ref()
        .unwrap()
        .routing_decision
        .as_ref()
        .unwrap();
    assert_eq!(decision.selected_venue, VenueId::Orca);
    assert!(decision.venue_a_price.is_none(), "dropped venue has no price");

    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert_eq!(order.venue, Some(VenueId::Orca));

    h.queue.shutdown();
}

#[tokio::test]
async fn all_venues_down_fails_with_routing_reason() {
    let h = build_harness();
    // Both venues fail every quote attempt across all 3 retries.
    h.raydium.fail_next_quotes(10);
    h.orca.fail_next_quotes(10);

    let (order_id, mut rx) = submit(&h, 0.01).await;
    start(&h);

    let frames = collect_stream(&mut rx).await;
    assert_eq!(frames.last().unwrap().status, OrderStatus::Failed);

    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(
        order
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("no venue available")
    );

    h.queue.shutdown();
}

#[tokio::test]
async fn out_of_range_slippage_is_not_retried() {
    let h = build_harness();

    let (order_id, mut rx) = submit(&h, 0.9).await;
    start(&h);

    let frames = collect_stream(&mut rx).await;
    assert_eq!(frames.last().unwrap().status, OrderStatus::Failed);

    // Validation failed before any venue swap; no retries happened.
    assert_eq!(h.orca.swap_calls(), 0);
    assert_eq!(h.raydium.swap_calls(), 0);

    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert!(
        order
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("slippage must be between")
    );

    h.queue.shutdown();
}

#[tokio::test]
async fn duplicate_enqueue_processes_the_order_once() {
    let h = build_harness();
    h.orca.script_swap(SwapOutcome::Fill {
        amount_out: 1_005_000,
    });

    let (order_id, mut rx) = submit(&h, 0.01).await;
    // Second submission of the same order id: substrate dedup makes it a
    // no-op.
    let order = h.store.find_by_id(&order_id).await.unwrap().unwrap();
    assert!(!h.queue.enqueue(Job::from_order(&order)).await.unwrap());

    start(&h);
    let frames = collect_stream(&mut rx).await;
    assert_eq!(frames.last().unwrap().status, OrderStatus::Confirmed);

    sleep(Duration::from_millis(50)).await;
    let metrics = h.queue.metrics();
    assert_eq!(metrics.completed, 1);

    // Exactly one pass through the pipeline: one routing entry in history.
    let routing_entries = h
        .store
        .status_history(&order_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == OrderStatus::Routing)
        .count();
    assert_eq!(routing_entries, 1);

    h.queue.shutdown();
}

#[tokio::test]
async fn store_failure_mid_pipeline_is_retried_by_the_queue() {
    // Repository that fails the first `updates` writes, then recovers.
    struct FlakyRepo {
        inner: MemoryOrderRepo,
        failures_left: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl OrderRepository for FlakyRepo {
        async fn insert(&self, o: &Order, h: &StatusHistoryEntry) -> anyhow::Result<()> {
            self.inner.insert(o, h).await
        }

        async fn update(&self, o: &Order, h: &StatusHistoryEntry) -> anyhow::Result<()> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    anyhow::bail!("connection reset by peer");
                }
            }
            self.inner.update(o, h).await
        }

        async fn fetch_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Order>> {
            self.inner.fetch_by_id(id).await
        }

        async fn fetch_recent(&self, limit: u32) -> anyhow::Result<Vec<Order>> {
            self.inner.fetch_recent(limit).await
        }

        async fn fetch_history(&self, id: &Uuid) -> anyhow::Result<Vec<StatusHistoryEntry>> {
            self.inner.fetch_history(id).await
        }
    }

    let h = build_harness();
    let repo = Arc::new(FlakyRepo {
        inner: MemoryOrderRepo::default(),
        failures_left: Mutex::new(1),
    });
    let store = Arc::new(OrderStore::new(repo));

    // Rebuild the worker over the flaky store.
    let adapters: Vec<Arc<dyn VenueAdapter>> = vec![h.raydium.clone(), h.orca.clone()];
    let venues = Arc::new(VenueSet::new(adapters, BreakerConfig::default()));
    let worker = Arc::new(PipelineWorker::new(
        store.clone(),
        h.cache.clone(),
        h.hub.clone(),
        Arc::new(Router::new(venues.clone(), Duration::from_millis(200))),
        Arc::new(Executor::new(venues, 0.01, 0.5)),
        fast_retry(),
        CriticalBus::default(),
    ));

    let order = store
        .create(NewOrder {
            token_in: "SOL".into(),
            token_out: "USDC".into(),
            amount_in: 1_000_000,
            slippage: 0.01,
        })
        .await
        .unwrap();

    h.queue.enqueue(Job::from_order(&order)).await.unwrap();
    let queue = h.queue.clone();
    tokio::spawn(async move { queue.run(worker).await });

    // First delivery dies on the routing write; queue backoff re-delivers
    // and the second pass completes.
    for _ in 0..200 {
        if h.queue.metrics().completed == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.queue.metrics().completed, 1);

    let stored = store.find_by_id(&order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);

    h.queue.shutdown();
}

#[tokio::test]
async fn breaker_scenario_fails_fast_then_recovers() {
    let raydium = Arc::new(MockVenue::new(VenueId::Raydium, 1.00, 0.0025));
    let orca = Arc::new(MockVenue::new(VenueId::Orca, 1.01, 0.002));
    let adapters: Vec<Arc<dyn VenueAdapter>> = vec![raydium.clone(), orca.clone()];
    let venues = Arc::new(VenueSet::new(adapters, BreakerConfig {
        failure_threshold: 5,
        reset_timeout: Duration::from_millis(50),
        monitoring_period: Duration::from_secs(120),
    }));
    let router = Router::new(venues.clone(), Duration::from_millis(200));

    // Five consecutive Raydium failures open its breaker; the router keeps
    // succeeding through Orca.
    raydium.fail_next_quotes(5);
    for _ in 0..5 {
        let quotes = router.quotes("SOL", "USDC", 1_000_000).await.unwrap();
        assert_eq!(quotes.len(), 1);
    }
    let breaker = &venues.get(VenueId::Raydium).unwrap().breaker;
    assert_eq!(breaker.state(), resilience::BreakerState::Open);

    // While open, Raydium is not called at all.
    let calls = raydium.quote_calls();
    router.quotes("SOL", "USDC", 1_000_000).await.unwrap();
    assert_eq!(raydium.quote_calls(), calls);
    let err = breaker.try_acquire().unwrap_err();
    assert_eq!(err.kind, ErrorKind::System);
    assert!(err.message.contains("circuit breaker OPEN"));

    // After the reset timeout a single healthy probe closes the breaker.
    sleep(Duration::from_millis(60)).await;
    let quotes = router.quotes("SOL", "USDC", 1_000_000).await.unwrap();
    assert_eq!(quotes.len(), 2);
    assert_eq!(breaker.state(), resilience::BreakerState::Closed);
}
