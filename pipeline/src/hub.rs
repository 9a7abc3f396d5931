//! Status fan-out to subscribed clients.
//!
//! One order id maps to any number of subscriber senders. Emission
//! serializes the frame once and pushes it to every sender; senders whose
//! channel is gone (client disconnected) are pruned in place. A single lock
//! keeps emission and subscriber mutation safe against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use common::time::now_ms;
use corelib::order::OrderStatus;
use corelib::wire::{StatusData, StatusUpdate};

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: UnboundedSender<String>,
}

#[derive(Default)]
pub struct StatusHub {
    subscribers: Mutex<HashMap<Uuid, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an order. The returned id pairs with
    /// [`StatusHub::detach`] when the connection goes away.
    pub fn attach(&self, order_id: Uuid, tx: UnboundedSender<String>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut subs = self.subscribers.lock();
        subs.entry(order_id).or_default().push(Subscriber { id, tx });
        debug!(%order_id, subscriber = id, "subscriber attached");
        id
    }

    /// Remove one subscriber; drops the mapping when it was the last one.
    /// Closing the underlying stream is the sender drop itself.
    pub fn detach(&self, order_id: &Uuid, subscriber_id: SubscriberId) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(order_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                subs.remove(order_id);
            }
        }
        debug!(%order_id, subscriber = subscriber_id, "subscriber detached");
    }

    /// Drop every subscriber of one order (terminal status reached).
    pub fn detach_all(&self, order_id: &Uuid) {
        if let Some(list) = self.subscribers.lock().remove(order_id) {
            debug!(%order_id, count = list.len(), "all subscribers detached");
        }
    }

    /// Serialize and fan out one status update; prunes dead subscribers.
    pub fn emit(&self, order_id: &Uuid, status: OrderStatus, data: Option<StatusData>) {
        let update = StatusUpdate {
            order_id: *order_id,
            status,
            timestamp: now_ms(),
            data,
        };
        let frame = match serde_json::to_string(&update) {
            Ok(f) => f,
            Err(e) => {
                // Serialization of our own frame type cannot realistically
                // fail; log and move on rather than poisoning the pipeline.
                tracing::error!(%order_id, error = %e, "status frame serialization failed");
                return;
            }
        };

        let mut subs = self.subscribers.lock();
        let Some(list) = subs.get_mut(order_id) else {
            return;
        };

        let before = list.len();
        list.retain(|s| s.tx.send(frame.clone()).is_ok());
        let pruned = before - list.len();
        if pruned > 0 {
            debug!(%order_id, pruned, "pruned dead subscribers during emit");
        }
        if list.is_empty() {
            subs.remove(order_id);
        }
    }

    /// Drop every subscriber of every order (process shutdown).
    pub fn close_all(&self) {
        let mut subs = self.subscribers.lock();
        let orders = subs.len();
        let total: usize = subs.values().map(Vec::len).sum();
        subs.clear();
        info!(orders, subscribers = total, "status hub closed");
    }

    pub fn subscriber_count(&self, order_id: &Uuid) -> usize {
        self.subscribers
            .lock()
            .get(order_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.subscribers.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn parse(frame: &str) -> StatusUpdate {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn emit_reaches_every_subscriber_of_the_order() {
        let hub = StatusHub::new();
        let order = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        hub.attach(order, tx1);
        hub.attach(order, tx2);
        hub.attach(other, tx3);

        hub.emit(&order, OrderStatus::Routing, None);

        assert_eq!(parse(&rx1.recv().await.unwrap()).status, OrderStatus::Routing);
        assert_eq!(parse(&rx2.recv().await.unwrap()).status, OrderStatus::Routing);
        assert!(rx3.try_recv().is_err(), "unrelated order got the frame");
    }

    #[tokio::test]
    async fn detached_subscriber_receives_nothing_further() {
        let hub = StatusHub::new();
        let order = Uuid::new_v4();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.attach(order, tx);
        hub.emit(&order, OrderStatus::Pending, None);
        hub.detach(&order, id);
        hub.emit(&order, OrderStatus::Routing, None);

        assert_eq!(parse(&rx.recv().await.unwrap()).status, OrderStatus::Pending);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(&order), 0);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_emit() {
        let hub = StatusHub::new();
        let order = Uuid::new_v4();

        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        hub.attach(order, tx_dead);
        hub.attach(order, tx_live);
        drop(rx_dead);

        hub.emit(&order, OrderStatus::Routing, None);

        assert_eq!(hub.subscriber_count(&order), 1);
        assert!(rx_live.recv().await.is_some());
    }

    #[tokio::test]
    async fn close_all_leaves_no_subscribers() {
        let hub = StatusHub::new();
        for _ in 0..3 {
            let (tx, _rx) = mpsc::unbounded_channel();
            hub.attach(Uuid::new_v4(), tx);
        }
        assert_eq!(hub.total_subscribers(), 3);

        hub.close_all();
        assert_eq!(hub.total_subscribers(), 0);
    }

    #[tokio::test]
    async fn frames_carry_payload_data() {
        let hub = StatusHub::new();
        let order = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.attach(order, tx);

        hub.emit(
            &order,
            OrderStatus::Submitted,
            Some(StatusData {
                tx_hash: Some("sig".into()),
                ..Default::default()
            }),
        );

        let update = parse(&rx.recv().await.unwrap());
        assert_eq!(update.status, OrderStatus::Submitted);
        assert_eq!(update.data.unwrap().tx_hash.as_deref(), Some("sig"));
    }
}
