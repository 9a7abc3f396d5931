use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use corelib::order::Order;

struct CacheEntry {
    order: Order,
    expires_at: Instant,
}

/// Advisory low-latency view of in-flight orders.
///
/// Entries expire after a TTL; reads never resurrect them. The store stays
/// the source of truth for status; anything read here may be stale.
pub struct OrderCache {
    default_ttl: Duration,
    map: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl OrderCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, order: Order) {
        self.set_with_ttl(order, self.default_ttl);
    }

    pub fn set_with_ttl(&self, order: Order, ttl: Duration) {
        let mut map = self.map.lock();
        map.insert(order.id, CacheEntry {
            order,
            expires_at: Instant::now() + ttl,
        });
    }

    pub fn get(&self, order_id: &Uuid) -> Option<Order> {
        let mut map = self.map.lock();
        match map.get(order_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.order.clone()),
            Some(_) => {
                // Lazy expiry on read.
                map.remove(order_id);
                None
            }
            None => None,
        }
    }

    pub fn exists(&self, order_id: &Uuid) -> bool {
        self.get(order_id).is_some()
    }

    /// Idempotent.
    pub fn delete(&self, order_id: &Uuid) {
        self.map.lock().remove(order_id);
    }

    /// Extend a live entry's lifetime; returns false when the entry is
    /// missing or already expired.
    pub fn refresh_ttl(&self, order_id: &Uuid, ttl: Duration) -> bool {
        let mut map = self.map.lock();
        match map.get_mut(order_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.map.lock();
        let before = map.len();
        let now = Instant::now();
        map.retain(|_, entry| entry.expires_at > now);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, remaining = map.len(), "cache purge");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::order::OrderStatus;

    fn mk_order(id: Uuid) -> Order {
        Order {
            id,
            token_in: "SOL".into(),
            token_out: "USDC".into(),
            amount_in: 1_000_000,
            slippage: 0.01,
            status: OrderStatus::Pending,
            venue: None,
            tx_id: None,
            executed_price: None,
            amount_in_executed: None,
            amount_out: None,
            failure_reason: None,
            created_ms: 0,
            updated_ms: 0,
            confirmed_ms: None,
        }
    }

    #[test]
    fn set_get_delete_round_trip() {
        let cache = OrderCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert!(!cache.exists(&id));
        cache.set(mk_order(id));
        assert_eq!(cache.get(&id).unwrap().id, id);

        cache.delete(&id);
        assert!(cache.get(&id).is_none());
        // Deleting again is a no-op.
        cache.delete(&id);
    }

    #[test]
    fn expired_entries_vanish_on_read() {
        let cache = OrderCache::new(Duration::from_millis(10));
        let id = Uuid::new_v4();
        cache.set(mk_order(id));

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&id).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn refresh_ttl_extends_live_entries_only() {
        let cache = OrderCache::new(Duration::from_millis(30));
        let id = Uuid::new_v4();
        cache.set(mk_order(id));

        assert!(cache.refresh_ttl(&id, Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(40));
        // Still alive thanks to the refresh.
        assert!(cache.exists(&id));

        let gone = Uuid::new_v4();
        assert!(!cache.refresh_ttl(&gone, Duration::from_secs(60)));
    }

    #[test]
    fn purge_sweeps_expired_entries() {
        let cache = OrderCache::new(Duration::from_millis(10));
        for _ in 0..3 {
            cache.set(mk_order(Uuid::new_v4()));
        }
        let keeper = Uuid::new_v4();
        cache.set_with_ttl(mk_order(keeper), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.purge_expired(), 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.exists(&keeper));
    }

    #[test]
    fn newer_set_overwrites() {
        let cache = OrderCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        cache.set(mk_order(id));
        let mut updated = mk_order(id);
        updated.status = OrderStatus::Routing;
        cache.set(updated);

        assert_eq!(cache.get(&id).unwrap().status, OrderStatus::Routing);
        assert_eq!(cache.len(), 1);
    }
}
