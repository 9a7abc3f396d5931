use std::sync::Arc;

use resilience::{BreakerConfig, CircuitBreaker};
use venues::VenueAdapter;

use corelib::swap::VenueId;

/// One venue adapter with its guarding breaker.
///
/// The breaker is shared between the router (quote path) and the executor
/// (swap path); either side tripping it shields both.
pub struct VenueSlot {
    pub adapter: Arc<dyn VenueAdapter>,
    pub breaker: Arc<CircuitBreaker>,
}

/// The candidate venues in fixed preference order. The order given at
/// construction is the tie-break order for quote selection.
pub struct VenueSet {
    slots: Vec<VenueSlot>,
}

impl VenueSet {
    pub fn new(adapters: Vec<Arc<dyn VenueAdapter>>, breaker_config: BreakerConfig) -> Self {
        let slots = adapters
            .into_iter()
            .map(|adapter| {
                let breaker = Arc::new(CircuitBreaker::new(
                    adapter.id().as_str(),
                    breaker_config.clone(),
                ));
                VenueSlot { adapter, breaker }
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[VenueSlot] {
        &self.slots
    }

    pub fn get(&self, venue: VenueId) -> Option<&VenueSlot> {
        self.slots.iter().find(|s| s.adapter.id() == venue)
    }
}
