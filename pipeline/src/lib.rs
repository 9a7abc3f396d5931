pub mod bus;
pub mod executor;
pub mod hub;
pub mod router;
pub mod venue_set;
pub mod worker;

pub use bus::CriticalBus;
pub use executor::Executor;
pub use hub::StatusHub;
pub use router::Router;
pub use venue_set::{VenueSet, VenueSlot};
pub use worker::PipelineWorker;
