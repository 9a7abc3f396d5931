pub mod adapter;
pub mod http;
pub mod mock;

pub use adapter::VenueAdapter;
pub use http::HttpVenue;
pub use mock::{MockVenue, SwapOutcome};
