pub mod error;
pub mod job;
pub mod order;
pub mod swap;
pub mod validate;
pub mod wire;
