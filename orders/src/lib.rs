pub mod cache;
pub mod db;
pub mod repository;
pub mod repository_sqlx;
pub mod schema;
pub mod store;

pub use cache::OrderCache;
pub use db::Db;
pub use repository::OrderRepository;
pub use repository_sqlx::SqlxOrderRepository;
pub use store::OrderStore;
