//! Storage implementations of the [`ListingStore`](crate::traits::ListingStore) seam.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
