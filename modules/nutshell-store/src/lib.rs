pub mod locks;
pub mod memory;
pub mod postgres;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use locks::{NodeGuard, NodeLocks};
pub use memory::MemoryNodeStore;
pub use postgres::PgNodeStore;
pub use store::{rank_hits, NodeFilter, NodeStore, ScoredNode, UpdateCursor};
