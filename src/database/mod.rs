//! Persistence for strike records and whitelist entries.
//!
//! `MemoryStore` keeps everything in process; the PostgreSQL repositories
//! live under the `moderation` schema.

pub mod memory;
pub mod pool;
pub mod store;
pub mod strikes;
pub mod whitelist;

pub use memory::MemoryStore;
pub use pool::DatabasePool;
pub use store::{StrikeStore, WhitelistStore};
pub use strikes::StrikeRepository;
pub use whitelist::WhitelistRepository;
