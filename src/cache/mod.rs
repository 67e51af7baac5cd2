//! Cache Module
//!
//! Versioned cache stores: entries, the host store API with its memory and
//! filesystem backends, the role registry and the engine counters.

mod entry;
mod fs;
mod order;
mod registry;
mod stats;
mod storage;


// Re-export public types
pub use entry::CacheEntry;
pub use fs::{FsStorage, FsStore};
pub use order::InsertionOrder;
pub use registry::{embeds_version, parse_store_name, CacheRole, StoreRegistry};
pub use stats::{EngineStats, StatsSnapshot};
pub use storage::{CacheStorage, CacheStore, MemoryStorage, MemoryStore, StoreHandle};
