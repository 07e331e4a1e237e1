//! Two-tier result cache keyed by request identity and corpus version.

pub mod entry;
pub mod key;
pub mod local;
pub mod shared;
pub mod sqlite;
pub mod two_tier;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use local::LocalTier;
pub use shared::{MemoryTier, SharedTier};
pub use sqlite::SqliteTier;
pub use two_tier::{CacheHit, CacheLookup, ResultCache};
