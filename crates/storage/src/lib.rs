//! Storage abstractions for the gigamaps tile services.
//!
//! Provides unified interfaces for:
//! - PostgreSQL/PostGIS read replica for tile and info queries
//! - Redis for the soft cache and the refresh job queue
//! - An in-memory L1 cache for hot tiles

pub mod layers;
pub mod memory_cache;
pub mod refresh;
pub mod replica;
pub mod soft_cache;

pub use memory_cache::{MemoryTileCache, MemoryTileCacheStats};
pub use refresh::{RefreshJob, RefreshQueue};
pub use replica::{InfoCounts, Replica, SchoolDetailRow, SeriesPoint, TimePlayerRow};
pub use soft_cache::{CacheEntry, EntryState, SoftCache, SOFT_CACHE_PREFIX};
