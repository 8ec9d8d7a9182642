//! In-memory caching module.
//!
//! `EntityCache` holds per-day task slices for the rolling window, each
//! stamped with the time it was loaded via `CachedData`.

mod cached;
pub mod entity_cache;

pub use cached::CachedData;
pub use entity_cache::EntityCache;
