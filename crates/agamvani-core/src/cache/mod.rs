//! In-memory caching.
//!
//! - `CacheStore`: keyed TTL store with LRU eviction and glob invalidation
//! - `ImageCache`: artwork blobs keyed by track code, with coalesced loads
//!
//! Nothing is persisted; both caches live for the process lifetime.

pub mod image;
pub mod pattern;
pub mod store;

pub use image::{ImageCache, ImageCacheStats, ImageHandle};
pub use pattern::KeyPattern;
pub use store::{CacheStats, CacheStore, DEFAULT_MAX_SIZE, DEFAULT_TTL};
