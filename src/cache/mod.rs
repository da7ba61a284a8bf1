//! Generic cache-aside machinery for slow, unreliable upstreams.
//!
//! This module provides a caching mechanism, independent of any one data
//! source, that:
//! - Stores the last known-good value per key with a TTL
//! - Collapses concurrent fetches of one key into a single upstream call
//! - Serves stale values when the upstream is transiently unavailable
//! - Never masks a definitive rejection with stale data

mod clock;
mod flight;
mod layer;
mod storage;
mod traits;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use layer::{spawn_sweeper, LayerPolicy, LookupService};
pub use storage::{CacheStorage, MemoryStorage};
pub use traits::{Cacheable, LookupResult, UpstreamFetcher};
