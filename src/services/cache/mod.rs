//! Search result cache.
//!
//! Combines a per-record time-to-live with least-recently-used eviction at a
//! fixed capacity. Records are derived data: dropping the whole cache never
//! loses state.

mod record;
mod stats;
mod store;


pub use record::CacheRecord;
pub use stats::CacheStats;
pub use store::SearchCache;
