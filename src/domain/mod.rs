//! Domain types shared across the orchestration layer: cache keys, cache
//! entries and tiers, request priorities, and the event-proximity TTL policy.

mod entry;
mod key;
mod priority;
mod ttl;

pub use entry::{CacheEntry, Tier};
pub use key::CacheKey;
pub use priority::Priority;
pub use ttl::{TtlBand, TtlPolicy};
