// ── Query cache ──
//
// Keyed, subscriber-counted storage of fetch results with push-based
// change notification, deduplicated fetches and grace-period eviction.

mod cache;
mod entry;
mod fetcher;
mod key;
mod matcher;
mod rollback;

pub use cache::QueryCache;
pub(crate) use cache::CacheInner;
pub use entry::{CacheEntry, FetchFailure, QueryStatus, RequestId};
pub use fetcher::Fetcher;
pub use key::CacheKey;
pub use matcher::KeyMatcher;
pub use rollback::RollbackToken;
