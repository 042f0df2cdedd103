//! Response caching keyed by a digest of the request

pub mod manager;
pub mod mediator;
pub mod object;

pub use manager::{Admission, CacheManager, Lookup, ScopeStats};
pub use mediator::{CacheMediator, CacheMediatorConfig, CacheScope};
pub use object::CachedObject;

/// Cache key shared by every per-host cache mediator
pub const PER_HOST_CACHE_KEY: &str = "esb.cache_key";

/// Default number of request hashes one scope may hold
pub const DEFAULT_IN_MEMORY_SIZE: usize = 1000;
