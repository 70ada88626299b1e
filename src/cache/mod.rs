//! Caching subsystem.
//!
//! - [`TtlCache`]: generic string-keyed cache with per-entry TTL and
//!   substring invalidation. Shared by everything below.
//!
//! - [`query::OptimizedQuery`]: a keyed fetcher with cached results and an
//!   observable `{data, error, is_loading, is_validating}` state.
//!
//! The paginated and single-document read paths that sit on top of the
//! cache live in [`crate::gateway`].

pub mod query;
pub mod ttl;

pub use query::{OptimizedQuery, QueryOptions, QueryState};
pub use ttl::{CacheEntry, TtlCache};
