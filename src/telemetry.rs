//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder; without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `keepsake_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `operation`: cache consumer: "page", "document" or "query"
//! - `mode`: state persistence mode: "durable" or "ephemeral"

/// Total cache hits.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "keepsake_cache_hits_total";

/// Total cache misses (absent or stale).
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "keepsake_cache_misses_total";

/// Total cache invalidation calls.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "keepsake_cache_invalidations_total";

/// Total successful state store writes.
///
/// Labels: `mode`.
pub const STATE_WRITES_TOTAL: &str = "keepsake_state_writes_total";

/// Total entries purged because their expiry passed.
pub const STATE_EXPIRED_TOTAL: &str = "keepsake_state_expired_total";

/// Total controller saves that completed.
pub const SAVES_TOTAL: &str = "keepsake_saves_total";

/// Total controller saves that failed (validation, storage, timeout, auth).
pub const SAVE_FAILURES_TOTAL: &str = "keepsake_save_failures_total";
