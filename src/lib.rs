//! Keepsake - TTL read cache and local-first temporal state persistence
//!
//! Two halves that share the error type and telemetry:
//!
//! - a TTL cache with substring invalidation ([`TtlCache`]), used by the
//!   [`ReadGateway`] to cache first pages and single documents fetched from
//!   a remote [`DocumentStore`], and by [`OptimizedQuery`] for arbitrary
//!   keyed fetchers;
//! - a [`StateStore`] holding durable or ephemeral JSON state with expiry,
//!   owner identity and pub/sub, driven per key by a
//!   [`TemporalController`] that adds debounced autosave, dirty tracking,
//!   expiry bookkeeping and import/export.
//!
//! # Read Gateway Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keepsake::{Constraint, DocumentStore, GatewayConfig, ReadGateway};
//!
//! # async fn run(store: Arc<dyn DocumentStore>) -> keepsake::Result<()> {
//! let gateway = ReadGateway::new(store, GatewayConfig::default());
//! let constraints = [Constraint::eq("teacher_id", "t-1")];
//!
//! let first = gateway.fetch_page("classes", &constraints, 10, None).await?;
//! if let Some(cursor) = first.next_cursor {
//!     // Pages past the first always go to the remote store.
//!     let _second = gateway.fetch_page("classes", &constraints, 10, Some(&cursor)).await?;
//! }
//!
//! // After writing to "classes":
//! gateway.invalidate("classes");
//! # Ok(())
//! # }
//! ```
//!
//! # Temporal Controller Example
//!
//! ```rust
//! use keepsake::{Identity, StateStore, TemporalController, TemporalOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> keepsake::Result<()> {
//!     let store = StateStore::builder().build();
//!     let draft = TemporalController::open(
//!         store.clone(),
//!         "draft:essay-9",
//!         None,
//!         TemporalOptions::draft().auto_save(false),
//!         Some(Identity::new("student-3")),
//!     )
//!     .await?;
//!
//!     draft.set_data(json!({"body": "It was a dark and stormy night"}));
//!     draft.save_data(None).await?;
//!
//!     assert!(store.get_state("draft:essay-9").await?.is_some());
//!     assert!(draft.time_until_expiration().is_some());
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod state;
pub mod telemetry;
pub mod temporal;

// Re-export main types at crate root
pub use cache::{CacheEntry, OptimizedQuery, QueryOptions, QueryState, TtlCache};
pub use config::KeepsakeConfig;
pub use error::{KeepsakeError, Result};
pub use gateway::{
    CachedRead, Constraint, Cursor, Direction, Document, DocumentStore, FilterOp, GatewayConfig,
    Page, ReadGateway,
};
pub use state::{
    ChangeNotifier, FileStorage, JsonKind, MemoryStorage, SetOptions, ShapeValidator, StateBus,
    StateChange, StateEntry, StateStore, StateStoreBuilder, StoragePort, SubscriptionId,
    Validator,
};
pub use temporal::{
    ExportMetadata, ExportSnapshot, Identity, SaveOverrides, Status, TemporalController,
    TemporalEvent, TemporalOptions, TemporalState,
};

/// Lock a std mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
