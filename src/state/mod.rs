//! Keyed application state with persistence modes and pub/sub.
//!
//! A [`StateStore`] holds arbitrary JSON state under namespaced keys such as
//! `class:123` or `draft:essay-9`. Each write chooses a persistence mode:
//!
//! - **durable** entries are serialized through a [`StoragePort`] and
//!   survive a restart of the store;
//! - **ephemeral** entries live in the store's memory table only and are
//!   never handed to the port.
//!
//! Entries may carry an expiry; an expired entry reads as absent and is
//! purged by the read that notices it. Every successful write or removal
//! is delivered to the key's subscribers in registration order, then to the
//! configured [`ChangeNotifier`] for other contexts.

mod notify;
mod storage;
mod store;
mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use notify::{ChangeNotifier, StateBus};
pub use storage::{FileStorage, MemoryStorage, StoragePort};
pub use store::{DEFAULT_NAMESPACE, StateStore, StateStoreBuilder};
pub use validate::{JsonKind, ShapeValidator, Validator};

/// One stored piece of state.
///
/// This is also the durable record layout: the JSON form of a
/// `StateEntry` is what a [`StoragePort`] receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
    pub persistent: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_role: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub saved_at: DateTime<Utc>,
}

impl StateEntry {
    /// Whether `now` is past the entry's expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: String,
    /// New value, or `None` when the entry was removed.
    pub new_value: Option<Value>,
    /// Owner identity of the writer.
    pub user_id: Option<String>,
    /// Expiry of the new entry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
    /// Context id of the store that performed the write.
    pub origin: String,
}

/// Options for [`StateStore::set_state()`].
///
/// ```rust
/// # use keepsake::SetOptions;
/// let options = SetOptions::new()
///     .persistent(true)
///     .validate(true)
///     .user("teacher-7")
///     .metadata("backup", true);
/// assert!(options.persistent);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Write through the storage port (`true`) or keep in memory only.
    pub persistent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Run the key's validator before writing.
    pub validate: bool,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub metadata: Map<String, Value>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn expires_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = at;
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Handle returned by [`StateStore::subscribe()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
