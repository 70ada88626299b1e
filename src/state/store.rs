//! The state store: memory table, durable port, subscriber registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::notify::ChangeNotifier;
use super::storage::{MemoryStorage, StoragePort};
use super::validate::{NotNull, Validator};
use super::{SetOptions, StateChange, StateEntry, SubscriptionId};
use crate::{KeepsakeError, Result, lock, telemetry};

/// Default namespace prefixed to durable keys.
pub const DEFAULT_NAMESPACE: &str = "keepsake";

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

type Callback = Arc<dyn Fn(&StateChange) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    key: String,
    callback: Callback,
}

struct StoreInner {
    context_id: String,
    namespace: String,
    storage: Arc<dyn StoragePort>,
    memory: Mutex<HashMap<String, StateEntry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    validators: Vec<(String, Arc<dyn Validator>)>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    next_subscription: AtomicU64,
}

/// Builder for [`StateStore`].
pub struct StateStoreBuilder {
    storage: Option<Arc<dyn StoragePort>>,
    namespace: String,
    context_id: Option<String>,
    validators: Vec<(String, Arc<dyn Validator>)>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
}

impl StateStoreBuilder {
    fn new() -> Self {
        Self {
            storage: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            context_id: None,
            validators: Vec::new(),
            notifier: None,
        }
    }

    /// Durable storage port (default: a fresh [`MemoryStorage`]).
    pub fn storage(mut self, storage: Arc<dyn StoragePort>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Prefix for durable keys (default: `"keepsake"`).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Identity of this store among the contexts sharing a bus.
    pub fn context_id(mut self, id: impl Into<String>) -> Self {
        self.context_id = Some(id.into());
        self
    }

    /// Validate values of keys starting with `prefix`. The first matching
    /// registration wins.
    pub fn validator(mut self, prefix: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.validators.push((prefix.into(), validator));
        self
    }

    /// Transport for changes leaving this store.
    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> StateStore {
        let context_id = self.context_id.unwrap_or_else(|| {
            format!(
                "ctx-{}-{}",
                std::process::id(),
                NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed)
            )
        });
        StateStore {
            inner: Arc::new(StoreInner {
                context_id,
                namespace: self.namespace,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                memory: Mutex::default(),
                subscribers: Mutex::default(),
                validators: self.validators,
                notifier: self.notifier,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }
}

/// Keyed application state with durable/ephemeral modes and pub/sub.
///
/// Cheap to clone; clones share the same state. Construct one per
/// application context and hand it to every controller that needs it.
///
/// ```rust
/// # use keepsake::{SetOptions, StateStore};
/// # use serde_json::json;
/// # #[tokio::main]
/// # async fn main() -> keepsake::Result<()> {
/// let store = StateStore::builder().build();
/// store
///     .set_state("draft:essay-9", json!({"body": "..."}), SetOptions::new().user("u1"))
///     .await?;
/// assert!(store.get_state("draft:essay-9").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    pub fn builder() -> StateStoreBuilder {
        StateStoreBuilder::new()
    }

    /// Store over `storage` with default settings.
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self::builder().storage(storage).build()
    }

    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{key}", self.inner.namespace)
    }

    /// Current value of `key`, or `None` if absent or expired.
    pub async fn get_state(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value))
    }

    /// Full entry for `key`, or `None` if absent or expired.
    ///
    /// An expired entry is purged from both backings before returning.
    pub async fn get_entry(&self, key: &str) -> Result<Option<StateEntry>> {
        let in_memory = lock(&self.inner.memory).get(key).cloned();
        let entry = match in_memory {
            Some(entry) => Some(entry),
            None => self.load_durable(key).await?,
        };
        match entry {
            Some(entry) if entry.is_expired() => {
                self.purge(key).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Write `value` under `key`.
    ///
    /// Validation (when requested) runs before anything is written. A
    /// durable write that fails leaves the memory table untouched. Once the
    /// write succeeds, subscribers of `key` are called in registration
    /// order and the change is handed to the notifier.
    pub async fn set_state(
        &self,
        key: &str,
        value: Value,
        options: SetOptions,
    ) -> Result<StateEntry> {
        if options.validate {
            self.validate(key, &value)?;
        }

        let entry = StateEntry {
            key: key.to_string(),
            value,
            persistent: options.persistent,
            expires_at: options.expires_at,
            owner_id: options.user_id,
            owner_role: options.role,
            metadata: options.metadata,
            saved_at: Utc::now(),
        };

        let storage_key = self.storage_key(key);
        if entry.persistent {
            let record = serde_json::to_string(&entry).map_err(|e| {
                KeepsakeError::Storage(format!("failed to serialize '{key}': {e}"))
            })?;
            self.inner.storage.set(&storage_key, record).await?;
            lock(&self.inner.memory).remove(key);
        } else {
            // A stale durable copy would resurface after a restart.
            self.inner.storage.remove(&storage_key).await?;
            lock(&self.inner.memory).insert(key.to_string(), entry.clone());
        }

        let mode = if entry.persistent { "durable" } else { "ephemeral" };
        metrics::counter!(telemetry::STATE_WRITES_TOTAL, "mode" => mode).increment(1);
        debug!(key, mode, owner = ?entry.owner_id, "state written");

        self.publish(StateChange {
            key: key.to_string(),
            new_value: Some(entry.value.clone()),
            user_id: entry.owner_id.clone(),
            expires_at: entry.expires_at,
            persistent: entry.persistent,
            timestamp: entry.saved_at,
            origin: self.inner.context_id.clone(),
        });
        Ok(entry)
    }

    /// Delete `key` from both backings and notify with `new_value = None`.
    pub async fn remove_state(&self, key: &str, owner_id: Option<&str>) -> Result<()> {
        self.inner.storage.remove(&self.storage_key(key)).await?;
        lock(&self.inner.memory).remove(key);
        debug!(key, owner = ?owner_id, "state removed");

        self.publish(StateChange {
            key: key.to_string(),
            new_value: None,
            user_id: owner_id.map(str::to_string),
            expires_at: None,
            persistent: false,
            timestamp: Utc::now(),
            origin: self.inner.context_id.clone(),
        });
        Ok(())
    }

    /// Register `callback` for changes to `key`.
    ///
    /// With `immediate`, the callback is invoked once with the current value
    /// before this returns.
    pub async fn subscribe<F>(&self, key: &str, callback: F, immediate: bool) -> Result<SubscriptionId>
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(callback);
        lock(&self.inner.subscribers).push(Subscriber {
            id,
            key: key.to_string(),
            callback: Arc::clone(&callback),
        });

        if immediate {
            let current = match self.get_entry(key).await {
                Ok(current) => current,
                Err(e) => {
                    self.unsubscribe(id);
                    return Err(e);
                }
            };
            let change = match current {
                Some(entry) => StateChange {
                    key: key.to_string(),
                    new_value: Some(entry.value),
                    user_id: entry.owner_id,
                    expires_at: entry.expires_at,
                    persistent: entry.persistent,
                    timestamp: entry.saved_at,
                    origin: self.inner.context_id.clone(),
                },
                None => StateChange {
                    key: key.to_string(),
                    new_value: None,
                    user_id: None,
                    expires_at: None,
                    persistent: false,
                    timestamp: Utc::now(),
                    origin: self.inner.context_id.clone(),
                },
            };
            callback(&change);
        }
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        lock(&self.inner.subscribers)
            .iter()
            .filter(|s| s.key == key)
            .count()
    }

    /// Forward changes from other contexts to local subscribers.
    ///
    /// Changes whose `origin` is this store are skipped. The task ends when
    /// the channel closes or every handle to this store is dropped.
    pub fn listen(&self, mut rx: broadcast::Receiver<StateChange>) -> JoinHandle<()> {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if change.origin == inner.context_id {
                            continue;
                        }
                        debug!(key = %change.key, origin = %change.origin, "foreign state change");
                        StateStore { inner }.dispatch(&change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "state listener lagged, changes dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Live keys, optionally restricted to those starting with `prefix`.
    ///
    /// Expired entries encountered along the way are purged.
    pub async fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut candidates: BTreeSet<String> = lock(&self.inner.memory).keys().cloned().collect();
        let namespace = format!("{}:", self.inner.namespace);
        for raw in self.inner.storage.keys().await? {
            if let Some(key) = raw.strip_prefix(&namespace) {
                candidates.insert(key.to_string());
            }
        }

        let mut live = Vec::new();
        for key in candidates {
            if prefix.is_some_and(|p| !key.starts_with(p)) {
                continue;
            }
            if self.get_entry(&key).await?.is_some() {
                live.push(key);
            }
        }
        Ok(live)
    }

    /// Remove every expired entry from both backings. Returns how many.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = lock(&self.inner.memory)
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect();

        let mut purged = 0;
        for key in expired {
            self.purge(&key).await?;
            purged += 1;
        }

        let namespace = format!("{}:", self.inner.namespace);
        for raw in self.inner.storage.keys().await? {
            let Some(key) = raw.strip_prefix(&namespace) else {
                continue;
            };
            if let Some(entry) = self.load_durable(key).await?
                && entry.is_expired_at(now)
            {
                self.purge(key).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Run [`purge_expired()`](Self::purge_expired) every `every`.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                match (StateStore { inner }).purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "expired state swept"),
                    Err(e) => warn!(error = %e, "expired state sweep failed"),
                }
            }
        })
    }

    fn validate(&self, key: &str, value: &Value) -> Result<()> {
        let validator = self
            .inner
            .validators
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, v)| v.as_ref());
        let outcome = match validator {
            Some(v) => v.validate(value),
            None => NotNull.validate(value),
        };
        outcome.map_err(|reason| KeepsakeError::Validation {
            key: key.to_string(),
            reason,
        })
    }

    async fn load_durable(&self, key: &str) -> Result<Option<StateEntry>> {
        let Some(raw) = self.inner.storage.get(&self.storage_key(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<StateEntry>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key, storage = self.inner.storage.name(), error = %e, "corrupt state record ignored");
                Ok(None)
            }
        }
    }

    /// Drop an expired entry. Subscribers are not notified.
    async fn purge(&self, key: &str) -> Result<()> {
        self.inner.storage.remove(&self.storage_key(key)).await?;
        lock(&self.inner.memory).remove(key);
        metrics::counter!(telemetry::STATE_EXPIRED_TOTAL).increment(1);
        debug!(key, "expired state purged");
        Ok(())
    }

    fn publish(&self, change: StateChange) {
        self.dispatch(&change);
        if let Some(notifier) = &self.inner.notifier {
            notifier.publish(&change);
        }
    }

    /// Call local subscribers of `change.key`, outside the registry lock.
    fn dispatch(&self, change: &StateChange) {
        let callbacks: Vec<Callback> = lock(&self.inner.subscribers)
            .iter()
            .filter(|s| s.key == change.key)
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in callbacks {
            callback(change);
        }
    }
}
