use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::options::{Identity, SaveOverrides, TemporalOptions};
use super::{ExportMetadata, ExportSnapshot, Status, TemporalEvent, TemporalState};
use crate::state::{SetOptions, StateChange, StateEntry, StateStore, SubscriptionId};
use crate::{KeepsakeError, Result, lock, telemetry};

/// Number of undelivered events kept per receiver.
const EVENT_CAPACITY: usize = 64;

/// Added to the expiry wait so the wall clock has passed `expires_at` when
/// the watcher wakes.
const EXPIRY_SLACK: Duration = Duration::from_millis(10);

/// Mutable controller state. Never held across an await.
struct Local<T> {
    data: Option<T>,
    is_loading: bool,
    saves_in_flight: u32,
    last_saved: Option<DateTime<Utc>>,
    is_persistent: bool,
    expires_in: Option<Duration>,
    expires_at: Option<DateTime<Utc>>,
    dirty: bool,
    /// Bumped on every change to `data`; lets a finishing save tell whether
    /// edits arrived while it was in flight.
    revision: u64,
    /// Set while our own `remove_state` runs so its echo is not taken as
    /// an external removal.
    removing: bool,
    last_error: Option<String>,
}

struct Shared<T> {
    key: String,
    store: StateStore,
    identity: Option<Identity>,
    options: TemporalOptions,
    initial: Option<T>,
    local: Mutex<Local<T>>,
    events: broadcast::Sender<TemporalEvent>,
    subscription: Mutex<Option<SubscriptionId>>,
    autosave: Mutex<Option<JoinHandle<()>>>,
    expiry_watch: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Shared<T> {
    fn release(&self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.store.unsubscribe(id);
        }
        abort(&self.autosave);
        abort(&self.expiry_watch);
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.release();
    }
}

fn abort(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(task) = lock(slot).take() {
        task.abort();
    }
}

/// Controller for one key of application state.
///
/// Cheap to clone; clones drive the same controller. Background tasks
/// (autosave timer, expiry watcher) hold only weak references, so dropping
/// the last handle unsubscribes from the store and cancels them.
///
/// ```rust
/// # use keepsake::{Identity, StateStore, TemporalController, TemporalOptions};
/// # use serde_json::json;
/// # #[tokio::main]
/// # async fn main() -> keepsake::Result<()> {
/// let store = StateStore::builder().build();
/// let prefs = TemporalController::open(
///     store,
///     "prefs:u1",
///     Some(json!({})),
///     TemporalOptions::user_preferences().auto_save(false),
///     Some(Identity::new("u1")),
/// )
/// .await?;
///
/// prefs.set_data(json!({"theme": "dark"}));
/// assert!(prefs.can_save());
/// prefs.save_data(None).await?;
/// assert!(!prefs.state().has_unsaved_changes);
/// # Ok(())
/// # }
/// ```
pub struct TemporalController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TemporalController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> TemporalController<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a controller for `key`, subscribe to its changes and load it.
    ///
    /// `initial` is used when the store holds nothing for the key.
    /// Without an `identity` the controller can read and edit but every save
    /// fails with [`KeepsakeError::AuthRequired`].
    pub async fn open(
        store: StateStore,
        key: impl Into<String>,
        initial: Option<T>,
        options: TemporalOptions,
        identity: Option<Identity>,
    ) -> Result<Self> {
        let key = key.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let local = Local {
            data: initial.clone(),
            is_loading: true,
            saves_in_flight: 0,
            last_saved: None,
            is_persistent: options.persistent,
            expires_in: options.expires_in,
            expires_at: None,
            dirty: false,
            revision: 0,
            removing: false,
            last_error: None,
        };
        let controller = Self {
            shared: Arc::new(Shared {
                key: key.clone(),
                store: store.clone(),
                identity,
                options,
                initial,
                local: Mutex::new(local),
                events,
                subscription: Mutex::default(),
                autosave: Mutex::default(),
                expiry_watch: Mutex::default(),
            }),
        };

        let weak = Arc::downgrade(&controller.shared);
        let id = store
            .subscribe(
                &key,
                move |change| {
                    if let Some(shared) = weak.upgrade() {
                        TemporalController { shared }.on_store_change(change);
                    }
                },
                false,
            )
            .await?;
        *lock(&controller.shared.subscription) = Some(id);

        controller.load().await?;
        Ok(controller)
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Receiver for user-visible notifications.
    pub fn events(&self) -> broadcast::Receiver<TemporalEvent> {
        self.shared.events.subscribe()
    }

    /// (Re)load from the store, discarding unsaved local edits.
    pub async fn load(&self) -> Result<()> {
        lock(&self.shared.local).is_loading = true;
        let result = self.read_entry().await;

        let mut local = lock(&self.shared.local);
        local.is_loading = false;
        match result {
            Ok(Some((data, entry))) => {
                local.data = data;
                local.last_saved = Some(entry.saved_at);
                local.is_persistent = entry.persistent;
                local.expires_at = entry.expires_at;
                local.dirty = false;
                local.revision += 1;
                local.last_error = None;
                drop(local);
                self.watch_expiry(entry.expires_at);
                Ok(())
            }
            Ok(None) => {
                local.data = self.shared.initial.clone();
                local.last_saved = None;
                local.expires_at = None;
                local.dirty = false;
                local.revision += 1;
                Ok(())
            }
            Err(e) => {
                warn!(key = %self.shared.key, error = %e, "load failed");
                local.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn read_entry(&self) -> Result<Option<(Option<T>, StateEntry)>> {
        let Some(entry) = self.shared.store.get_entry(&self.shared.key).await? else {
            return Ok(None);
        };
        let data = decode(&entry.value)?;
        Ok(Some((data, entry)))
    }

    // ===== Local mutation =====

    /// Replace local data and mark it unsaved. No I/O.
    pub fn set_data(&self, value: T) {
        self.mutate(|local| local.data = Some(value));
    }

    /// Transform local data and mark it unsaved. No I/O.
    ///
    /// `f` runs under the controller lock and must not call back into the
    /// controller.
    pub fn update_data(&self, f: impl FnOnce(Option<T>) -> Option<T>) {
        self.mutate(|local| local.data = f(local.data.take()));
    }

    /// Choose the persistence mode for the next save.
    pub fn set_persistence(&self, persistent: bool) {
        self.mutate(|local| local.is_persistent = persistent);
    }

    /// Choose the expiry applied by the next save (`None`: no expiry).
    pub fn set_expiration(&self, expires_in: Option<Duration>) {
        self.mutate(|local| local.expires_in = expires_in);
    }

    /// Adopt imported data as an unsaved local change.
    pub fn import_data(&self, snapshot: ExportSnapshot<T>) {
        self.mutate(|local| local.data = Some(snapshot.data));
        self.emit(TemporalEvent::Imported);
    }

    fn mutate(&self, apply: impl FnOnce(&mut Local<T>)) {
        {
            let mut local = lock(&self.shared.local);
            apply(&mut local);
            local.dirty = true;
            local.revision += 1;
        }
        if self.shared.options.auto_save {
            self.schedule_autosave();
        }
    }

    // ===== Persistence =====

    /// Write local data to the store.
    ///
    /// Fails with `AuthRequired` when the controller has no identity. On
    /// any failure the unsaved flag stays set, the error is recorded in
    /// [`TemporalState::last_error`] and a `SaveFailed` event is emitted.
    pub async fn save_data(&self, overrides: Option<SaveOverrides>) -> Result<()> {
        let Some(identity) = self.shared.identity.clone() else {
            let err = KeepsakeError::AuthRequired(self.shared.key.clone());
            self.record_failure(&err);
            return Err(err);
        };
        let overrides = overrides.unwrap_or_default();
        let (data, revision, persistent, expires_in) = {
            let mut local = lock(&self.shared.local);
            local.saves_in_flight += 1;
            (
                local.data.clone(),
                local.revision,
                overrides.persistent.unwrap_or(local.is_persistent),
                overrides.expires_in.unwrap_or(local.expires_in),
            )
        };

        match self.write(identity, data, persistent, expires_in).await {
            Ok(entry) => {
                {
                    let mut local = lock(&self.shared.local);
                    local.saves_in_flight = local.saves_in_flight.saturating_sub(1);
                    local.last_saved = Some(entry.saved_at);
                    local.is_persistent = entry.persistent;
                    local.expires_at = entry.expires_at;
                    local.last_error = None;
                    if local.revision == revision {
                        local.dirty = false;
                    }
                }
                metrics::counter!(telemetry::SAVES_TOTAL).increment(1);
                debug!(key = %self.shared.key, persistent = entry.persistent, "saved");
                self.watch_expiry(entry.expires_at);
                self.emit(TemporalEvent::Saved { at: entry.saved_at });
                Ok(())
            }
            Err(e) => {
                {
                    let mut local = lock(&self.shared.local);
                    local.saves_in_flight = local.saves_in_flight.saturating_sub(1);
                }
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn write(
        &self,
        identity: Identity,
        data: Option<T>,
        persistent: bool,
        expires_in: Option<Duration>,
    ) -> Result<StateEntry> {
        let value = serde_json::to_value(&data)?;
        let expires_at = expires_in.map(expiry_from_now).transpose()?;
        let options = SetOptions::new()
            .persistent(persistent)
            .expires_at(expires_at)
            .validate(self.shared.options.validate)
            .user(identity.user_id)
            .role(identity.role)
            .metadata("auto_save", self.shared.options.auto_save)
            .metadata("backup", self.shared.options.backup);

        // The write runs in its own task: a timeout stops waiting for it but
        // never cancels it halfway through the store.
        let store = self.shared.store.clone();
        let key = self.shared.key.clone();
        let write = tokio::spawn(async move { store.set_state(&key, value, options).await });
        let timeout = self.shared.options.save_timeout;
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(KeepsakeError::Storage(format!("save task failed: {e}"))),
            Err(_) => Err(KeepsakeError::Timeout(timeout)),
        }
    }

    fn record_failure(&self, err: &KeepsakeError) {
        let message = err.user_message();
        lock(&self.shared.local).last_error = Some(message.clone());
        metrics::counter!(telemetry::SAVE_FAILURES_TOTAL).increment(1);
        warn!(key = %self.shared.key, error = %err, "save failed");
        self.emit(TemporalEvent::SaveFailed { message });
    }

    /// Remove the key from the store and clear local data.
    pub async fn delete_data(&self) -> Result<()> {
        abort(&self.shared.autosave);
        abort(&self.shared.expiry_watch);
        let owner = self.shared.identity.as_ref().map(|i| i.user_id.as_str());
        lock(&self.shared.local).removing = true;
        let removed = self.shared.store.remove_state(&self.shared.key, owner).await;
        lock(&self.shared.local).removing = false;
        if let Err(e) = removed {
            warn!(key = %self.shared.key, error = %e, "delete failed");
            lock(&self.shared.local).last_error = Some(e.user_message());
            return Err(e);
        }
        {
            let mut local = lock(&self.shared.local);
            local.data = None;
            local.last_saved = None;
            local.expires_at = None;
            local.dirty = false;
            local.revision += 1;
            local.last_error = None;
        }
        self.emit(TemporalEvent::Deleted);
        Ok(())
    }

    /// Snapshot of the current data, or `None` when there is none.
    pub fn export_data(&self) -> Option<ExportSnapshot<T>> {
        let local = lock(&self.shared.local);
        let data = local.data.clone()?;
        Some(ExportSnapshot {
            data,
            metadata: ExportMetadata {
                key: self.shared.key.clone(),
                last_saved: local.last_saved,
                is_persistent: local.is_persistent,
                expires_at: local.expires_at,
                exported_at: Utc::now(),
                user_id: self.shared.identity.as_ref().map(|i| i.user_id.clone()),
            },
        })
    }

    // ===== Timers =====

    /// Restart the debounce timer. The save itself runs detached so a later
    /// reschedule cannot cancel it midway.
    fn schedule_autosave(&self) {
        let Ok(runtime) = Handle::try_current() else {
            debug!(key = %self.shared.key, "no runtime, autosave not scheduled");
            return;
        };
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.options.auto_save_delay;
        let mut deadline = Instant::now() + delay;
        let timer = runtime.spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(shared) = weak.upgrade() else { return };
                let controller = TemporalController { shared };
                let (dirty, saving) = {
                    let local = lock(&controller.shared.local);
                    (local.dirty, local.saves_in_flight > 0)
                };
                if !dirty {
                    return;
                }
                if saving {
                    deadline = Instant::now() + delay;
                    continue;
                }
                tokio::spawn(async move {
                    if let Err(e) = controller.save_data(None).await {
                        debug!(key = %controller.shared.key, error = %e, "autosave failed");
                    }
                });
                return;
            }
        });
        if let Some(previous) = lock(&self.shared.autosave).replace(timer) {
            previous.abort();
        }
    }

    fn watch_expiry(&self, expires_at: Option<DateTime<Utc>>) {
        abort(&self.shared.expiry_watch);
        let Some(at) = expires_at else { return };
        let Ok(runtime) = Handle::try_current() else { return };
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak = Arc::downgrade(&self.shared);
        let watcher = runtime.spawn(async move {
            tokio::time::sleep(wait + EXPIRY_SLACK).await;
            let Some(shared) = weak.upgrade() else { return };
            let controller = TemporalController { shared };
            // Reading purges the expired entry from the store.
            if let Err(e) = controller.shared.store.get_entry(&controller.shared.key).await {
                warn!(key = %controller.shared.key, error = %e, "expiry check failed");
            }
            controller.check_expiration();
        });
        *lock(&self.shared.expiry_watch) = Some(watcher);
    }

    /// Apply an elapsed expiry to local state.
    ///
    /// Saved data is dropped; unsaved local edits are kept so the user can
    /// save them again. Returns whether the expiry had elapsed.
    pub fn check_expiration(&self) -> bool {
        {
            let mut local = lock(&self.shared.local);
            if !local.expires_at.is_some_and(|at| Utc::now() > at) {
                return false;
            }
            local.expires_at = None;
            local.last_saved = None;
            if !local.dirty {
                local.data = None;
                local.revision += 1;
            }
        }
        debug!(key = %self.shared.key, "saved data expired");
        self.emit(TemporalEvent::Expired);
        true
    }

    // ===== Store notifications =====

    fn on_store_change(&self, change: &StateChange) {
        let own = self.shared.identity.as_ref().map(|i| i.user_id.as_str());
        if change.user_id.is_some() && change.user_id.as_deref() == own {
            return;
        }
        if change.new_value.is_none() && lock(&self.shared.local).removing {
            return;
        }

        let data = match &change.new_value {
            Some(value) => match decode::<T>(value) {
                Ok(data) => data,
                Err(e) => {
                    warn!(key = %change.key, error = %e, "undecodable external change ignored");
                    return;
                }
            },
            None => None,
        };

        abort(&self.shared.autosave);
        {
            let mut local = lock(&self.shared.local);
            local.data = data;
            local.dirty = false;
            local.revision += 1;
            local.last_error = None;
            local.last_saved = change.new_value.as_ref().map(|_| change.timestamp);
            local.expires_at = change.expires_at;
            if change.new_value.is_some() {
                local.is_persistent = change.persistent;
            }
        }
        // The previous writer's expiry no longer applies.
        self.watch_expiry(change.expires_at);
        debug!(key = %change.key, from = ?change.user_id, "external change applied");
        self.emit(TemporalEvent::ExternalUpdate {
            user_id: change.user_id.clone(),
            removed: change.new_value.is_none(),
        });
    }

    fn emit(&self, event: TemporalEvent) {
        // Nobody listening is fine.
        let _ = self.shared.events.send(event);
    }

    // ===== Accessors =====

    pub fn state(&self) -> TemporalState<T> {
        let local = lock(&self.shared.local);
        TemporalState {
            data: local.data.clone(),
            is_loading: local.is_loading,
            is_saving: local.saves_in_flight > 0,
            last_saved: local.last_saved,
            is_persistent: local.is_persistent,
            expires_at: local.expires_at,
            has_unsaved_changes: local.dirty,
            last_error: local.last_error.clone(),
        }
    }

    pub fn status(&self) -> Status {
        let local = lock(&self.shared.local);
        if local.is_loading {
            Status::Loading
        } else if local.saves_in_flight > 0 {
            Status::Saving
        } else if local.dirty {
            Status::Dirty
        } else {
            Status::Idle
        }
    }

    pub fn data(&self) -> Option<T> {
        lock(&self.shared.local).data.clone()
    }

    /// Unsaved changes exist and no save is in flight.
    pub fn can_save(&self) -> bool {
        let local = lock(&self.shared.local);
        local.dirty && local.saves_in_flight == 0
    }

    /// Time left before the saved entry expires; zero once it has.
    pub fn time_until_expiration(&self) -> Option<Duration> {
        lock(&self.shared.local)
            .expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_expired(&self) -> bool {
        lock(&self.shared.local)
            .expires_at
            .is_some_and(|at| Utc::now() > at)
    }

    /// Unsubscribe and cancel timers now rather than on drop.
    pub fn close(&self) {
        self.shared.release();
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value.clone())?))
}

fn expiry_from_now(expires_in: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(expires_in)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or_else(|| {
            KeepsakeError::InvalidInput(format!("expiry {expires_in:?} is out of range"))
        })
}
