//! Per-key temporal data controllers.
//!
//! A [`TemporalController`] owns one piece of UI state (e.g. `class:123`)
//! and layers save-now / save-later / expire-automatically semantics on top
//! of a [`StateStore`](crate::StateStore):
//!
//! ```text
//! Loading ──load──▶ Idle ──set/update──▶ Dirty ──autosave/save──▶ Saving
//!                    ▲                     ▲                        │
//!                    └──────── ok ─────────┼────────────────────────┤
//!                                          └──────── error ─────────┘
//! ```
//!
//! A change to the key written by another owner replaces local data and
//! clears the dirty flag, whatever state the controller is in
//! (last-writer-wins). Deleting returns to `Idle` with no data.

mod controller;
mod options;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use controller::TemporalController;
pub use options::{
    DEFAULT_AUTO_SAVE_DELAY, DEFAULT_SAVE_TIMEOUT, Identity, SaveOverrides, TemporalOptions,
};

/// Lifecycle status of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    Idle,
    Dirty,
    Saving,
}

/// User-visible notifications emitted by a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TemporalEvent {
    Saved { at: DateTime<Utc> },
    SaveFailed { message: String },
    /// Another owner changed (or removed) the key; local data was replaced.
    ExternalUpdate {
        user_id: Option<String>,
        removed: bool,
    },
    Expired,
    Deleted,
    Imported,
}

/// Snapshot of a controller's observable state.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub is_persistent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_unsaved_changes: bool,
    pub last_error: Option<String>,
}

/// Portable copy of a controller's data, produced by
/// [`export_data()`](TemporalController::export_data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot<T> {
    pub data: T,
    pub metadata: ExportMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub key: String,
    pub last_saved: Option<DateTime<Utc>>,
    pub is_persistent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub exported_at: DateTime<Utc>,
    pub user_id: Option<String>,
}
