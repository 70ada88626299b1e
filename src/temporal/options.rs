//! Controller options and the per-concern presets.

use std::time::Duration;

/// Debounce window between the last mutation and the autosave.
pub const DEFAULT_AUTO_SAVE_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on one save before it is reported as timed out.
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Behaviour of one [`TemporalController`](super::TemporalController).
///
/// The presets differ only in these defaults:
///
/// ```rust
/// # use keepsake::TemporalOptions;
/// # use std::time::Duration;
/// let draft = TemporalOptions::draft();
/// assert!(!draft.persistent);
/// assert!(draft.auto_save);
/// assert_eq!(draft.expires_in, Some(Duration::from_secs(3600)));
/// ```
#[derive(Debug, Clone)]
pub struct TemporalOptions {
    /// Durable (`true`) or memory-only saves.
    pub persistent: bool,
    /// Saved entries expire this long after each save.
    pub expires_in: Option<Duration>,
    /// Save automatically after mutations settle.
    pub auto_save: bool,
    /// Debounce window for autosave. Default: 2s.
    pub auto_save_delay: Duration,
    /// Ask the store to validate values before writing.
    pub validate: bool,
    /// Recorded in entry metadata for consumers that keep backups.
    pub backup: bool,
    /// Saves that take longer fail with `Timeout`. Default: 30s.
    pub save_timeout: Duration,
}

impl Default for TemporalOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            expires_in: None,
            auto_save: false,
            auto_save_delay: DEFAULT_AUTO_SAVE_DELAY,
            validate: false,
            backup: false,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
        }
    }
}

impl TemporalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class records: durable, validated, backed up.
    pub fn class_record() -> Self {
        Self::new().persistent(true).validate(true).backup(true)
    }

    /// Assignments: durable, validated, autosaved.
    pub fn assignment() -> Self {
        Self::new().persistent(true).validate(true).auto_save(true)
    }

    /// User preferences: durable, autosaved. Open with `{}` as initial data.
    pub fn user_preferences() -> Self {
        Self::new().persistent(true).auto_save(true)
    }

    /// Drafts: memory-only, autosaved, expire after an hour.
    pub fn draft() -> Self {
        Self::new()
            .auto_save(true)
            .expires_in(Some(Duration::from_secs(60 * 60)))
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn expires_in(mut self, expires_in: Option<Duration>) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn auto_save_delay(mut self, delay: Duration) -> Self {
        self.auto_save_delay = delay;
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }
}

/// Per-call overrides for [`save_data()`](super::TemporalController::save_data).
#[derive(Debug, Clone, Default)]
pub struct SaveOverrides {
    pub persistent: Option<bool>,
    /// `Some(None)` saves without expiry regardless of the controller setting.
    pub expires_in: Option<Option<Duration>>,
}

/// Owner identity attached to saves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}
