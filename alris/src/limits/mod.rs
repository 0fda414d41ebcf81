//! Per-session message quota, persisted across runs.
//!
//! The quota is a soft UX guard, not a security control: 5 messages per
//! 5-hour window, with the window-expiry check running only when a chat
//! session initializes. Concurrent processes share the persisted file
//! last-writer-wins; there is no cross-process locking.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages allowed per quota window.
pub const MESSAGE_QUOTA: u32 = 5;

/// Hours in one quota window.
pub const WINDOW_HOURS: i64 = 5;

/// File name for persisted quota state inside the data directory.
const LIMITS_FILE: &str = "limits.json";

/// Length of the quota window.
pub fn window_duration() -> Duration {
    Duration::hours(WINDOW_HOURS)
}

/// Persisted quota state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLimits {
    /// Messages left in the current window.
    pub remaining: u32,
    /// When the quota was last reset.
    pub window_start: DateTime<Utc>,
}

impl StoredLimits {
    /// A freshly reset window starting at `now`.
    pub const fn full(now: DateTime<Utc>) -> Self {
        Self {
            remaining: MESSAGE_QUOTA,
            window_start: now,
        }
    }
}

/// Errors from the limit storage backend.
#[derive(Debug, Error)]
pub enum LimitStoreError {
    #[error("could not find home directory")]
    NoHome,

    #[error("failed to read limit state: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write limit state: {0}")]
    Write(#[source] std::io::Error),
}

/// Storage backend for the persisted quota scalars.
///
/// The default backend is a JSON file; tests use [`MemoryStorage`].
pub trait LimitStorage {
    /// Load the persisted state. `None` means uninitialized.
    fn load(&self) -> Result<Option<StoredLimits>, LimitStoreError>;

    /// Persist the state, overwriting any previous value.
    fn store(&mut self, limits: &StoredLimits) -> Result<(), LimitStoreError>;
}

/// JSON-file storage under the Alris data directory.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Open storage at the default location (`~/.alris/limits.json`),
    /// creating the data directory if needed.
    pub fn open() -> Result<Self, LimitStoreError> {
        let dir = dirs::home_dir()
            .ok_or(LimitStoreError::NoHome)?
            .join(crate::config::DATA_DIR);
        std::fs::create_dir_all(&dir).map_err(LimitStoreError::Write)?;
        Ok(Self::open_at(dir.join(LIMITS_FILE)))
    }

    /// Open storage at a specific path.
    pub const fn open_at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LimitStorage for FileStorage {
    fn load(&self) -> Result<Option<StoredLimits>, LimitStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LimitStoreError::Read(e)),
        };

        // A corrupt file is treated as uninitialized, like an absent cookie.
        match serde_json::from_str(&content) {
            Ok(limits) => Ok(Some(limits)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt limit state");
                Ok(None)
            }
        }
    }

    fn store(&mut self, limits: &StoredLimits) -> Result<(), LimitStoreError> {
        let json = serde_json::to_string(limits)
            .map_err(|e| LimitStoreError::Write(std::io::Error::other(e)))?;
        std::fs::write(&self.path, json).map_err(LimitStoreError::Write)
    }
}

/// In-memory storage, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    limits: Option<StoredLimits>,
}

impl LimitStorage for MemoryStorage {
    fn load(&self) -> Result<Option<StoredLimits>, LimitStoreError> {
        Ok(self.limits)
    }

    fn store(&mut self, limits: &StoredLimits) -> Result<(), LimitStoreError> {
        self.limits = Some(*limits);
        Ok(())
    }
}

/// Quota store: the cached state plus its storage backend.
pub struct LimitStore<S> {
    storage: S,
    limits: StoredLimits,
}

impl<S: LimitStorage> LimitStore<S> {
    /// Load persisted state, resetting to a full window on first-ever load
    /// or when the window has elapsed.
    ///
    /// This is the only place the expiry check runs; a window going stale
    /// mid-session is corrected the next time a session initializes.
    pub fn initialize(storage: S, now: DateTime<Utc>) -> Result<Self, LimitStoreError> {
        let limits = match storage.load()? {
            Some(limits) if now - limits.window_start < window_duration() => limits,
            Some(stale) => {
                tracing::debug!(
                    window_start = %stale.window_start,
                    "quota window elapsed, resetting"
                );
                StoredLimits::full(now)
            }
            None => StoredLimits::full(now),
        };

        let mut store = Self { storage, limits };
        store.persist();
        Ok(store)
    }

    /// Messages left in the current window.
    pub const fn remaining(&self) -> u32 {
        self.limits.remaining
    }

    /// When the current window started.
    pub const fn window_start(&self) -> DateTime<Utc> {
        self.limits.window_start
    }

    /// When the current window is due to reset.
    pub fn resets_at(&self) -> DateTime<Utc> {
        self.limits.window_start + window_duration()
    }

    /// Record one successfully completed request/response cycle and
    /// persist the new count, leaving the window start untouched.
    pub fn consume(&mut self) -> u32 {
        self.limits.remaining = self.limits.remaining.saturating_sub(1);
        self.persist();
        self.limits.remaining
    }

    /// Reset to a full quota window starting at `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.limits = StoredLimits::full(now);
        self.persist();
    }

    /// Access the storage backend.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    fn persist(&mut self) {
        // Quota persistence failures never fail the message cycle.
        if let Err(e) = self.storage.store(&self.limits) {
            tracing::warn!(error = %e, "failed to persist limit state");
        }
    }
}
