use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

pub mod config;
pub mod guard;
pub mod locker;

/// The persisted record representing ownership of a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDocument {
    pub id: String,
    pub expiration: DateTime<Utc>,
}

impl LockDocument {
    /// Builds a document whose lease runs for `lifetime` starting now.
    pub fn new(id: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            id: id.into(),
            expiration: expires_after(lifetime),
        }
    }

    /// Not persisted; derived from the wall clock at the time of the call.
    pub fn expired(&self) -> bool {
        Utc::now() > self.expiration
    }
}

/// Lifecycle of a single lock handle.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState<V> {
    Acquiring,
    Held {
        version: V,
        expiration: DateTime<Utc>,
    },
    /// Terminal.
    Released,
}

impl<V> LockState<V> {
    pub fn is_held(&self) -> bool {
        matches!(self, LockState::Held { .. })
    }
}

pub(crate) fn expires_after(lifetime: Duration) -> DateTime<Utc> {
    // Out-of-range lifetimes saturate instead of overflowing the timestamp.
    ChronoDuration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
