use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::{LockDocument, LockState};
use crate::{
    store::LockStore,
    util::exception::{LockError, StoreError},
};

/// A single named lock, owned by one caller.
///
/// Dropping a held guard deletes the lock document on the current tokio runtime.
/// Call [`LockGuard::release`] to wait for the delete to finish.
pub struct LockGuard<S: LockStore + 'static> {
    store: Arc<S>,
    name: String,
    id: String,
    state: LockState<S::Version>,
}

impl<S: LockStore + 'static> LockGuard<S> {
    pub(crate) fn new(store: Arc<S>, name: &str, id: String) -> Self {
        Self {
            store,
            name: name.to_string(),
            id,
            state: LockState::Acquiring,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &LockState<S::Version> {
        &self.state
    }

    pub fn is_held(&self) -> bool {
        self.state.is_held()
    }

    /// When the current lease runs out, if the lock is held.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            LockState::Held { expiration, .. } => Some(*expiration),
            _ => None,
        }
    }

    /// One create-if-absent attempt. `Ok(false)` means someone else holds the lock.
    pub(crate) async fn try_lock(&mut self, lifetime: Duration) -> Result<bool, LockError> {
        let candidate = LockDocument::new(self.id.clone(), lifetime);

        match self.store.insert_if_absent(&candidate).await {
            Ok(version) => {
                debug!(lock_id = %self.id, expiration = %candidate.expiration, "acquired lock");
                self.state = LockState::Held {
                    version,
                    expiration: candidate.expiration,
                };
                Ok(true)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(lock_id = %self.id, "lock already held");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Moves the expiration to `now + extend_by`.
    ///
    /// A version conflict means another party took the lock over; the guard is then
    /// released without touching the store and [`LockError::LockLost`] is returned.
    pub async fn renew(&mut self, extend_by: Duration) -> Result<(), LockError> {
        let current = match &self.state {
            LockState::Held { version, .. } => version.clone(),
            _ => return Err(LockError::NotHeld(self.name.clone())),
        };

        let renewed = LockDocument::new(self.id.clone(), extend_by);
        match self.store.conditional_replace(&renewed, &current).await {
            Ok(version) => {
                debug!(lock_id = %self.id, expiration = %renewed.expiration, "renewed lock");
                self.state = LockState::Held {
                    version,
                    expiration: renewed.expiration,
                };
                Ok(())
            }
            Err(StoreError::Conflict(_)) => {
                warn!(lock_id = %self.id, "lock was taken over before it could be renewed");
                self.state = LockState::Released;
                Err(LockError::LockLost(self.name.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the lock document if held. Idempotent, and never fails: a delete
    /// error is logged and the document is left to expire.
    pub async fn release(&mut self) {
        if self.state.is_held() {
            if let Err(err) = self.store.delete(&self.id).await {
                warn!(lock_id = %self.id, error = %err, "failed to release lock");
            } else {
                debug!(lock_id = %self.id, "released lock");
            }
        }
        self.state = LockState::Released;
    }
}

impl<S: LockStore + 'static> fmt::Debug for LockGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl<S: LockStore + 'static> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if !self.state.is_held() {
            return;
        }
        self.state = LockState::Released;

        let store = self.store.clone();
        let id = self.id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.delete(&id).await {
                        warn!(lock_id = %id, error = %err, "failed to release dropped lock");
                    } else {
                        debug!(lock_id = %id, "released dropped lock");
                    }
                });
            }
            Err(_) => {
                warn!(lock_id = %id, "no runtime to release dropped lock, leaving it to expire");
            }
        }
    }
}
