//! Named distributed locks on top of a versioned document store.
//!
//! A lock is a document whose creation is the only point of contention: the store's
//! create-if-absent decides who holds it, the version token returned by every write
//! guards renewals, and an expiration timestamp lets waiters reclaim locks whose
//! holder went away.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use doc_lock::{Locker, MemoryStore};
//!
//! # async fn run() -> Result<(), doc_lock::LockError> {
//! let locker = Locker::new(Arc::new(MemoryStore::new()));
//!
//! let mut guard = locker
//!     .acquire("nightly-report", Duration::from_secs(5), Duration::from_secs(30))
//!     .await?;
//! guard.renew(Duration::from_secs(30)).await?;
//! guard.release().await;
//! # Ok(())
//! # }
//! ```

pub mod lock;
pub mod store;
pub mod util;

pub use lock::{
    config::LockerConfig, guard::LockGuard, locker::Locker, LockDocument, LockState,
};
pub use store::{DynamoConfig, DynamoStore, LockStore, MemoryStore};
pub use util::exception::{LockError, StoreError};
