use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::Notify,
    time::{sleep, Instant},
};
use tracing::debug;

use super::{config::LockerConfig, guard::LockGuard};
use crate::{
    store::LockStore,
    util::exception::{LockError, StoreError},
};

/// Hands out named locks backed by a shared [`LockStore`].
///
/// A locker is cheap to clone; every acquisition produces its own [`LockGuard`],
/// which is the unit that owns a lock document.
pub struct Locker<S: LockStore + 'static> {
    store: Arc<S>,
    config: Arc<LockerConfig>,
}

impl<S: LockStore + 'static> Clone for Locker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: LockStore + 'static> Locker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, LockerConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: LockerConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    /// Document id used for the lock called `name`.
    pub fn lock_id(&self, name: &str) -> String {
        self.config.lock_id(name)
    }

    /// Acquires `name` with the configured default timeout and lifetime.
    pub async fn lock(&self, name: &str) -> Result<LockGuard<S>, LockError> {
        self.acquire(name, self.config.default_timeout, self.config.default_lifetime)
            .await
    }

    pub async fn lock_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<LockGuard<S>, LockError> {
        self.acquire(name, timeout, self.config.default_lifetime)
            .await
    }

    /// Polls until the lock document for `name` can be created, or fails with
    /// [`LockError::Timeout`] once `timeout` has elapsed.
    pub async fn acquire(
        &self,
        name: &str,
        timeout: Duration,
        lifetime: Duration,
    ) -> Result<LockGuard<S>, LockError> {
        self.wait_to_lock(name, timeout, lifetime, None).await
    }

    /// Like [`Locker::acquire`], but gives up with [`LockError::Cancelled`] when
    /// `shutdown` is notified. Use `notify_one` so a signal sent between polls is
    /// not missed.
    pub async fn acquire_until(
        &self,
        name: &str,
        timeout: Duration,
        lifetime: Duration,
        shutdown: &Notify,
    ) -> Result<LockGuard<S>, LockError> {
        self.wait_to_lock(name, timeout, lifetime, Some(shutdown))
            .await
    }

    /// A single attempt: no waiting and no reclaiming of expired locks.
    pub async fn try_acquire(
        &self,
        name: &str,
        lifetime: Duration,
    ) -> Result<Option<LockGuard<S>>, LockError> {
        let mut guard = LockGuard::new(self.store.clone(), name, self.lock_id(name));
        if guard.try_lock(lifetime).await? {
            Ok(Some(guard))
        } else {
            Ok(None)
        }
    }

    /// Runs `critical_section` while holding `name`, using the configured default
    /// timeout and lifetime, and releases the lock before returning its output.
    ///
    /// ```no_run
    /// # use std::time::Duration;
    /// # use doc_lock::{Locker, MemoryStore};
    /// # async fn run(locker: Locker<MemoryStore>) -> Result<(), doc_lock::LockError> {
    /// locker
    ///     .with_lock("nightly-report", |guard| {
    ///         Box::pin(async move { guard.renew(Duration::from_secs(60)).await })
    ///     })
    ///     .await??;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_lock<F, T>(&self, name: &str, critical_section: F) -> Result<T, LockError>
    where
        F: for<'g> FnOnce(&'g mut LockGuard<S>) -> BoxFuture<'g, T>,
    {
        self.with_lock_for(
            name,
            self.config.default_timeout,
            self.config.default_lifetime,
            critical_section,
        )
        .await
    }

    /// [`Locker::with_lock`] with an explicit timeout and lifetime.
    pub async fn with_lock_for<F, T>(
        &self,
        name: &str,
        timeout: Duration,
        lifetime: Duration,
        critical_section: F,
    ) -> Result<T, LockError>
    where
        F: for<'g> FnOnce(&'g mut LockGuard<S>) -> BoxFuture<'g, T>,
    {
        let mut guard = self.acquire(name, timeout, lifetime).await?;
        let output = critical_section(&mut guard).await;
        guard.release().await;
        Ok(output)
    }

    async fn wait_to_lock(
        &self,
        name: &str,
        timeout: Duration,
        lifetime: Duration,
        shutdown: Option<&Notify>,
    ) -> Result<LockGuard<S>, LockError> {
        let started = Instant::now();
        let mut guard = LockGuard::new(self.store.clone(), name, self.lock_id(name));
        let mut attempt: u64 = 0;

        loop {
            if started.elapsed() > timeout {
                debug!(lock_id = %guard.id(), attempts = attempt, "timed out waiting for lock");
                return Err(LockError::Timeout(name.to_string()));
            }

            attempt += 1;
            if guard.try_lock(lifetime).await? {
                return Ok(guard);
            }

            if attempt % u64::from(self.config.probe_every.max(1)) == 0 {
                self.remove_expired_lock(guard.id()).await?;
            }

            if self.wait(shutdown).await {
                debug!(lock_id = %guard.id(), "lock acquisition cancelled");
                return Err(LockError::Cancelled(name.to_string()));
            }
        }
    }

    /// Deletes the current holder's document if its lease has run out. The delete
    /// may race with other waiters doing the same, so its outcome is ignored.
    async fn remove_expired_lock(&self, id: &str) -> Result<(), StoreError> {
        match self.store.get(id).await? {
            Some(existing) if existing.expired() => match self.store.delete(id).await {
                Ok(()) => debug!(lock_id = %id, "removed expired lock"),
                Err(err) => debug!(lock_id = %id, error = %err, "expired lock already gone"),
            },
            _ => {}
        }
        Ok(())
    }

    /// Sleeps one tick. Returns `true` if `shutdown` fired first.
    async fn wait(&self, shutdown: Option<&Notify>) -> bool {
        match shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = shutdown.notified() => true,
                    _ = sleep(self.config.tick) => false,
                }
            }
            None => {
                sleep(self.config.tick).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{lock::LockDocument, store::MemoryStore};

    /// Counts the reads and inserts that reach the wrapped store.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        inserts: AtomicUsize,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl LockStore for CountingStore {
        type Version = u64;

        async fn insert_if_absent(&self, doc: &LockDocument) -> Result<u64, StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert_if_absent(doc).await
        }

        async fn conditional_replace(
            &self,
            doc: &LockDocument,
            expected: &u64,
        ) -> Result<u64, StoreError> {
            self.inner.conditional_replace(doc, expected).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }

        async fn get(&self, id: &str) -> Result<Option<LockDocument>, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(id).await
        }
    }

    /// Fails every write as if the backend were unreachable.
    struct UnavailableStore;

    #[async_trait]
    impl LockStore for UnavailableStore {
        type Version = u64;

        async fn insert_if_absent(&self, _doc: &LockDocument) -> Result<u64, StoreError> {
            Err(StoreError::NonRetryable("connection refused".to_string()))
        }

        async fn conditional_replace(
            &self,
            _doc: &LockDocument,
            _expected: &u64,
        ) -> Result<u64, StoreError> {
            Err(StoreError::NonRetryable("connection refused".to_string()))
        }

        async fn delete(&self, _id: &str) -> Result<(), StoreError> {
            Err(StoreError::NonRetryable("connection refused".to_string()))
        }

        async fn get(&self, _id: &str) -> Result<Option<LockDocument>, StoreError> {
            Err(StoreError::NonRetryable("connection refused".to_string()))
        }
    }

    /// Never removes anything; every delete reports the document as already gone,
    /// as if another waiter had reclaimed it first.
    #[derive(Default)]
    struct LosingReclaimStore {
        inner: MemoryStore,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl LockStore for LosingReclaimStore {
        type Version = u64;

        async fn insert_if_absent(&self, doc: &LockDocument) -> Result<u64, StoreError> {
            self.inner.insert_if_absent(doc).await
        }

        async fn conditional_replace(
            &self,
            doc: &LockDocument,
            expected: &u64,
        ) -> Result<u64, StoreError> {
            self.inner.conditional_replace(doc, expected).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn get(&self, id: &str) -> Result<Option<LockDocument>, StoreError> {
            self.inner.get(id).await
        }
    }

    fn fast_config() -> LockerConfig {
        LockerConfig::default().with_tick(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn checks_for_expiry_on_every_third_conflict() {
        let store = Arc::new(CountingStore::default());
        let locker = Locker::with_config(store.clone(), fast_config());
        let _holder = locker
            .acquire("a", Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();
        let holder_inserts = store.inserts.load(Ordering::SeqCst);

        let err = locker
            .acquire("a", Duration::from_millis(150), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout(_)));

        let attempts = store.inserts.load(Ordering::SeqCst) - holder_inserts;
        assert!(attempts >= 3);
        assert_eq!(store.gets.load(Ordering::SeqCst), attempts / 3);
    }

    #[tokio::test]
    async fn expiry_check_cadence_is_tunable() {
        let store = Arc::new(CountingStore::default());
        let locker = Locker::with_config(store.clone(), fast_config().with_probe_every(1));
        let _holder = locker
            .acquire("a", Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();
        let holder_inserts = store.inserts.load(Ordering::SeqCst);

        locker
            .acquire("a", Duration::from_millis(80), Duration::from_secs(60))
            .await
            .unwrap_err();

        let attempts = store.inserts.load(Ordering::SeqCst) - holder_inserts;
        assert_eq!(store.gets.load(Ordering::SeqCst), attempts);
    }

    #[tokio::test]
    async fn store_errors_are_not_retried() {
        let locker = Locker::with_config(Arc::new(UnavailableStore), fast_config());

        let err = locker
            .acquire("a", Duration::from_secs(5), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Store(StoreError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn try_acquire_does_not_wait() {
        let locker = Locker::with_config(Arc::new(MemoryStore::new()), fast_config());

        let first = locker.try_acquire("a", Duration::from_secs(60)).await.unwrap();
        assert!(first.is_some());
        assert!(locker.try_acquire("a", Duration::from_secs(60)).await.unwrap().is_none());
        assert!(locker.try_acquire("b", Duration::from_secs(60)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lost_reclaim_race_keeps_waiting_until_timeout() {
        let store = Arc::new(LosingReclaimStore::default());
        store
            .inner
            .insert_if_absent(&LockDocument::new("Locks/a", Duration::from_millis(0)))
            .await
            .unwrap();
        let locker = Locker::with_config(store.clone(), fast_config());

        let started = Instant::now();
        let err = locker
            .acquire("a", Duration::from_millis(150), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(store.deletes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn scoped_section_can_renew_its_lock() {
        let locker = Locker::with_config(Arc::new(MemoryStore::new()), fast_config());

        let expirations = locker
            .with_lock_for(
                "a",
                Duration::from_secs(1),
                Duration::from_millis(100),
                |guard| {
                    Box::pin(async move {
                        let before = guard.expiration();
                        guard.renew(Duration::from_secs(60)).await.unwrap();
                        (before, guard.expiration())
                    })
                },
            )
            .await
            .unwrap();

        assert!(expirations.1 > expirations.0);
        assert!(locker.store().is_empty().await);
    }
}
