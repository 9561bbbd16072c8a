use std::time::Duration;

/// Tunables for the acquisition loop and the defaults used by the short-hand
/// `lock` calls.
#[derive(Debug, Clone)]
pub struct LockerConfig {
    /// Prefix joined with the lock name to form the document id.
    pub namespace: String,
    /// Fixed polling interval between contended attempts.
    pub tick: Duration,
    /// Every `probe_every`-th conflict reads the current holder and reclaims it if expired.
    pub probe_every: u32,
    pub default_timeout: Duration,
    pub default_lifetime: Duration,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            namespace: "Locks/".to_string(),
            tick: Duration::from_millis(50),
            probe_every: 3,
            default_timeout: Duration::from_secs(30),
            default_lifetime: Duration::from_secs(60),
        }
    }
}

impl LockerConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Zero is treated as one, i.e. look for an expired lock on every conflict.
    pub fn with_probe_every(mut self, probe_every: u32) -> Self {
        self.probe_every = probe_every.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub(crate) fn lock_id(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }
}
