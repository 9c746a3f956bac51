/**
 * Distributed Lease Locks
 *
 * Mutual exclusion between processes for one named resource at a time,
 * used for the per-document commit lock and the materialization lock.
 *
 * # Leases
 *
 * A lock is a lease: it carries a holder id and an expiry. A holder that
 * crashes without releasing blocks the resource only until the lease runs
 * out. Release only succeeds for the current holder, so a holder whose lease
 * expired and was taken over cannot release the new holder's lock.
 *
 * # Layers
 *
 * - `LockService` - the shared store of leases (`InMemoryLockService`,
 *   `PgLockService`)
 * - `DistributedMutex` - one named lock with a lease and a wait budget
 * - `LockGuard` - proof of ownership; released explicitly or on drop
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backend::error::{BackendError, BackendResult};

/// Initial pause between acquisition attempts
const RETRY_DELAY_MIN: Duration = Duration::from_millis(10);
/// Upper bound of the pause between acquisition attempts
const RETRY_DELAY_MAX: Duration = Duration::from_millis(200);

/// Shared store of named leases
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lease for `holder` if it is free or expired
    ///
    /// Returns `true` when `holder` owns the lease afterwards.
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> BackendResult<bool>;

    /// Give the lease back; returns `false` if `holder` no longer owned it
    async fn release(&self, name: &str, holder: &str) -> BackendResult<bool>;
}

/// Shared handle to a lock service
pub type SharedLocks = Arc<dyn LockService>;

#[derive(Debug, Clone)]
struct LeaseEntry {
    holder: String,
    deadline: Instant,
}

impl LeaseEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Lease store for a single process
#[derive(Default)]
pub struct InMemoryLockService {
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of a lease, if it is live
    pub fn holder(&self, name: &str) -> Option<String> {
        let leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        leases
            .get(name)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.holder.clone())
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> BackendResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match leases.get(name) {
            Some(entry) if !entry.is_expired(now) && entry.holder != holder => Ok(false),
            _ => {
                leases.insert(
                    name.to_string(),
                    LeaseEntry {
                        holder: holder.to_string(),
                        deadline: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str, holder: &str) -> BackendResult<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match leases.get(name) {
            Some(entry) if entry.holder == holder => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// A named lock with a lease duration and a wait budget
///
/// # Example
///
/// ```rust,ignore
/// let mutex = DistributedMutex::new(locks, keys::op_mutex("d1"), Duration::from_secs(10))
///     .with_wait(Duration::from_secs(3));
/// let guard = mutex.lock().await?;
/// // ... critical section ...
/// guard.release().await;
/// ```
#[derive(Clone)]
pub struct DistributedMutex {
    service: SharedLocks,
    name: String,
    ttl: Duration,
    wait: Duration,
}

impl DistributedMutex {
    pub fn new(service: SharedLocks, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            service,
            name: name.into(),
            ttl,
            wait: ttl,
        }
    }

    /// Set how long `lock` keeps trying
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire without waiting; `None` if someone else holds the lease
    pub async fn try_lock(&self) -> BackendResult<Option<LockGuard>> {
        let holder = Uuid::new_v4().to_string();
        if self.service.try_acquire(&self.name, &holder, self.ttl).await? {
            Ok(Some(LockGuard::new(self.service.clone(), self.name.clone(), holder)))
        } else {
            Ok(None)
        }
    }

    /// Acquire, retrying until the wait budget is spent
    ///
    /// # Errors
    ///
    /// `BackendError::LockUnavailable` when the budget runs out, or the
    /// lock service's own error.
    pub async fn lock(&self) -> BackendResult<LockGuard> {
        let holder = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.wait;
        let mut delay = RETRY_DELAY_MIN;

        loop {
            if self.service.try_acquire(&self.name, &holder, self.ttl).await? {
                return Ok(LockGuard::new(self.service.clone(), self.name.clone(), holder));
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock = %self.name, "lock wait budget exhausted");
                return Err(BackendError::lock_unavailable(self.name.clone()));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(RETRY_DELAY_MAX);
        }
    }
}

/// Ownership of a lease
///
/// Call `release` when done. A guard dropped without `release` gives the
/// lease back from a spawned task.
pub struct LockGuard {
    service: SharedLocks,
    name: String,
    holder: String,
    released: bool,
}

impl LockGuard {
    fn new(service: SharedLocks, name: String, holder: String) -> Self {
        Self {
            service,
            name,
            holder,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lease
    ///
    /// Failures are logged; the lease then ends by expiry.
    pub async fn release(mut self) {
        self.released = true;
        match self.service.release(&self.name, &self.holder).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(lock = %self.name, "lease expired before release");
            }
            Err(err) => {
                tracing::error!(lock = %self.name, error = %err, "failed to release lock");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let service = self.service.clone();
        let name = std::mem::take(&mut self.name);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = service.release(&name, &holder).await {
                        tracing::error!(lock = %name, error = %err, "failed to release dropped lock");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock = %name, "lock dropped outside a runtime, left to expire");
            }
        }
    }
}
