//! Distributed lock manager.
//!
//! Leases live in the shared store as a hash `{owner, count}` with a TTL. The
//! hold-count makes the lock reentrant per [`LockOwner`] rather than per thread,
//! so nested acquisitions from the same logical flow (even across tasks)
//! succeed and only the outermost release deletes the lease.
//!
//! Every [`LockHandle`] owns a renewal task that re-applies the lease every
//! `lease / 3`. The task is aborted when the handle is released or dropped, so
//! an error path or a panic in the holder never leaves a lease renewed forever;
//! the lease then lapses on its own TTL.
//!
//! # Deadlocks
//!
//! [`LockManager::acquire_many`] deduplicates and sorts resource keys before
//! acquiring them, so two callers locking overlapping sets always contend in the
//! same order. Any failure releases what was already taken.

use crate::metrics::LockMetrics;
use flashsale_core::error::Result;
use flashsale_core::keys::KeySpace;
use flashsale_core::script;
use flashsale_core::store::SharedStore;
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

/// Lock manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Base pause between acquisition attempts
    pub retry_interval: Duration,
    /// Upper bound of the random extra pause added to each retry
    pub retry_jitter: Duration,
    /// Wait budget used by [`LockManager::with_lock`] callers that take defaults
    pub default_wait: Duration,
    /// Lease used when callers take defaults
    pub default_lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(10),
            retry_jitter: Duration::from_millis(10),
            default_wait: Duration::from_millis(500),
            default_lease: Duration::from_secs(5),
        }
    }
}

/// Identity of a lock holder.
///
/// One owner per logical flow: every acquisition made with the same owner on the
/// same resource is a reentrant hold.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockOwner(String);

impl LockOwner {
    /// Fresh random owner.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Owner with an explicit token.
    #[must_use]
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The owner token stored in the lease.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of an acquisition attempt.
#[derive(Debug)]
pub enum AcquireOutcome<H = LockHandle> {
    /// The lease is held
    Acquired(H),
    /// The wait budget ran out
    TimedOut,
}

impl<H> AcquireOutcome<H> {
    /// The acquired value, if any.
    pub fn acquired(self) -> Option<H> {
        match self {
            Self::Acquired(handle) => Some(handle),
            Self::TimedOut => None,
        }
    }
}

/// Result of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The last hold was released and the lease deleted
    Released,
    /// An outer hold by the same owner remains
    StillHeld(u64),
    /// The lease had expired or belongs to another owner
    NotHeld,
}

/// Aborts the renewal loop when dropped.
#[derive(Debug)]
struct RenewalTask(JoinHandle<()>);

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A held lease.
///
/// Dropping the handle stops renewal but does not delete the lease; pass it to
/// [`LockManager::release`] for that.
#[derive(Debug)]
pub struct LockHandle {
    resource: String,
    owner: LockOwner,
    lease: Duration,
    hold_count: u64,
    lost: Arc<AtomicBool>,
    renewal: RenewalTask,
}

impl LockHandle {
    /// Resource this handle locks.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Owner that holds it.
    #[must_use]
    pub const fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Hold-count right after this acquisition (1 for the outermost hold).
    #[must_use]
    pub const fn hold_count(&self) -> u64 {
        self.hold_count
    }

    /// Lease duration.
    #[must_use]
    pub const fn lease(&self) -> Duration {
        self.lease
    }

    /// Whether renewal found the lease gone or taken over.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

fn lease_millis(lease: Duration) -> String {
    lease.as_millis().max(1).to_string()
}

/// Reentrant, auto-extending lock manager over a [`SharedStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    config: LockConfig,
}

impl LockManager {
    /// Creates a lock manager.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, config: LockConfig) -> Self {
        Self {
            store,
            keys,
            config,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire `resource` for `owner`, retrying until `wait` is spent.
    ///
    /// A zero `wait` makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if the shared store fails.
    pub async fn acquire(
        &self,
        owner: &LockOwner,
        resource: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        self.acquire_until(owner, resource, Instant::now() + wait, lease)
            .await
    }

    async fn acquire_until(
        &self,
        owner: &LockOwner,
        resource: &str,
        deadline: Instant,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        loop {
            if let Some(handle) = self.try_acquire(owner, resource, lease).await? {
                let outcome = if handle.hold_count > 1 {
                    "reentered"
                } else {
                    "acquired"
                };
                LockMetrics::record_acquisition(outcome);
                tracing::trace!(resource, owner = %owner, hold_count = handle.hold_count, "Lock acquired");
                return Ok(AcquireOutcome::Acquired(handle));
            }

            let now = Instant::now();
            if now >= deadline {
                LockMetrics::record_acquisition("timed_out");
                tracing::debug!(resource, owner = %owner, "Lock wait budget exhausted");
                return Ok(AcquireOutcome::TimedOut);
            }
            sleep(self.retry_pause().min(deadline - now)).await;
        }
    }

    async fn try_acquire(
        &self,
        owner: &LockOwner,
        resource: &str,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let reply = self
            .store
            .run_script(
                &script::LOCK_ACQUIRE,
                vec![self.keys.lock(resource)],
                vec![owner.as_str().to_string(), lease_millis(lease)],
            )
            .await?;
        let count = reply.into_int(&script::LOCK_ACQUIRE)?;
        if count < 1 {
            return Ok(None);
        }

        let lost = Arc::new(AtomicBool::new(false));
        let renewal = self.spawn_renewal(resource, owner, lease, Arc::clone(&lost));
        Ok(Some(LockHandle {
            resource: resource.to_string(),
            owner: owner.clone(),
            lease,
            hold_count: u64::try_from(count).unwrap_or(1),
            lost,
            renewal,
        }))
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.config.retry_jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.retry_interval + Duration::from_millis(extra)
    }

    fn spawn_renewal(
        &self,
        resource: &str,
        owner: &LockOwner,
        lease: Duration,
        lost: Arc<AtomicBool>,
    ) -> RenewalTask {
        let store = Arc::clone(&self.store);
        let key = self.keys.lock(resource);
        let resource = resource.to_string();
        let args = vec![owner.as_str().to_string(), lease_millis(lease)];
        let period = (lease / 3).max(Duration::from_millis(1));

        RenewalTask(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let extended = store
                    .run_script(&script::LOCK_EXTEND, vec![key.clone()], args.clone())
                    .await
                    .and_then(|reply| reply.into_int(&script::LOCK_EXTEND));
                match extended {
                    Ok(1) => {}
                    Ok(_) => {
                        lost.store(true, Ordering::SeqCst);
                        LockMetrics::record_lease_lost();
                        tracing::warn!(resource = %resource, "Lease lost before release");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(resource = %resource, error = %e, "Lease renewal failed, will retry");
                    }
                }
            }
        }))
    }

    /// Release one hold.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if the shared store fails. The renewal
    /// task is stopped either way.
    pub async fn release(&self, handle: LockHandle) -> Result<ReleaseOutcome> {
        let LockHandle {
            resource,
            owner,
            lease,
            renewal,
            ..
        } = handle;
        drop(renewal);

        let reply = self
            .store
            .run_script(
                &script::LOCK_RELEASE,
                vec![self.keys.lock(&resource)],
                vec![owner.as_str().to_string(), lease_millis(lease)],
            )
            .await?;
        let outcome = match reply.into_int(&script::LOCK_RELEASE)? {
            0 => ReleaseOutcome::Released,
            n if n > 0 => ReleaseOutcome::StillHeld(n.unsigned_abs()),
            _ => ReleaseOutcome::NotHeld,
        };
        tracing::trace!(resource = %resource, owner = %owner, ?outcome, "Lock released");
        Ok(outcome)
    }

    /// Acquire several resources in a global order within one wait budget.
    ///
    /// Duplicate keys are acquired once. On timeout or error everything already
    /// taken is released before returning.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if the shared store fails.
    pub async fn acquire_many<I, S>(
        &self,
        owner: &LockOwner,
        resources: I,
        wait: Duration,
        lease: Duration,
    ) -> Result<AcquireOutcome<Vec<LockHandle>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered: BTreeSet<String> = resources.into_iter().map(Into::into).collect();
        let deadline = Instant::now() + wait;
        let mut held = Vec::with_capacity(ordered.len());

        for resource in &ordered {
            match self.acquire_until(owner, resource, deadline, lease).await {
                Ok(AcquireOutcome::Acquired(handle)) => held.push(handle),
                Ok(AcquireOutcome::TimedOut) => {
                    self.release_all(held).await;
                    return Ok(AcquireOutcome::TimedOut);
                }
                Err(e) => {
                    self.release_all(held).await;
                    return Err(e);
                }
            }
        }
        Ok(AcquireOutcome::Acquired(held))
    }

    /// Release handles in reverse acquisition order, logging failures.
    pub async fn release_all(&self, handles: Vec<LockHandle>) {
        for handle in handles.into_iter().rev() {
            let resource = handle.resource.clone();
            if let Err(e) = self.release(handle).await {
                tracing::warn!(resource = %resource, error = %e, "Failed to release lock");
            }
        }
    }

    /// Run `operation` while holding `resource`.
    ///
    /// Returns `Ok(None)` if the lock could not be acquired within `wait`. The
    /// lease is released after `operation` completes, whatever it returned.
    ///
    /// # Errors
    ///
    /// Returns `FlashSaleError::Store` if acquiring or releasing fails.
    pub async fn with_lock<F, Fut, T>(
        &self,
        owner: &LockOwner,
        resource: &str,
        wait: Duration,
        lease: Duration,
        operation: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let AcquireOutcome::Acquired(handle) = self.acquire(owner, resource, wait, lease).await?
        else {
            return Ok(None);
        };
        let value = operation().await;
        self.release(handle).await?;
        Ok(Some(value))
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
