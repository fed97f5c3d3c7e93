//! Shared key-value/scripting store contract.
//!
//! The shared store holds every piece of cross-process state: stock counters,
//! reservation marks, lock leases and cache entries. Implementations must
//! execute each [`Script`] indivisibly with respect to every other operation.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! store can be shared as `Arc<dyn SharedStore>` between the lock manager, the
//! ledger and the cache layer.

use crate::error::StoreError;
use crate::script::{Script, ScriptReply};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by store adapters.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Shared store abstraction.
///
/// Two implementations are provided:
///
/// - **`RedisSharedStore`** (`flashsale-redis`): Lua scripts over a multiplexed connection
/// - **`InMemorySharedStore`** (`flashsale-testing`): a mutex-guarded map that runs
///   each script natively while holding the lock
///
/// Every method fails with [`StoreError::Unavailable`] when the store cannot
/// be reached.
pub trait SharedStore: Send + Sync {
    /// Set `key` to `value` with a TTL only if the key does not exist.
    ///
    /// Returns `true` if the value was written.
    fn set_if_absent(&self, key: String, value: String, ttl: Duration) -> StoreFuture<'_, bool>;

    /// Delete `key` only if its current value equals `expected`.
    ///
    /// Returns `true` if the key was deleted.
    fn compare_and_delete(&self, key: String, expected: String) -> StoreFuture<'_, bool>;

    /// Execute an atomic script.
    ///
    /// # Errors
    ///
    /// Besides `Unavailable`, implementations return
    /// [`StoreError::UnexpectedReply`] for a script they do not know.
    fn run_script(
        &self,
        script: &'static Script,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> StoreFuture<'_, ScriptReply>;

    /// Read a plain value.
    fn get(&self, key: String) -> StoreFuture<'_, Option<String>>;

    /// Read every field of a hash. Missing keys yield an empty map.
    fn get_fields(&self, key: String) -> StoreFuture<'_, HashMap<String, String>>;

    /// Write a plain value, optionally with a TTL.
    fn set(&self, key: String, value: String, ttl: Option<Duration>) -> StoreFuture<'_, ()>;

    /// Write several plain values, each with its own TTL, in one round trip.
    fn set_many(&self, entries: Vec<(String, String, Duration)>) -> StoreFuture<'_, ()>;

    /// Reset the TTL of an existing key. Returns `false` if the key is absent.
    fn expire(&self, key: String, ttl: Duration) -> StoreFuture<'_, bool>;

    /// Delete keys, returning how many existed.
    fn delete(&self, keys: Vec<String>) -> StoreFuture<'_, u64>;

    /// Remaining TTL of a key; `None` if absent or persistent.
    fn ttl(&self, key: String) -> StoreFuture<'_, Option<Duration>>;

    /// Round-trip health check.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
