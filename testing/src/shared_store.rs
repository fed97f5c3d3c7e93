//! In-memory [`SharedStore`] for tests.
//!
//! Every operation, scripts included, runs while holding one mutex, which gives
//! the same indivisibility a Redis server gives a Lua script. Expiry is lazy and
//! measured against an injected [`Clock`], so tests can move time forward with a
//! [`ManualClock`](crate::mocks::ManualClock) instead of sleeping.

use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::error::StoreError;
use flashsale_core::keys::parse_pending_member;
use flashsale_core::script::{self, Script, ScriptReply};
use flashsale_core::store::{SharedStore, StoreFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Plain(String),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Conflict(format!("WRONGTYPE operation against key {key}"))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn pair(code: i64, value: i64) -> ScriptReply {
    ScriptReply::Array(vec![ScriptReply::Int(code), ScriptReply::Int(value)])
}

/// Positional script arguments.
struct Args<'a> {
    script: &'static Script,
    values: &'a [String],
}

impl<'a> Args<'a> {
    fn str(&self, index: usize) -> Result<&'a str, StoreError> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| StoreError::UnexpectedReply {
                script: self.script.name,
                detail: format!("missing argument {index}"),
            })
    }

    fn int(&self, index: usize) -> Result<i64, StoreError> {
        let raw = self.str(index)?;
        raw.parse().map_err(|_| StoreError::UnexpectedReply {
            script: self.script.name,
            detail: format!("argument {index} is not an integer: {raw:?}"),
        })
    }
}

/// Key space guarded by the store mutex.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str, now: i64) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at_ms.is_some_and(|at| at <= now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str, now: i64) -> Result<&mut HashMap<String, String>, StoreError> {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at_ms: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields),
            _ => Err(wrong_type(key)),
        }
    }

    fn hash_snapshot(
        &mut self,
        key: &str,
        now: i64,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hget(&mut self, key: &str, field: &str, now: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .hash_snapshot(key, now)?
            .and_then(|mut fields| fields.remove(field)))
    }

    fn hincrby(&mut self, key: &str, field: &str, delta: i64, now: i64) -> Result<i64, StoreError> {
        let fields = self.hash_mut(key, now)?;
        let current: i64 = match fields.get(field) {
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::Conflict(format!("hash value is not an integer: {raw}")))?,
            None => 0,
        };
        let next = current + delta;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn pexpire(&mut self, key: &str, ttl_ms: i64, now: i64) -> bool {
        match self.live(key, now) {
            Some(entry) => {
                entry.expires_at_ms = Some(now + ttl_ms);
                true
            }
            None => false,
        }
    }

    fn del(&mut self, key: &str, now: i64) -> bool {
        self.live(key, now).is_some() && self.entries.remove(key).is_some()
    }

    fn zset_mut(&mut self, key: &str, now: i64) -> Result<&mut HashMap<String, i64>, StoreError> {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(HashMap::new()),
                    expires_at_ms: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => Ok(members),
            _ => Err(wrong_type(key)),
        }
    }

    fn zrem(&mut self, key: &str, member: &str, now: i64) -> Result<(), StoreError> {
        let members = self.zset_mut(key, now)?;
        members.remove(member);
        if members.is_empty() {
            self.entries.remove(key);
        }
        Ok(())
    }

    /// Members ordered by `(score, member)`, optionally capped at `max_score`.
    fn zrange(
        &mut self,
        key: &str,
        max_score: Option<i64>,
        limit: usize,
        now: i64,
    ) -> Result<Vec<String>, StoreError> {
        let members = match self.live(key, now) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: Value::SortedSet(members),
                ..
            }) => members,
            Some(_) => return Err(wrong_type(key)),
        };
        let mut due: Vec<(i64, &String)> = members
            .iter()
            .filter(|(_, score)| max_score.is_none_or(|max| **score <= max))
            .map(|(member, score)| (*score, member))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn run(
        &mut self,
        script: &'static Script,
        keys: &[String],
        args: &[String],
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        let key = |index: usize| {
            keys.get(index)
                .map(String::as_str)
                .ok_or_else(|| StoreError::UnexpectedReply {
                    script: script.name,
                    detail: format!("missing key {index}"),
                })
        };
        let args = Args {
            script,
            values: args,
        };

        match script.name {
            "lock_acquire" => self.lock_acquire(key(0)?, &args, now),
            "lock_release" => self.lock_release(key(0)?, &args, now),
            "lock_extend" => {
                let lease = key(0)?;
                if self.hget(lease, "owner", now)?.as_deref() == Some(args.str(0)?) {
                    self.pexpire(lease, args.int(1)?, now);
                    Ok(ScriptReply::Int(1))
                } else {
                    Ok(ScriptReply::Int(0))
                }
            }
            "compare_and_delete" => {
                let target = key(0)?;
                let expected = args.str(0)?;
                let matches = matches!(
                    self.live(target, now),
                    Some(Entry { value: Value::Plain(current), .. }) if current.as_str() == expected
                );
                Ok(ScriptReply::Int(i64::from(matches && self.del(target, now))))
            }
            "try_decrement" => self.try_decrement(key(0)?, key(1)?, key(2)?, &args, now),
            "release_reservation" => {
                self.release_reservation(key(0)?, key(1)?, key(2)?, &args, now)
            }
            "confirm_reservation" => self.confirm_reservation(key(0)?, key(1)?, &args, now),
            "expire_reservations" => self.expire_reservations(key(0)?, &args, now),
            "init_stock" => {
                let stock = key(0)?;
                let quantity = args.int(0)?;
                self.hash_mut(stock, now)?
                    .insert("available".to_string(), quantity.to_string());
                Ok(ScriptReply::Int(self.hincrby(stock, "version", 1, now)?))
            }
            "repair_stock" => self.repair_stock(key(0)?, key(1)?, &args, now),
            other => Err(StoreError::UnexpectedReply {
                script: script.name,
                detail: format!("unknown script {other}"),
            }),
        }
    }

    fn lock_acquire(&mut self, lease: &str, args: &Args<'_>, now: i64) -> Result<ScriptReply, StoreError> {
        let owner = args.str(0)?;
        let lease_ms = args.int(1)?;
        match self.hget(lease, "owner", now)? {
            None => {
                let fields = self.hash_mut(lease, now)?;
                fields.insert("owner".to_string(), owner.to_string());
                fields.insert("count".to_string(), "1".to_string());
                self.pexpire(lease, lease_ms, now);
                Ok(ScriptReply::Int(1))
            }
            Some(current) if current == owner => {
                let count = self.hincrby(lease, "count", 1, now)?;
                self.pexpire(lease, lease_ms, now);
                Ok(ScriptReply::Int(count))
            }
            Some(_) => Ok(ScriptReply::Int(0)),
        }
    }

    fn lock_release(&mut self, lease: &str, args: &Args<'_>, now: i64) -> Result<ScriptReply, StoreError> {
        if self.hget(lease, "owner", now)?.as_deref() != Some(args.str(0)?) {
            return Ok(ScriptReply::Int(-1));
        }
        let count = self.hincrby(lease, "count", -1, now)?;
        if count > 0 {
            self.pexpire(lease, args.int(1)?, now);
            return Ok(ScriptReply::Int(count));
        }
        self.del(lease, now);
        Ok(ScriptReply::Int(0))
    }

    fn try_decrement(
        &mut self,
        stock: &str,
        mark: &str,
        pending: &str,
        args: &Args<'_>,
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        if self.live(mark, now).is_some() {
            return Ok(pair(-1, 0));
        }
        let Some(available) = self.hget(stock, "available", now)? else {
            return Ok(pair(-2, 0));
        };
        let available: i64 = available
            .parse()
            .map_err(|_| StoreError::Conflict(format!("stock is not an integer: {available}")))?;
        if available < 0 {
            return Ok(pair(-3, available));
        }
        let quantity = args.int(0)?;
        if available < quantity {
            return Ok(pair(0, available));
        }

        let remaining = self.hincrby(stock, "available", -quantity, now)?;
        self.hincrby(stock, "version", 1, now)?;
        let fields = self.hash_mut(mark, now)?;
        fields.insert("token".to_string(), args.str(1)?.to_string());
        fields.insert("quantity".to_string(), quantity.to_string());
        fields.insert("created_at_ms".to_string(), args.str(2)?.to_string());
        fields.insert("deadline_ms".to_string(), args.str(3)?.to_string());
        fields.insert("state".to_string(), "reserved".to_string());
        self.pexpire(mark, args.int(4)?, now);
        let deadline = args.int(3)?;
        self.zset_mut(pending, now)?
            .insert(args.str(5)?.to_string(), deadline);
        Ok(pair(1, remaining))
    }

    fn release_reservation(
        &mut self,
        stock: &str,
        mark: &str,
        pending: &str,
        args: &Args<'_>,
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        let Some(fields) = self.hash_snapshot(mark, now)? else {
            return Ok(pair(0, 0));
        };
        let token = fields.get("token").map(String::as_str).unwrap_or_default();
        let expected = args.str(0)?;
        if !expected.is_empty() && token != expected {
            return Ok(pair(-1, 0));
        }
        if fields.get("state").map(String::as_str) != Some("reserved") {
            return Ok(pair(-2, 0));
        }
        let quantity_raw = fields.get("quantity").map(String::as_str).unwrap_or("0");
        let quantity: i64 = quantity_raw.parse().unwrap_or(0);

        let remaining = self.hincrby(stock, "available", quantity, now)?;
        self.hincrby(stock, "version", 1, now)?;
        self.del(mark, now);
        let member = format!("{}|{}|{token}|{quantity_raw}", args.str(1)?, args.str(2)?);
        self.zrem(pending, &member, now)?;
        Ok(pair(1, remaining))
    }

    fn confirm_reservation(
        &mut self,
        mark: &str,
        pending: &str,
        args: &Args<'_>,
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        let Some(fields) = self.hash_snapshot(mark, now)? else {
            return Ok(ScriptReply::Int(0));
        };
        let token = fields.get("token").map(String::as_str).unwrap_or_default();
        if token != args.str(0)? {
            return Ok(ScriptReply::Int(-1));
        }
        let order_id = args.str(1)?;
        if fields.get("state").map(String::as_str) == Some("confirmed") {
            let same = fields.get("order_id").map(String::as_str) == Some(order_id);
            return Ok(ScriptReply::Int(if same { 2 } else { -2 }));
        }
        let quantity = fields.get("quantity").cloned().unwrap_or_default();
        let member = format!("{}|{}|{token}|{quantity}", args.str(3)?, args.str(4)?);

        let stored = self.hash_mut(mark, now)?;
        stored.insert("state".to_string(), "confirmed".to_string());
        stored.insert("order_id".to_string(), order_id.to_string());
        self.pexpire(mark, args.int(2)?, now);
        self.zrem(pending, &member, now)?;
        Ok(ScriptReply::Int(1))
    }

    fn expire_reservations(
        &mut self,
        pending: &str,
        args: &Args<'_>,
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        let cutoff = args.int(0)?;
        let limit = usize::try_from(args.int(1)?).unwrap_or(0);
        let prefix = args.str(2)?;
        let mut released = 0;

        for member in self.zrange(pending, Some(cutoff), limit, now)? {
            if let Some((product_id, user_id, token, quantity)) = parse_pending_member(&member) {
                let mark_key = format!("{prefix}mark:{product_id}:{user_id}");
                let mark = self.hash_snapshot(&mark_key, now)?;
                let owns_mark = mark
                    .as_ref()
                    .is_some_and(|fields| fields.get("token") == Some(&token));
                let reserved = mark.as_ref().is_some_and(|fields| {
                    fields.get("state").map(String::as_str) == Some("reserved")
                });
                if !owns_mark || reserved {
                    let stock_key = format!("{prefix}stock:{product_id}");
                    self.hincrby(&stock_key, "available", i64::from(quantity), now)?;
                    self.hincrby(&stock_key, "version", 1, now)?;
                    if owns_mark {
                        self.del(&mark_key, now);
                    }
                    released += 1;
                }
            }
            self.zrem(pending, &member, now)?;
        }
        Ok(ScriptReply::Int(released))
    }

    fn repair_stock(
        &mut self,
        stock: &str,
        pending: &str,
        args: &Args<'_>,
        now: i64,
    ) -> Result<ScriptReply, StoreError> {
        let product = args.str(2)?;
        let held: i64 = self
            .zrange(pending, None, usize::MAX, now)?
            .iter()
            .filter_map(|member| parse_pending_member(member))
            .filter(|(product_id, ..)| product_id.to_string() == product)
            .map(|(.., quantity)| i64::from(quantity))
            .sum();
        let available = (args.int(0)? - args.int(1)? - held).max(0);
        self.hash_mut(stock, now)?
            .insert("available".to_string(), available.to_string());
        self.hincrby(stock, "version", 1, now)?;
        Ok(ScriptReply::Int(available))
    }
}

/// In-memory shared store.
///
/// # Fault injection
///
/// [`set_available(false)`](Self::set_available) makes every operation fail with
/// `StoreError::Unavailable` until it is switched back on.
///
/// # Example
///
/// ```
/// use flashsale_core::store::SharedStore;
/// use flashsale_testing::InMemorySharedStore;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let store = InMemorySharedStore::new();
/// let written = store
///     .set_if_absent("k".into(), "v".into(), Duration::from_secs(1))
///     .await;
/// assert_eq!(written, Ok(true));
/// # });
/// ```
#[derive(Clone)]
pub struct InMemorySharedStore {
    inner: Arc<Mutex<Keyspace>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
    operations: Arc<AtomicUsize>,
}

impl Default for InMemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySharedStore")
            .field("available", &self.available.load(Ordering::SeqCst))
            .field("operations", &self.operation_count())
            .finish_non_exhaustive()
    }
}

impl InMemorySharedStore {
    /// Store measuring TTLs against the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store measuring TTLs against `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Keyspace::default())),
            clock,
            available: Arc::new(AtomicBool::new(true)),
            operations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of operations served so far.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Overwrite a hash field directly, bypassing every script.
    ///
    /// Used to simulate a component that broke the atomicity guarantee.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `key` holds a non-hash value.
    pub fn force_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_state(|state, now| {
            state
                .hash_mut(key, now)?
                .insert(field.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Members of a sorted set in score order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if `key` holds a non-set value.
    pub fn sorted_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_state(|state, now| state.zrange(key, None, usize::MAX, now))
    }

    fn with_state<T>(
        &self,
        operation: impl FnOnce(&mut Keyspace, i64) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now_millis();
        let mut state = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))?;
        operation(&mut state, now)
    }
}

impl SharedStore for InMemorySharedStore {
    fn set_if_absent(&self, key: String, value: String, ttl: Duration) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| {
                if state.live(&key, now).is_some() {
                    return Ok(false);
                }
                state.entries.insert(
                    key,
                    Entry {
                        value: Value::Plain(value),
                        expires_at_ms: Some(now + millis(ttl)),
                    },
                );
                Ok(true)
            })
        })
    }

    fn compare_and_delete(&self, key: String, expected: String) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let reply = self
                .run_script(&script::COMPARE_AND_DELETE, vec![key], vec![expected])
                .await?;
            Ok(reply.into_int(&script::COMPARE_AND_DELETE)? == 1)
        })
    }

    fn run_script(
        &self,
        script: &'static Script,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> StoreFuture<'_, ScriptReply> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| state.run(script, &keys, &args, now))
        })
    }

    fn get(&self, key: String) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| match state.live(&key, now) {
                None => Ok(None),
                Some(Entry {
                    value: Value::Plain(value),
                    ..
                }) => Ok(Some(value.clone())),
                Some(_) => Err(wrong_type(&key)),
            })
        })
    }

    fn get_fields(&self, key: String) -> StoreFuture<'_, HashMap<String, String>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| Ok(state.hash_snapshot(&key, now)?.unwrap_or_default()))
        })
    }

    fn set(&self, key: String, value: String, ttl: Option<Duration>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| {
                state.entries.insert(
                    key,
                    Entry {
                        value: Value::Plain(value),
                        expires_at_ms: ttl.map(|ttl| now + millis(ttl)),
                    },
                );
                Ok(())
            })
        })
    }

    fn set_many(&self, entries: Vec<(String, String, Duration)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.with_state(|state, now| {
                for (key, value, ttl) in entries {
                    state.entries.insert(
                        key,
                        Entry {
                            value: Value::Plain(value),
                            expires_at_ms: Some(now + millis(ttl)),
                        },
                    );
                }
                Ok(())
            })
        })
    }

    fn expire(&self, key: String, ttl: Duration) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state, now| Ok(state.pexpire(&key, millis(ttl), now)))
        })
    }

    fn delete(&self, keys: Vec<String>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.with_state(|state, now| {
                Ok(keys.iter().filter(|key| state.del(key, now)).count() as u64)
            })
        })
    }

    fn ttl(&self, key: String) -> StoreFuture<'_, Option<Duration>> {
        Box::pin(async move {
            self.with_state(|state, now| {
                Ok(state
                    .live(&key, now)
                    .and_then(|entry| entry.expires_at_ms)
                    .map(|at| Duration::from_millis(u64::try_from(at - now).unwrap_or(0))))
            })
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|_, _| Ok(())) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[tokio::test]
    async fn plain_values_expire_with_the_clock() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemorySharedStore::with_clock(clock.clone());

        store
            .set("k".into(), "v".into(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(store.get("k".into()).await.unwrap(), Some("v".into()));
        assert_eq!(
            store.ttl("k".into()).await.unwrap(),
            Some(Duration::from_millis(100))
        );

        clock.advance(Duration::from_millis(100));
        assert_eq!(store.get("k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_only_writes_once() {
        let store = InMemorySharedStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent("k".into(), "a".into(), ttl).await.unwrap());
        assert!(!store.set_if_absent("k".into(), "b".into(), ttl).await.unwrap());
        assert!(!store.compare_and_delete("k".into(), "b".into()).await.unwrap());
        assert!(store.compare_and_delete("k".into(), "a".into()).await.unwrap());
        assert_eq!(store.get("k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn decrement_script_follows_check_order() {
        let store = InMemorySharedStore::new();
        let keys = args(&["s", "m", "p"]);
        let decrement = args(&["1", "tok", "0", "1000", "2000", "1|2|tok|1"]);

        let missing = store
            .run_script(&script::TRY_DECREMENT, keys.clone(), decrement.clone())
            .await
            .unwrap();
        assert_eq!(missing, pair(-2, 0));

        store
            .run_script(&script::INIT_STOCK, args(&["s"]), args(&["1"]))
            .await
            .unwrap();
        let first = store
            .run_script(&script::TRY_DECREMENT, keys.clone(), decrement.clone())
            .await
            .unwrap();
        assert_eq!(first, pair(1, 0));

        let replay = store
            .run_script(&script::TRY_DECREMENT, keys, decrement)
            .await
            .unwrap();
        assert_eq!(replay, pair(-1, 0));

        let stock = store.get_fields("s".into()).await.unwrap();
        assert_eq!(stock.get("available").map(String::as_str), Some("0"));
        assert_eq!(stock.get("version").map(String::as_str), Some("2"));
        assert_eq!(store.sorted_members("p").unwrap(), vec!["1|2|tok|1"]);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = InMemorySharedStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn lock_scripts_count_holds() {
        let store = InMemorySharedStore::new();
        let acquire = |owner: &str| {
            store.run_script(&script::LOCK_ACQUIRE, args(&["l"]), args(&[owner, "1000"]))
        };
        assert_eq!(acquire("a").await.unwrap(), ScriptReply::Int(1));
        assert_eq!(acquire("a").await.unwrap(), ScriptReply::Int(2));
        assert_eq!(acquire("b").await.unwrap(), ScriptReply::Int(0));

        let release = |owner: &str| {
            store.run_script(&script::LOCK_RELEASE, args(&["l"]), args(&[owner, "1000"]))
        };
        assert_eq!(release("b").await.unwrap(), ScriptReply::Int(-1));
        assert_eq!(release("a").await.unwrap(), ScriptReply::Int(1));
        assert_eq!(release("a").await.unwrap(), ScriptReply::Int(0));
        assert_eq!(acquire("b").await.unwrap(), ScriptReply::Int(1));
    }
}
