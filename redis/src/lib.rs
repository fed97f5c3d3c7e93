//! Redis implementation of the flash-sale shared store.
//!
//! # Architecture
//!
//! Every cross-process structure lives under one key prefix:
//! - **Stock counters**: `{prefix}stock:{product}` (hash `available`, `version`)
//! - **Reservation marks**: `{prefix}mark:{product}:{user}` (hash, TTL = reservation TTL + grace)
//! - **Pending reservations**: `{prefix}reservations:pending` (sorted set scored by deadline)
//! - **Lock leases**: `{prefix}lock:{resource}` (hash `owner`, `count`, TTL = lease)
//! - **Cache entries**: `{prefix}cache:product:{id}` and hot replicas
//!
//! Atomic transitions run as Lua scripts through `EVALSHA`, falling back to
//! `EVAL` when the server has not seen a script yet. The expiry script derives
//! mark and stock keys from the prefix at run time, so a deployment must not
//! shard these keys across cluster slots.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redis::RedisSharedStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisSharedStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use flashsale_core::error::StoreError;
use flashsale_core::script::{self, Script, ScriptReply};
use flashsale_core::store::{SharedStore, StoreFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Redis-backed shared store.
///
/// Provides:
/// - Atomic scripts with cached SHA1 digests
/// - Connection multiplexing and reconnection via `ConnectionManager`
/// - Pipelined bulk writes for cache warm-up
#[derive(Clone)]
pub struct RedisSharedStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Prepared scripts keyed by name.
    scripts: Arc<HashMap<&'static str, redis::Script>>,
}

impl RedisSharedStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(scripts = script::ALL.len(), "Connected to Redis shared store");
        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        let scripts = script::ALL
            .iter()
            .map(|script| (script.name, redis::Script::new(script.source)))
            .collect();
        Self {
            conn_manager,
            scripts: Arc::new(scripts),
        }
    }

    /// Load every script into the server's script cache.
    ///
    /// Optional; unknown scripts are loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if Redis rejects a script.
    pub async fn preload_scripts(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        for (name, prepared) in self.scripts.iter() {
            let _: String = prepared
                .prepare_invoke()
                .load_async(&mut conn)
                .await
                .map_err(|e| store_error(&format!("SCRIPT LOAD {name}"), &e))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisSharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSharedStore")
            .field("scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}

fn store_error(operation: &str, error: &RedisError) -> StoreError {
    if error.kind() == ErrorKind::TypeError {
        return StoreError::Serialization(format!("{operation}: {error}"));
    }
    StoreError::Unavailable(format!("Redis {operation} failed: {error}"))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn script_reply(script: &Script, value: Value) -> Result<ScriptReply, StoreError> {
    match value {
        Value::Nil => Ok(ScriptReply::Nil),
        Value::Int(number) => Ok(ScriptReply::Int(number)),
        Value::BulkString(bytes) => Ok(ScriptReply::Bulk(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Value::SimpleString(text) => Ok(ScriptReply::Bulk(text)),
        Value::Okay => Ok(ScriptReply::Bulk("OK".to_string())),
        Value::Array(items) => items
            .into_iter()
            .map(|item| script_reply(script, item))
            .collect::<Result<Vec<_>, _>>()
            .map(ScriptReply::Array),
        other => Err(StoreError::UnexpectedReply {
            script: script.name,
            detail: format!("unsupported reply {other:?}"),
        }),
    }
}

impl SharedStore for RedisSharedStore {
    fn set_if_absent(&self, key: String, value: String, ttl: Duration) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("PX")
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("SET NX", &e))?;
            Ok(reply.is_some())
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
            let prepared =
                self.scripts
                    .get(script.name)
                    .ok_or_else(|| StoreError::UnexpectedReply {
                        script: script.name,
                        detail: "script not registered".to_string(),
                    })?;

            let mut invocation = prepared.prepare_invoke();
            for key in &keys {
                invocation.key(key);
            }
            for arg in &args {
                invocation.arg(arg);
            }

            let mut conn = self.conn_manager.clone();
            let value: Value = invocation.invoke_async(&mut conn).await.map_err(|e| {
                tracing::warn!(script = script.name, error = %e, "Script execution failed");
                store_error(script.name, &e)
            })?;
            script_reply(script, value)
        })
    }

    fn get(&self, key: String) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.get(&key).await.map_err(|e| store_error("GET", &e))
        })
    }

    fn get_fields(&self, key: String) -> StoreFuture<'_, HashMap<String, String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.hgetall(&key)
                .await
                .map_err(|e| store_error("HGETALL", &e))
        })
    }

    fn set(&self, key: String, value: String, ttl: Option<Duration>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            match ttl {
                Some(ttl) => conn
                    .pset_ex::<_, _, ()>(&key, &value, millis(ttl))
                    .await
                    .map_err(|e| store_error("PSETEX", &e)),
                None => conn
                    .set::<_, _, ()>(&key, &value)
                    .await
                    .map_err(|e| store_error("SET", &e)),
            }
        })
    }

    fn set_many(&self, entries: Vec<(String, String, Duration)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if entries.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn_manager.clone();
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (key, value, ttl) in &entries {
                pipe.pset_ex(key, value, millis(*ttl)).ignore();
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("pipelined PSETEX", &e))?;
            tracing::debug!(entries = entries.len(), "Bulk cache write");
            Ok(())
        })
    }

    fn expire(&self, key: String, ttl: Duration) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let ttl_ms = i64::try_from(millis(ttl)).unwrap_or(i64::MAX);
            conn.pexpire(&key, ttl_ms)
                .await
                .map_err(|e| store_error("PEXPIRE", &e))
        })
    }

    fn delete(&self, keys: Vec<String>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn_manager.clone();
            conn.del(&keys).await.map_err(|e| store_error("DEL", &e))
        })
    }

    fn ttl(&self, key: String) -> StoreFuture<'_, Option<Duration>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let remaining: i64 = conn
                .pttl(&key)
                .await
                .map_err(|e| store_error("PTTL", &e))?;
            // -2: missing, -1: no expiry
            Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("PING", &e))?;
            Ok(())
        })
    }
}
