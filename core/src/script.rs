//! Catalogue of atomic server-side scripts.
//!
//! Every state transition that must not interleave with another caller is
//! expressed as one of these scripts and executed in a single round trip by
//! [`SharedStore::run_script`](crate::store::SharedStore::run_script). The Lua
//! source is what a Redis-compatible store runs; other implementations (such as
//! the in-memory store used in tests) dispatch on [`Script::name`] and must
//! reproduce the documented semantics indivisibly.
//!
//! Reply codes are part of the contract and are decoded by the runtime.

use crate::error::StoreError;

/// A named atomic script.
#[derive(Debug, PartialEq, Eq)]
pub struct Script {
    /// Stable name, used for dispatch and logging
    pub name: &'static str,
    /// Lua source
    pub source: &'static str,
}

/// Value returned by a script, mirroring the store's reply types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptReply {
    /// No value
    Nil,
    /// Integer reply
    Int(i64),
    /// String reply
    Bulk(String),
    /// Array reply
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Decode an integer reply.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnexpectedReply` for any other shape.
    pub fn into_int(self, script: &Script) -> Result<i64, StoreError> {
        match self {
            Self::Int(value) => Ok(value),
            Self::Bulk(text) => text.parse().map_err(|_| StoreError::UnexpectedReply {
                script: script.name,
                detail: format!("expected integer, got {text:?}"),
            }),
            other => Err(StoreError::UnexpectedReply {
                script: script.name,
                detail: format!("expected integer, got {other:?}"),
            }),
        }
    }

    /// Decode a two-integer array reply `{code, value}`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnexpectedReply` for any other shape.
    pub fn into_pair(self, script: &Script) -> Result<(i64, i64), StoreError> {
        match self {
            Self::Array(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                let code = items.next().map_or(Ok(0), |item| item.into_int(script))?;
                let value = items.next().map_or(Ok(0), |item| item.into_int(script))?;
                Ok((code, value))
            }
            other => Err(StoreError::UnexpectedReply {
                script: script.name,
                detail: format!("expected {{code, value}}, got {other:?}"),
            }),
        }
    }
}

/// Reentrant lease acquisition.
///
/// `KEYS[1]` lease hash, `ARGV[1]` owner token, `ARGV[2]` lease in ms.
/// Returns the new hold-count (`>= 1`) or `0` if another owner holds it.
pub static LOCK_ACQUIRE: Script = Script {
    name: "lock_acquire",
    source: r"
local owner = redis.call('HGET', KEYS[1], 'owner')
if not owner then
    redis.call('HSET', KEYS[1], 'owner', ARGV[1], 'count', 1)
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
if owner == ARGV[1] then
    local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return count
end
return 0
",
};

/// Reentrant lease release.
///
/// `KEYS[1]` lease hash, `ARGV[1]` owner token, `ARGV[2]` lease in ms.
/// Returns `-1` if the caller does not own the lease, the remaining hold-count
/// if it is still held, or `0` once the lease is deleted.
pub static LOCK_RELEASE: Script = Script {
    name: "lock_release",
    source: r"
local owner = redis.call('HGET', KEYS[1], 'owner')
if owner ~= ARGV[1] then
    return -1
end
local count = redis.call('HINCRBY', KEYS[1], 'count', -1)
if count > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return count
end
redis.call('DEL', KEYS[1])
return 0
",
};

/// Lease renewal.
///
/// `KEYS[1]` lease hash, `ARGV[1]` owner token, `ARGV[2]` lease in ms.
/// Returns `1` if extended, `0` if the lease is gone or owned by someone else.
pub static LOCK_EXTEND: Script = Script {
    name: "lock_extend",
    source: r"
if redis.call('HGET', KEYS[1], 'owner') == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
",
};

/// Delete a plain key only if it still holds the expected value.
///
/// `KEYS[1]` key, `ARGV[1]` expected value. Returns `1` if deleted, else `0`.
pub static COMPARE_AND_DELETE: Script = Script {
    name: "compare_and_delete",
    source: r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
};

/// Check mark, check stock, decrement, write mark - in that order.
///
/// `KEYS[1]` stock hash, `KEYS[2]` mark hash, `KEYS[3]` pending set.
/// `ARGV[1]` quantity, `ARGV[2]` token, `ARGV[3]` now ms, `ARGV[4]` deadline ms,
/// `ARGV[5]` mark TTL ms, `ARGV[6]` pending member.
///
/// Returns `{code, available}`: `1` success (remaining), `0` sold out,
/// `-1` already claimed, `-2` no stock record, `-3` negative stock observed.
pub static TRY_DECREMENT: Script = Script {
    name: "try_decrement",
    source: r"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return {-1, 0}
end
local available = redis.call('HGET', KEYS[1], 'available')
if not available then
    return {-2, 0}
end
available = tonumber(available)
if available < 0 then
    return {-3, available}
end
local quantity = tonumber(ARGV[1])
if available < quantity then
    return {0, available}
end
local remaining = redis.call('HINCRBY', KEYS[1], 'available', -quantity)
redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('HSET', KEYS[2], 'token', ARGV[2], 'quantity', quantity,
    'created_at_ms', ARGV[3], 'deadline_ms', ARGV[4], 'state', 'reserved')
redis.call('PEXPIRE', KEYS[2], ARGV[5])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[6])
return {1, remaining}
",
};

/// Return a reserved mark's units to stock and delete the mark.
///
/// `KEYS[1]` stock hash, `KEYS[2]` mark hash, `KEYS[3]` pending set.
/// `ARGV[1]` expected token (empty matches any), `ARGV[2]` product, `ARGV[3]` user.
///
/// Returns `{code, available}`: `1` released, `0` no mark, `-1` token mismatch,
/// `-2` mark already confirmed.
pub static RELEASE_RESERVATION: Script = Script {
    name: "release_reservation",
    source: r"
local mark = redis.call('HMGET', KEYS[2], 'token', 'quantity', 'state')
if not mark[1] then
    return {0, 0}
end
if ARGV[1] ~= '' and mark[1] ~= ARGV[1] then
    return {-1, 0}
end
if mark[3] ~= 'reserved' then
    return {-2, 0}
end
local remaining = redis.call('HINCRBY', KEYS[1], 'available', tonumber(mark[2]))
redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('DEL', KEYS[2])
redis.call('ZREM', KEYS[3], ARGV[2] .. '|' .. ARGV[3] .. '|' .. mark[1] .. '|' .. mark[2])
return {1, remaining}
",
};

/// Promote a reserved mark to confirmed.
///
/// `KEYS[1]` mark hash, `KEYS[2]` pending set.
/// `ARGV[1]` token, `ARGV[2]` order id, `ARGV[3]` confirmed mark TTL ms,
/// `ARGV[4]` product, `ARGV[5]` user.
///
/// Returns `1` confirmed, `2` already confirmed with this order, `0` no mark,
/// `-1` token mismatch, `-2` confirmed with a different order.
pub static CONFIRM_RESERVATION: Script = Script {
    name: "confirm_reservation",
    source: r"
local mark = redis.call('HMGET', KEYS[1], 'token', 'quantity', 'state', 'order_id')
if not mark[1] then
    return 0
end
if mark[1] ~= ARGV[1] then
    return -1
end
if mark[3] == 'confirmed' then
    if mark[4] == ARGV[2] then
        return 2
    end
    return -2
end
redis.call('HSET', KEYS[1], 'state', 'confirmed', 'order_id', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
redis.call('ZREM', KEYS[2], ARGV[4] .. '|' .. ARGV[5] .. '|' .. mark[1] .. '|' .. mark[2])
return 1
",
};

/// Release every reserved mark whose deadline has passed.
///
/// `KEYS[1]` pending set. `ARGV[1]` now ms, `ARGV[2]` batch limit, `ARGV[3]` key prefix.
/// A pending member whose mark has vanished (or was replaced by a later
/// reservation of the same user) still returns its units: the member is only
/// removed by confirm or release otherwise.
///
/// Returns the number of reservations released.
pub static EXPIRE_RESERVATIONS: Script = Script {
    name: "expire_reservations",
    source: r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local released = 0
for _, member in ipairs(due) do
    local product, user, token, quantity = string.match(member, '^([^|]+)|([^|]+)|([^|]+)|([^|]+)$')
    if product then
        local mark_key = ARGV[3] .. 'mark:' .. product .. ':' .. user
        local mark = redis.call('HMGET', mark_key, 'token', 'state')
        if mark[1] ~= token or mark[2] == 'reserved' then
            local stock_key = ARGV[3] .. 'stock:' .. product
            redis.call('HINCRBY', stock_key, 'available', tonumber(quantity))
            redis.call('HINCRBY', stock_key, 'version', 1)
            if mark[1] == token then
                redis.call('DEL', mark_key)
            end
            released = released + 1
        end
    end
    redis.call('ZREM', KEYS[1], member)
end
return released
",
};

/// Seed (or reseed) a stock counter.
///
/// `KEYS[1]` stock hash, `ARGV[1]` quantity. Returns the new version.
pub static INIT_STOCK: Script = Script {
    name: "init_stock",
    source: r"
redis.call('HSET', KEYS[1], 'available', tonumber(ARGV[1]))
return redis.call('HINCRBY', KEYS[1], 'version', 1)
",
};

/// Rebuild a stock counter from the durable baseline.
///
/// `KEYS[1]` stock hash, `KEYS[2]` pending set.
/// `ARGV[1]` baseline, `ARGV[2]` units committed in durable orders, `ARGV[3]` product.
/// Units held by pending reservations of the product are also subtracted.
///
/// Returns the repaired available quantity (never negative).
pub static REPAIR_STOCK: Script = Script {
    name: "repair_stock",
    source: r"
local held = 0
for _, member in ipairs(redis.call('ZRANGE', KEYS[2], 0, -1)) do
    local product, quantity = string.match(member, '^([^|]+)|[^|]+|[^|]+|([^|]+)$')
    if product == ARGV[3] then
        held = held + tonumber(quantity)
    end
end
local available = tonumber(ARGV[1]) - tonumber(ARGV[2]) - held
if available < 0 then
    available = 0
end
redis.call('HSET', KEYS[1], 'available', available)
redis.call('HINCRBY', KEYS[1], 'version', 1)
return available
",
};

/// Every script in the catalogue.
pub static ALL: [&Script; 10] = [
    &LOCK_ACQUIRE,
    &LOCK_RELEASE,
    &LOCK_EXTEND,
    &COMPARE_AND_DELETE,
    &TRY_DECREMENT,
    &RELEASE_RESERVATION,
    &CONFIRM_RESERVATION,
    &EXPIRE_RESERVATIONS,
    &INIT_STOCK,
    &REPAIR_STOCK,
];
