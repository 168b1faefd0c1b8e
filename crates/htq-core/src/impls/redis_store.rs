//! RedisStore - 本番用ストア（Redis）
//!
//! # Layout
//! - Records are Redis hashes. The hash version lives in a reserved
//!   `__version` field that is stripped before fields are returned.
//! - Queues are Redis lists (`RPUSH` to the tail, `BLPOP` from the head).
//!
//! # Transactions
//! A `Transaction` is shipped to the server as JSON and applied by one Lua
//! script, which Redis runs atomically: guard check, existence checks, then
//! every write, or nothing at all.
//!
//! # Connections
//! - The shared `ConnectionManager` is created lazily on first use and then
//!   reused for the lifetime of the store.
//! - `BLPOP` holds its connection until it returns, so blocking pops borrow a
//!   dedicated connection from a small pool instead of stalling the shared
//!   one.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, Script};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

use crate::ports::{Fields, Store, StoreError, Transaction, Versioned, WriteOp};

/// Reserved hash field holding the record version.
pub const VERSION_FIELD: &str = "__version";

const COMMIT_SCRIPT: &str = r#"
local txn = cjson.decode(ARGV[1])

if txn.guard then
  local current = tonumber(redis.call('HGET', KEYS[txn.guard.key], ARGV[2]) or '0')
  if current ~= txn.guard.version then
    return 'CONFLICT:' .. txn.guard.key
  end
end

for _, op in ipairs(txn.ops) do
  if op.kind == 'hash_create' and redis.call('EXISTS', KEYS[op.key]) == 1 then
    return 'EXISTS:' .. op.key
  end
  local expected = nil
  if op.kind == 'hash_set' or op.kind == 'hash_create' then
    expected = 'hash'
  elseif op.kind == 'list_push' then
    expected = 'list'
  end
  if expected then
    local actual = redis.call('TYPE', KEYS[op.key]).ok
    if actual ~= 'none' and actual ~= expected then
      return 'WRONGTYPE:' .. op.key
    end
  end
end

for _, op in ipairs(txn.ops) do
  local key = KEYS[op.key]
  if op.kind == 'hash_create' or op.kind == 'hash_set' then
    if #op.fields > 0 then
      redis.call('HSET', key, unpack(op.fields))
    end
    redis.call('HINCRBY', key, ARGV[2], 1)
  elseif op.kind == 'delete' then
    redis.call('DEL', key)
  elseif op.kind == 'list_push' then
    redis.call('RPUSH', key, op.value)
  end
end

return 'OK'
"#;

/// Wire form of a transaction. Keys are passed as `KEYS` and referenced by
/// their 1-based index.
#[derive(Debug, Serialize)]
struct ScriptTxn {
    // cjson decodes `null` to a truthy sentinel, so leave the field out.
    #[serde(skip_serializing_if = "Option::is_none")]
    guard: Option<ScriptGuard>,
    ops: Vec<ScriptOp>,
}

#[derive(Debug, Serialize)]
struct ScriptGuard {
    key: usize,
    version: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScriptOp {
    HashCreate { key: usize, fields: Vec<String> },
    HashSet { key: usize, fields: Vec<String> },
    Delete { key: usize },
    ListPush { key: usize, value: String },
}

/// Flatten a transaction into (`KEYS`, JSON payload).
fn encode_txn(txn: Transaction) -> Result<(Vec<String>, String), StoreError> {
    let mut keys: Vec<String> = Vec::new();
    let mut key_index = |key: String| -> usize {
        match keys.iter().position(|k| *k == key) {
            Some(i) => i + 1,
            None => {
                keys.push(key);
                keys.len()
            }
        }
    };
    let flatten = |fields: Fields| -> Result<Vec<String>, StoreError> {
        let mut flat = Vec::with_capacity(fields.len() * 2);
        for (name, value) in fields {
            if name == VERSION_FIELD {
                return Err(StoreError::Unavailable(format!(
                    "field name {VERSION_FIELD} is reserved"
                )));
            }
            flat.push(name);
            flat.push(value);
        }
        Ok(flat)
    };

    let guard = txn.guard.map(|g| ScriptGuard {
        key: key_index(g.key),
        version: g.version,
    });
    let mut ops = Vec::with_capacity(txn.ops.len());
    for op in txn.ops {
        ops.push(match op {
            WriteOp::HashCreate { key, fields } => ScriptOp::HashCreate {
                key: key_index(key),
                fields: flatten(fields)?,
            },
            WriteOp::HashSet { key, fields } => ScriptOp::HashSet {
                key: key_index(key),
                fields: flatten(fields)?,
            },
            WriteOp::Delete { key } => ScriptOp::Delete {
                key: key_index(key),
            },
            WriteOp::ListPush { key, value } => ScriptOp::ListPush {
                key: key_index(key),
                value,
            },
        });
    }

    let payload = serde_json::to_string(&ScriptTxn { guard, ops })
        .map_err(|e| StoreError::Unavailable(format!("failed to encode transaction: {e}")))?;
    Ok((keys, payload))
}

/// Map the script's status reply back onto a result.
fn decode_reply(reply: &str, keys: &[String]) -> Result<(), StoreError> {
    let key_at = |index: &str| -> String {
        index
            .parse::<usize>()
            .ok()
            .and_then(|i| keys.get(i.wrapping_sub(1)))
            .cloned()
            .unwrap_or_else(|| index.to_string())
    };
    match reply.split_once(':') {
        None if reply == "OK" => Ok(()),
        Some(("CONFLICT", index)) => Err(StoreError::Conflict(key_at(index))),
        Some(("EXISTS", index)) => Err(StoreError::AlreadyExists(key_at(index))),
        Some(("WRONGTYPE", index)) => Err(StoreError::WrongType(key_at(index))),
        _ => Err(StoreError::Unavailable(format!(
            "unexpected commit reply: {reply}"
        ))),
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// `Store` backed by a Redis server.
///
/// Clones are not provided: share one instance behind an `Arc`.
pub struct RedisStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    commit_script: Script,
}

impl RedisStore {
    /// Parse the URL. No connection is made until the first operation.
    ///
    /// # Errors
    /// Returns `Unavailable` if the URL is malformed.
    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            blocking: Mutex::new(Vec::new()),
            commit_script: Script::new(COMMIT_SCRIPT),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(unavailable)?;
                tracing::info!("Redis store connected");
                Ok::<_, StoreError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hash_get_all(&self, key: &str) -> Result<Option<Versioned<Fields>>, StoreError> {
        let mut conn = self.conn().await?;
        let mut fields: Fields = conn.hgetall(key).await.map_err(unavailable)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let version = fields
            .remove(VERSION_FIELD)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(Versioned {
            value: fields,
            version,
        }))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.hget(key, field).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        conn.llen(key).await.map_err(unavailable)
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let stop = isize::try_from(count - 1).unwrap_or(isize::MAX);
        conn.lrange(key, 0, stop).await.map_err(unavailable)
    }

    async fn list_pop_front(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        // BLPOP treats 0 as "forever"; a zero timeout means "don't wait".
        if timeout == Some(Duration::ZERO) {
            let mut conn = self.conn().await?;
            return redis::cmd("LPOP")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(unavailable);
        }
        let seconds = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);

        let mut conn = self.checkout_blocking().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        self.checkin_blocking(conn).await;

        Ok(popped.map(|(_, value)| value))
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        if txn.ops.is_empty() && txn.guard.is_none() {
            return Ok(());
        }
        let (keys, payload) = encode_txn(txn)?;

        let mut invocation = self.commit_script.prepare_invoke();
        for key in &keys {
            invocation.key(key);
        }
        invocation.arg(payload).arg(VERSION_FIELD);

        let mut conn = self.conn().await?;
        let reply: String = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        decode_reply(&reply, &keys)
    }
}
