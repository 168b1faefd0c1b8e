//! Store port - 永続ストアの抽象化
//!
//! The durable store shared by every producer and worker. It offers hashes
//! (records), lists (the queue) and an all-or-nothing transaction that can be
//! guarded by a per-hash version.
//!
//! # Versioning
//! - Every `HashCreate` / `HashSet` increments the hash version by exactly 1.
//! - A new hash starts at version 1.
//! - A guarded transaction is rejected with `Conflict` when the stored
//!   version differs from the expected one; nothing is applied.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Fields of a hash.
pub type Fields = HashMap<String, String>;

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The guarded key changed since it was read.
    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create a hash; the transaction fails with `AlreadyExists` if the key
    /// is present.
    HashCreate { key: String, fields: Fields },

    /// Set (merge) fields of a hash, creating it when absent.
    HashSet { key: String, fields: Fields },

    /// Remove a key of any kind.
    Delete { key: String },

    /// Append to the tail of a list.
    ListPush { key: String, value: String },
}

/// Expected version of one hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub key: String,
    pub version: u64,
}

/// Ordered set of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub guard: Option<Guard>,
    pub ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only commit if `key` is still at `version`.
    pub fn guarded(key: impl Into<String>, version: u64) -> Self {
        Self {
            guard: Some(Guard {
                key: key.into(),
                version,
            }),
            ops: Vec::new(),
        }
    }

    pub fn push(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn extend(mut self, ops: impl IntoIterator<Item = WriteOp>) -> Self {
        self.ops.extend(ops);
        self
    }
}

/// Store は全プロセスで共有される永続ストア
///
/// Implementations must be safe to share across tasks (`Arc<dyn Store>`).
#[async_trait]
pub trait Store: Send + Sync {
    /// All fields of a hash with its current version, `None` if absent.
    async fn hash_get_all(&self, key: &str) -> Result<Option<Versioned<Fields>>, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Remove a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Up to `count` entries from the head of a list, head first.
    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;

    /// Remove and return the head of a list, waiting for one to arrive.
    ///
    /// `None` waits forever. `Some(timeout)` gives up after `timeout` and
    /// returns `Ok(None)`. At most one caller receives any given entry.
    async fn list_pop_front(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError>;

    /// Apply a transaction atomically.
    async fn commit(&self, txn: Transaction) -> Result<(), StoreError>;
}
