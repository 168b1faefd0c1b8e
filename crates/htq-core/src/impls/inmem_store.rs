//! InMemoryStore - 開発用・テスト用のストア
//!
//! Single-process implementation of the `Store` port. All state sits behind
//! one tokio `Mutex`, so every transaction is trivially atomic; blocked pops
//! wait on a `Notify` that every list push wakes.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{Fields, Store, StoreError, Transaction, Versioned, WriteOp};

#[derive(Debug, Clone)]
enum Entry {
    Hash { fields: Fields, version: u64 },
    List(VecDeque<String>),
}

#[derive(Default)]
struct InMemoryState {
    entries: HashMap<String, Entry>,

    /// Remaining commits to fail with `Unavailable` (failure injection).
    failing_commits: usize,
}

impl InMemoryState {
    fn hash(&self, key: &str) -> Result<Option<(&Fields, u64)>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash { fields, version }) => Ok(Some((fields, *version))),
            Some(Entry::List(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => Ok(list),
            Entry::Hash { .. } => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn pop_front(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let Entry::List(list) = entry else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let head = list.pop_front();
        if list.is_empty() {
            self.entries.remove(key);
        }
        Ok(head)
    }

    /// Every check runs before the first write, so a rejected transaction
    /// leaves no trace.
    fn validate(&self, txn: &Transaction) -> Result<(), StoreError> {
        if let Some(guard) = &txn.guard {
            let current = self.hash(&guard.key)?.map(|(_, version)| version).unwrap_or(0);
            if current != guard.version {
                return Err(StoreError::Conflict(guard.key.clone()));
            }
        }
        for op in &txn.ops {
            match op {
                WriteOp::HashCreate { key, .. } if self.entries.contains_key(key) => {
                    return Err(StoreError::AlreadyExists(key.clone()));
                }
                WriteOp::HashSet { key, .. } if matches!(self.entries.get(key), Some(Entry::List(_))) => {
                    return Err(StoreError::WrongType(key.clone()));
                }
                WriteOp::ListPush { key, .. } if matches!(self.entries.get(key), Some(Entry::Hash { .. })) => {
                    return Err(StoreError::WrongType(key.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns whether a list received an entry.
    fn apply(&mut self, op: WriteOp) -> Result<bool, StoreError> {
        match op {
            WriteOp::HashCreate { key, fields } | WriteOp::HashSet { key, fields } => {
                match self.entries.entry(key.clone()).or_insert_with(|| Entry::Hash {
                    fields: Fields::new(),
                    version: 0,
                }) {
                    Entry::Hash {
                        fields: current,
                        version,
                    } => {
                        current.extend(fields);
                        *version += 1;
                        Ok(false)
                    }
                    Entry::List(_) => Err(StoreError::WrongType(key)),
                }
            }
            WriteOp::Delete { key } => {
                self.entries.remove(&key);
                Ok(false)
            }
            WriteOp::ListPush { key, value } => {
                self.list_mut(&key)?.push_back(value);
                Ok(true)
            }
        }
    }
}

/// In-memory `Store`.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
    notify: Notify,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with `StoreError::Unavailable`.
    #[cfg(test)]
    pub(crate) async fn fail_next_commits(&self, n: usize) {
        self.state.lock().await.failing_commits = n;
    }

    /// Current version of a hash (0 when absent).
    #[cfg(test)]
    pub(crate) async fn version_of(&self, key: &str) -> u64 {
        let state = self.state.lock().await;
        match state.entries.get(key) {
            Some(Entry::Hash { version, .. }) => *version,
            _ => 0,
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn hash_get_all(&self, key: &str) -> Result<Option<Versioned<Fields>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.hash(key)?.map(|(fields, version)| Versioned {
            value: fields.clone(),
            version,
        }))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .hash(key)?
            .and_then(|(fields, _)| fields.get(field).cloned()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.entries.remove(key).is_some())
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        match state.entries.get(key) {
            None => Ok(0),
            Some(Entry::List(list)) => Ok(list.len()),
            Some(Entry::Hash { .. }) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        match state.entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => Ok(list.iter().take(count).cloned().collect()),
            Some(Entry::Hash { .. }) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_pop_front(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Register interest before looking, so a push between the check
            // and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(head) = self.state.lock().await.pop_front(key)? {
                return Ok(Some(head));
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => return Ok(None),
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        let pushed = {
            let mut state = self.state.lock().await;
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                return Err(StoreError::Unavailable("injected commit failure".to_string()));
            }
            state.validate(&txn)?;

            let mut pushed = false;
            for op in txn.ops {
                pushed |= state.apply(op)?;
            }
            pushed
        };

        // Notify outside the lock
        if pushed {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}
