//! Test doubles shared by the engine and worker tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::{Headers, RequestId, SendRequest};
use crate::impls::InMemoryStore;
use crate::keys::Keyspace;
use crate::ports::{
    DispatchError, DispatchRequest, DispatchResponse, Dispatcher, Fields, IdGenerator, Store,
    StoreError, Transaction, Versioned, WriteOp,
};
use crate::repo::request::encode;

pub(crate) fn ok_reply(status: u16, body: &str) -> DispatchResponse {
    DispatchResponse {
        status,
        reason: "OK".to_string(),
        headers: Headers::from([("content-type".to_string(), "application/json".to_string())]),
        body: body.to_string(),
        elapsed: Duration::from_millis(3),
    }
}

/// Pauses a dispatch until released.
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Dispatcher that records every call and answers from a script.
///
/// - `delete` calls always answer 204 and never wait on the gate.
/// - Other calls take the next scripted reply (default: 200 `{"ok": 1}`).
#[derive(Default)]
pub(crate) struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Result<DispatchResponse, DispatchError>>>,
    calls: Mutex<Vec<DispatchRequest>>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let dispatcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (dispatcher, gate)
    }

    pub fn reply(self, reply: Result<DispatchResponse, DispatchError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<DispatchRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with_method(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        let is_delete = request.method == "delete";
        self.calls.lock().unwrap().push(request);
        if is_delete {
            return Ok(ok_reply(204, ""));
        }
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ok_reply(200, r#"{"ok": 1}"#)))
    }
}

/// Always hands out the same id.
pub(crate) struct FixedIdGenerator(pub RequestId);

impl IdGenerator for FixedIdGenerator {
    fn generate_request_id(&self) -> RequestId {
        self.0
    }
}

/// In-memory store whose guarded commits always lose the race.
#[derive(Default)]
pub(crate) struct AlwaysConflictingStore {
    pub inner: InMemoryStore,
}

#[async_trait]
impl Store for AlwaysConflictingStore {
    async fn hash_get_all(&self, key: &str) -> Result<Option<Versioned<Fields>>, StoreError> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.hash_get(key, field).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.list_len(key).await
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.inner.list_range(key, count).await
    }

    async fn list_pop_front(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        self.inner.list_pop_front(key, timeout).await
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        if let Some(guard) = &txn.guard {
            return Err(StoreError::Conflict(guard.key.clone()));
        }
        self.inner.commit(txn).await
    }
}

/// Queue an id whose request record has an unknown status.
pub(crate) async fn plant_corrupt_request(store: &dyn Store) -> RequestId {
    let keys = Keyspace::default();
    let id = RequestId::new_random();
    let request = SendRequest::new("http://x/corrupt")
        .into_request(id, chrono::Utc::now(), 1_000)
        .unwrap();
    let mut fields = encode(&request).unwrap();
    fields.insert("status".to_string(), "bogus".to_string());

    store
        .commit(
            Transaction::new()
                .push(WriteOp::HashCreate {
                    key: keys.request(id),
                    fields,
                })
                .push(WriteOp::ListPush {
                    key: keys.queue(),
                    value: id.to_string(),
                }),
        )
        .await
        .unwrap();
    id
}

/// In-memory store that commits an armed transaction just before the next
/// guarded commit, so that commit sees a record changed under it.
#[derive(Default)]
pub(crate) struct InterleavingStore {
    pub inner: InMemoryStore,
    armed: Mutex<Option<Transaction>>,
    conflicts: Mutex<usize>,
}

impl InterleavingStore {
    pub fn arm(&self, txn: Transaction) {
        *self.armed.lock().unwrap() = Some(txn);
    }

    pub fn conflicts(&self) -> usize {
        *self.conflicts.lock().unwrap()
    }
}

#[async_trait]
impl Store for InterleavingStore {
    async fn hash_get_all(&self, key: &str) -> Result<Option<Versioned<Fields>>, StoreError> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.hash_get(key, field).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.list_len(key).await
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.inner.list_range(key, count).await
    }

    async fn list_pop_front(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        self.inner.list_pop_front(key, timeout).await
    }

    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        if txn.guard.is_some() {
            let armed = self.armed.lock().unwrap().take();
            if let Some(first) = armed {
                self.inner.commit(first).await?;
            }
        }
        let result = self.inner.commit(txn).await;
        if let Err(StoreError::Conflict(_)) = &result {
            *self.conflicts.lock().unwrap() += 1;
        }
        result
    }
}
