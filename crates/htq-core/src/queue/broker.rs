//! Queue broker: FIFO list of request ids waiting for a worker.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{HtqError, RequestId};
use crate::keys::Keyspace;
use crate::ports::{Store, Transaction, WriteOp};

/// FIFO of pending request ids.
///
/// Design:
/// - Only ids travel through the queue; records live in the repositories.
/// - Pushes go to the tail, pops take the head.
/// - No validation against the request repository.
#[derive(Clone)]
pub struct QueueBroker {
    store: Arc<dyn Store>,
    key: String,
}

impl QueueBroker {
    pub fn new(store: Arc<dyn Store>, keys: &Keyspace) -> Self {
        Self {
            store,
            key: keys.queue(),
        }
    }

    /// Write that appends `id` to the tail, for use inside a transaction.
    pub fn push_op(&self, id: RequestId) -> WriteOp {
        WriteOp::ListPush {
            key: self.key.clone(),
            value: id.to_string(),
        }
    }

    pub async fn push(&self, id: RequestId) -> Result<(), HtqError> {
        self.store
            .commit(Transaction::new().push(self.push_op(id)))
            .await?;
        Ok(())
    }

    /// Remove and return the head id, waiting as long as it takes.
    pub async fn pop(&self) -> Result<RequestId, HtqError> {
        loop {
            if let Some(id) = self.pop_timeout(None).await? {
                return Ok(id);
            }
        }
    }

    /// Like `pop`, but gives up after `timeout` (`None` waits forever).
    pub async fn pop_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<RequestId>, HtqError> {
        let Some(raw) = self.store.list_pop_front(&self.key, timeout).await? else {
            return Ok(None);
        };
        raw.parse::<RequestId>()
            .map(Some)
            .map_err(|_| HtqError::corrupt(&self.key, format!("queued id '{raw}' is not a uuid")))
    }

    /// Best-effort FIFO snapshot, bounded by the length seen at call time.
    pub async fn peek_all(&self) -> Result<Vec<RequestId>, HtqError> {
        let len = self.store.list_len(&self.key).await?;
        self.store
            .list_range(&self.key, len)
            .await?
            .into_iter()
            .map(|raw| {
                raw.parse::<RequestId>().map_err(|_| {
                    HtqError::corrupt(&self.key, format!("queued id '{raw}' is not a uuid"))
                })
            })
            .collect()
    }

    pub async fn size(&self) -> Result<usize, HtqError> {
        Ok(self.store.list_len(&self.key).await?)
    }
}
