//! Request repository: encodes Request records into store hashes.
//!
//! Field layout: `uuid`, `status`, `time` (ms), `url`, `method`, `data`
//! (only when a body is present), `headers` (JSON object), `timeout` (ms).

use std::sync::Arc;

use chrono::DateTime;

use crate::domain::{Headers, HtqError, Request, RequestId, RequestStatus};
use crate::keys::Keyspace;
use crate::ports::{Fields, Store, Transaction, Versioned, WriteOp};

const F_ID: &str = "uuid";
const F_STATUS: &str = "status";
const F_TIME: &str = "time";
const F_URL: &str = "url";
const F_METHOD: &str = "method";
const F_BODY: &str = "data";
const F_HEADERS: &str = "headers";
const F_TIMEOUT: &str = "timeout";

pub(crate) fn encode(request: &Request) -> Result<Fields, HtqError> {
    let headers = serde_json::to_string(&request.headers)
        .map_err(|e| HtqError::InvalidRequest(format!("headers are not encodable: {e}")))?;

    let mut fields = Fields::from([
        (F_ID.to_string(), request.id.to_string()),
        (F_STATUS.to_string(), request.status.to_string()),
        (
            F_TIME.to_string(),
            request.created_at.timestamp_millis().to_string(),
        ),
        (F_URL.to_string(), request.url.clone()),
        (F_METHOD.to_string(), request.method.clone()),
        (F_HEADERS.to_string(), headers),
        (F_TIMEOUT.to_string(), request.timeout_ms.to_string()),
    ]);
    // Absent body is left out entirely so it never reads back as "".
    if let Some(body) = &request.body {
        fields.insert(F_BODY.to_string(), body.clone());
    }
    Ok(fields)
}

pub(crate) fn decode(id: RequestId, key: &str, mut fields: Fields) -> Result<Request, HtqError> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| HtqError::corrupt(key, format!("missing field '{name}'")))
    };

    let status = take(F_STATUS)?
        .parse::<RequestStatus>()
        .map_err(|e| HtqError::corrupt(key, e))?;
    let created_at = take(F_TIME)?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| HtqError::corrupt(key, "bad 'time'"))?;
    let url = take(F_URL)?;
    let method = take(F_METHOD)?;
    let headers: Headers = serde_json::from_str(&take(F_HEADERS)?)
        .map_err(|e| HtqError::corrupt(key, format!("bad 'headers': {e}")))?;
    let timeout_ms = take(F_TIMEOUT)?
        .parse::<u64>()
        .map_err(|e| HtqError::corrupt(key, format!("bad 'timeout': {e}")))?;
    let body = fields.remove(F_BODY);

    Ok(Request {
        id,
        status,
        created_at,
        url,
        method,
        body,
        headers,
        timeout_ms,
    })
}

/// Owns the Request entity in the store.
#[derive(Clone)]
pub struct RequestRepository {
    store: Arc<dyn Store>,
    keys: Keyspace,
}

impl RequestRepository {
    pub fn new(store: Arc<dyn Store>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub fn key(&self, id: RequestId) -> String {
        self.keys.request(id)
    }

    /// Write that creates the record; fails with `AlreadyExists` on an id
    /// collision.
    pub fn create_op(&self, request: &Request) -> Result<WriteOp, HtqError> {
        Ok(WriteOp::HashCreate {
            key: self.key(request.id),
            fields: encode(request)?,
        })
    }

    /// Write that overwrites the status field.
    pub fn status_op(&self, id: RequestId, status: RequestStatus) -> WriteOp {
        WriteOp::HashSet {
            key: self.key(id),
            fields: Fields::from([(F_STATUS.to_string(), status.to_string())]),
        }
    }

    pub async fn create(&self, request: &Request) -> Result<(), HtqError> {
        let txn = Transaction::new().push(self.create_op(request)?);
        self.store.commit(txn).await?;
        Ok(())
    }

    /// The decoded record and the version it was read at.
    pub async fn get(&self, id: RequestId) -> Result<Option<Versioned<Request>>, HtqError> {
        let key = self.key(id);
        let Some(Versioned { value, version }) = self.store.hash_get_all(&key).await? else {
            return Ok(None);
        };
        Ok(Some(Versioned {
            value: decode(id, &key, value)?,
            version,
        }))
    }

    /// Only the status field.
    pub async fn status(&self, id: RequestId) -> Result<Option<RequestStatus>, HtqError> {
        let key = self.key(id);
        self.store
            .hash_get(&key, F_STATUS)
            .await?
            .map(|raw| raw.parse().map_err(|e| HtqError::corrupt(&key, e)))
            .transpose()
    }

    /// Unconditional status overwrite.
    pub async fn set_status(&self, id: RequestId, status: RequestStatus) -> Result<(), HtqError> {
        self.store
            .commit(Transaction::new().push(self.status_op(id, status)))
            .await?;
        Ok(())
    }

    /// Overwrite the status only if the record is still at `expected_version`.
    ///
    /// Returns the record's new version. A stale version fails with
    /// `StoreError::Conflict`.
    pub async fn compare_and_set_status(
        &self,
        id: RequestId,
        expected_version: u64,
        status: RequestStatus,
    ) -> Result<u64, HtqError> {
        let txn = Transaction::guarded(self.key(id), expected_version)
            .push(self.status_op(id, status));
        self.store.commit(txn).await?;
        // one hash write bumps the version by exactly one
        Ok(expected_version + 1)
    }
}
