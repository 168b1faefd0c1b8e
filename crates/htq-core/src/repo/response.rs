//! Response repository.
//!
//! Field layout: `uuid`, `status`, `time` (ms); success adds `code`,
//! `reason`, `elapsed` (ms), `headers` (JSON object) and `data`; timeout and
//! error add `message`.

use std::sync::Arc;

use chrono::DateTime;

use crate::domain::{Headers, HtqError, RequestId, Response, ResponseOutcome};
use crate::keys::Keyspace;
use crate::ports::{Fields, Store, Transaction, WriteOp};

pub(crate) fn encode(response: &Response) -> Result<Fields, HtqError> {
    let mut fields = Fields::from([
        ("uuid".to_string(), response.id.to_string()),
        ("status".to_string(), response.status().to_string()),
        (
            "time".to_string(),
            response.recorded_at.timestamp_millis().to_string(),
        ),
    ]);
    match &response.outcome {
        ResponseOutcome::Success {
            code,
            reason,
            elapsed_ms,
            headers,
            body,
        } => {
            let headers = serde_json::to_string(headers).map_err(|e| {
                HtqError::InvalidRequest(format!("response headers are not encodable: {e}"))
            })?;
            fields.extend([
                ("code".to_string(), code.to_string()),
                ("reason".to_string(), reason.clone()),
                ("elapsed".to_string(), elapsed_ms.to_string()),
                ("headers".to_string(), headers),
                ("data".to_string(), body.clone()),
            ]);
        }
        ResponseOutcome::Timeout { message } | ResponseOutcome::Error { message } => {
            fields.insert("message".to_string(), message.clone());
        }
    }
    Ok(fields)
}

pub(crate) fn decode(id: RequestId, key: &str, mut fields: Fields) -> Result<Response, HtqError> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| HtqError::corrupt(key, format!("missing field '{name}'")))
    };

    let recorded_at = take("time")?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| HtqError::corrupt(key, "bad 'time'"))?;

    let outcome = match take("status")?.as_str() {
        "success" => ResponseOutcome::Success {
            code: take("code")?
                .parse()
                .map_err(|e| HtqError::corrupt(key, format!("bad 'code': {e}")))?,
            reason: take("reason")?,
            elapsed_ms: take("elapsed")?
                .parse()
                .map_err(|e| HtqError::corrupt(key, format!("bad 'elapsed': {e}")))?,
            headers: serde_json::from_str::<Headers>(&take("headers")?)
                .map_err(|e| HtqError::corrupt(key, format!("bad 'headers': {e}")))?,
            body: take("data")?,
        },
        "timeout" => ResponseOutcome::Timeout {
            message: take("message")?,
        },
        "error" => ResponseOutcome::Error {
            message: take("message")?,
        },
        other => {
            return Err(HtqError::corrupt(
                key,
                format!("'{other}' is not a response status"),
            ));
        }
    };

    Ok(Response {
        id,
        recorded_at,
        outcome,
    })
}

/// Owns the Response entity in the store.
#[derive(Clone)]
pub struct ResponseRepository {
    store: Arc<dyn Store>,
    keys: Keyspace,
}

impl ResponseRepository {
    pub fn new(store: Arc<dyn Store>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub fn key(&self, id: RequestId) -> String {
        self.keys.response(id)
    }

    /// Write that replaces any previous response for the id.
    pub fn create_ops(&self, response: &Response) -> Result<Vec<WriteOp>, HtqError> {
        let key = self.key(response.id);
        Ok(vec![
            WriteOp::Delete { key: key.clone() },
            WriteOp::HashSet {
                key,
                fields: encode(response)?,
            },
        ])
    }

    pub fn delete_op(&self, id: RequestId) -> WriteOp {
        WriteOp::Delete { key: self.key(id) }
    }

    pub async fn create(&self, response: &Response) -> Result<(), HtqError> {
        let txn = Transaction {
            guard: None,
            ops: self.create_ops(response)?,
        };
        self.store.commit(txn).await?;
        Ok(())
    }

    pub async fn get(&self, id: RequestId) -> Result<Option<Response>, HtqError> {
        let key = self.key(id);
        self.store
            .hash_get_all(&key)
            .await?
            .map(|stored| decode(id, &key, stored.value))
            .transpose()
    }

    /// Returns whether a response existed.
    pub async fn delete(&self, id: RequestId) -> Result<bool, HtqError> {
        Ok(self.store.delete(&self.key(id)).await?)
    }
}
