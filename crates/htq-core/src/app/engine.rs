//! Engine - リクエストのライフサイクル管理
//!
//! Drives a request through its states:
//!
//! ```text
//! QUEUED ──receive──▶ PENDING ──dispatch──▶ SUCCESS | TIMEOUT | ERROR
//!    │                   │                        │
//!    └──────cancel───────┴─────────cancel─────────┴──▶ CANCELED
//! ```
//!
//! # Concurrency
//! - Only `receive` and `cancel` on the same id can race.
//! - Both read the record's version and write conditionally on it; the loser
//!   re-reads and tries again.
//! - Nothing here holds a lock across an await on the dispatcher.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::domain::{
    DEFAULT_TIMEOUT_MS, HtqError, Request, RequestId, RequestStatus, Response, ResponseOutcome,
    SendRequest,
};
use crate::keys::Keyspace;
use crate::ports::{Clock, DispatchRequest, Dispatcher, IdGenerator, Store, Transaction};
use crate::queue::QueueBroker;
use crate::repo::{RequestRepository, ResponseRepository};

/// Re-reads `receive` allows itself when claiming a request loses a race.
const CLAIM_ATTEMPTS: u32 = 4;

pub const DEFAULT_CANCEL_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Outbound timeout for requests sent without one.
    pub default_timeout_ms: u64,
    /// How many times `cancel` re-reads after losing a race before it gives up.
    pub max_cancel_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_cancel_attempts: DEFAULT_CANCEL_ATTEMPTS,
        }
    }
}

/// Engine はキュー・リポジトリ・ディスパッチャを束ねる
///
/// Cheap to share: wrap it in an `Arc` and hand it to every worker.
pub struct Engine {
    requests: RequestRepository,
    responses: ResponseRepository,
    queue: QueueBroker,
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: EngineSettings,
}

impl Engine {
    pub(super) fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        keys: Keyspace,
        settings: EngineSettings,
    ) -> Self {
        Self {
            requests: RequestRepository::new(Arc::clone(&store), keys.clone()),
            responses: ResponseRepository::new(Arc::clone(&store), keys.clone()),
            queue: QueueBroker::new(Arc::clone(&store), &keys),
            store,
            dispatcher,
            clock,
            ids,
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Persist a new QUEUED request and enqueue its id in one transaction.
    pub async fn send(&self, send: SendRequest) -> Result<Request, HtqError> {
        let id = self.ids.generate_request_id();
        let request =
            send.into_request(id, self.clock.now_millis(), self.settings.default_timeout_ms)?;

        let txn = Transaction::new()
            .push(self.requests.create_op(&request)?)
            .push(self.queue.push_op(id));
        self.store.commit(txn).await?;

        debug!(request_id = %id, method = %request.method, url = %request.url, "queued request");
        Ok(request)
    }

    /// Blocking pop; no status check happens here.
    pub async fn pop(&self) -> Result<RequestId, HtqError> {
        self.queue.pop().await
    }

    /// Pop that gives up after `timeout`.
    pub async fn pop_timeout(&self, timeout: Duration) -> Result<Option<RequestId>, HtqError> {
        self.queue.pop_timeout(Some(timeout)).await
    }

    /// Re-insert an id at the tail. Leaves the request record alone.
    pub async fn push(&self, id: RequestId) -> Result<(), HtqError> {
        self.queue.push(id).await
    }

    /// Execute a popped request and record its outcome.
    ///
    /// Returns the stored response, or `None` when the request was skipped
    /// (unknown, canceled, not queued) or handed back to the queue after a
    /// failure. Failures after the request went PENDING are logged and
    /// requeued rather than returned.
    pub async fn receive(&self, id: RequestId) -> Result<Option<Response>, HtqError> {
        let Some((request, pending_version)) = self.claim(id).await? else {
            return Ok(None);
        };

        match self.execute(&request, pending_version).await {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                self.requeue(id, &err).await;
                Ok(None)
            }
        }
    }

    /// Move a QUEUED request to PENDING, guarded on the version just read.
    ///
    /// Returns the request and its version after the PENDING write.
    async fn claim(&self, id: RequestId) -> Result<Option<(Request, u64)>, HtqError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let Some(current) = self.requests.get(id).await? else {
                debug!(request_id = %id, "received unknown request");
                return Ok(None);
            };

            match current.value.status {
                RequestStatus::Queued => {}
                RequestStatus::Canceled => {
                    debug!(request_id = %id, "skipping canceled request");
                    return Ok(None);
                }
                status => {
                    warn!(request_id = %id, %status, "request in unexpected state");
                    return Ok(None);
                }
            }

            match self
                .requests
                .compare_and_set_status(id, current.version, RequestStatus::Pending)
                .await
            {
                Ok(version) => {
                    let mut request = current.value;
                    request.status = RequestStatus::Pending;
                    return Ok(Some((request, version)));
                }
                Err(err) if err.is_conflict() => {
                    debug!(request_id = %id, "request changed while claiming, re-reading");
                }
                Err(err) => return Err(err),
            }
        }

        warn!(request_id = %id, attempts = CLAIM_ATTEMPTS, "could not claim request, requeuing");
        self.queue.push(id).await?;
        Ok(None)
    }

    async fn execute(&self, request: &Request, pending_version: u64) -> Result<Response, HtqError> {
        let id = request.id;
        let recorded_at = self.clock.now_millis();

        debug!(request_id = %id, method = %request.method, url = %request.url, "sending request");
        let result = self
            .dispatcher
            .execute(DispatchRequest::from_request(request))
            .await;
        let response = Response {
            id,
            recorded_at,
            outcome: ResponseOutcome::from(result),
        };
        debug!(request_id = %id, status = %response.status(), "response received");

        let txn = Transaction::guarded(self.requests.key(id), pending_version)
            .push(self.requests.status_op(id, response.status()))
            .extend(self.responses.create_ops(&response)?);
        self.store.commit(txn).await?;

        Ok(response)
    }

    async fn requeue(&self, id: RequestId, cause: &HtqError) {
        warn!(request_id = %id, error = %cause, "receive error, requeuing request");
        if let Err(err) = self.queue.push(id).await {
            error!(request_id = %id, error = %err, "failed to requeue request");
        }
    }

    /// Cancel a request in any state.
    ///
    /// - unknown id: `false`
    /// - already canceled: `true`, nothing written
    /// - completed: status becomes CANCELED and the response is deleted
    /// - queued or pending: conditional write to CANCELED; a pending request
    ///   also gets a best-effort DELETE sent to its url
    pub async fn cancel(&self, id: RequestId) -> Result<bool, HtqError> {
        let attempts = self.settings.max_cancel_attempts;

        for attempt in 1..=attempts {
            let Some(current) = self.requests.get(id).await? else {
                debug!(request_id = %id, "cancel of unknown request");
                return Ok(false);
            };
            let status = current.value.status;

            if status == RequestStatus::Canceled {
                debug!(request_id = %id, "request already canceled");
                return Ok(true);
            }

            if status.is_completed() {
                let txn = Transaction::new()
                    .push(self.requests.status_op(id, RequestStatus::Canceled))
                    .push(self.responses.delete_op(id));
                self.store.commit(txn).await?;
                debug!(request_id = %id, previous = %status, "canceled completed request");
                return Ok(true);
            }

            match self
                .requests
                .compare_and_set_status(id, current.version, RequestStatus::Canceled)
                .await
            {
                Ok(_) => {
                    debug!(request_id = %id, previous = %status, "canceled request");
                    if status == RequestStatus::Pending {
                        self.cancel_remote(&current.value).await;
                    }
                    return Ok(true);
                }
                Err(err) if err.is_conflict() => {
                    debug!(request_id = %id, attempt, "cancel lost a race, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(HtqError::Busy { id, attempts })
    }

    /// Ask the remote endpoint to drop in-flight work. Logged only.
    async fn cancel_remote(&self, request: &Request) {
        let id = request.id;
        match self
            .dispatcher
            .execute(DispatchRequest::cancellation_of(request))
            .await
        {
            Ok(reply) if reply.is_success() => {
                debug!(request_id = %id, code = reply.status, "DELETE accepted");
            }
            Ok(reply) => {
                debug!(request_id = %id, code = reply.status, reason = %reply.reason, "DELETE rejected");
            }
            Err(err) => {
                debug!(request_id = %id, error = %err, "DELETE failed");
            }
        }
    }

    pub async fn status(&self, id: RequestId) -> Result<Option<RequestStatus>, HtqError> {
        self.requests.status(id).await
    }

    /// Full request record.
    pub async fn request(&self, id: RequestId) -> Result<Option<Request>, HtqError> {
        Ok(self.requests.get(id).await?.map(|v| v.value))
    }

    /// Requests currently waiting in the queue, head first.
    ///
    /// Ids without a record (pushed by hand) and records that fail to
    /// decode are left out.
    pub async fn queued(&self) -> Result<Vec<Request>, HtqError> {
        let mut requests = Vec::new();
        for id in self.queue.peek_all().await? {
            match self.requests.get(id).await {
                Ok(Some(current)) => requests.push(current.value),
                Ok(None) => debug!(request_id = %id, "queued id has no request record"),
                Err(err @ HtqError::Corrupt { .. }) => {
                    warn!(request_id = %id, error = %err, "skipping undecodable queued request");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(requests)
    }

    pub async fn size(&self) -> Result<usize, HtqError> {
        self.queue.size().await
    }

    pub async fn response(&self, id: RequestId) -> Result<Option<Response>, HtqError> {
        self.responses.get(id).await
    }

    /// Delete a response; the request keeps its status.
    pub async fn purge(&self, id: RequestId) -> Result<bool, HtqError> {
        self.responses.delete(id).await
    }

    /// Poll `status` every `poll` until the request is terminal or `timeout`
    /// elapses. Returns the last status seen (`None` for an unknown id).
    pub async fn await_terminal(
        &self,
        id: RequestId,
        poll: Duration,
        timeout: Duration,
    ) -> Result<Option<RequestStatus>, HtqError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status(id).await?;
            match status {
                None => return Ok(None),
                Some(s) if s.is_terminal() => return Ok(status),
                Some(_) if tokio::time::Instant::now() >= deadline => return Ok(status),
                Some(_) => tokio::time::sleep(poll).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::app::testing::{
        AlwaysConflictingStore, FixedIdGenerator, InterleavingStore, ScriptedDispatcher, ok_reply,
        plant_corrupt_request,
    };
    use crate::impls::{HttpDispatcher, InMemoryStore};
    use crate::ports::{DispatchError, StoreError};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine_with(
        dispatcher: ScriptedDispatcher,
    ) -> (Arc<InMemoryStore>, Arc<ScriptedDispatcher>, Engine) {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(dispatcher);
        let engine = EngineBuilder::new(store.clone())
            .dispatcher(dispatcher.clone())
            .build()
            .unwrap();
        (store, dispatcher, engine)
    }

    fn engine() -> (Arc<InMemoryStore>, Arc<ScriptedDispatcher>, Engine) {
        engine_with(ScriptedDispatcher::new())
    }

    #[tokio::test]
    async fn send_persists_and_enqueues() {
        let (_, _, engine) = engine();

        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        assert_eq!(request.status, RequestStatus::Queued);
        assert_eq!(request.method, "get");
        assert_eq!(request.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(engine.size().await.unwrap(), 1);
        assert_eq!(
            engine.status(request.id).await.unwrap(),
            Some(RequestStatus::Queued)
        );
        assert_eq!(engine.request(request.id).await.unwrap(), Some(request.clone()));

        assert_eq!(engine.pop().await.unwrap(), request.id);
        assert_eq!(engine.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_rejects_empty_url_without_side_effects() {
        let (_, _, engine) = engine();

        let err = engine.send(SendRequest::new("")).await.unwrap_err();

        assert!(matches!(err, HtqError::InvalidRequest(_)));
        assert_eq!(engine.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn colliding_id_is_rejected_and_not_enqueued_twice() {
        let id = RequestId::new_random();
        let store = Arc::new(InMemoryStore::new());
        let engine = EngineBuilder::new(store)
            .dispatcher(Arc::new(ScriptedDispatcher::new()))
            .id_generator(Arc::new(FixedIdGenerator(id)))
            .build()
            .unwrap();

        engine.send(SendRequest::new("http://x/1")).await.unwrap();
        let err = engine.send(SendRequest::new("http://x/2")).await.unwrap_err();

        assert!(matches!(err, HtqError::Store(StoreError::AlreadyExists(_))));
        assert_eq!(engine.size().await.unwrap(), 1);
        assert_eq!(engine.request(id).await.unwrap().unwrap().url, "http://x/1");
    }

    #[tokio::test]
    async fn receive_records_success() {
        let (_, dispatcher, engine) = engine_with(
            ScriptedDispatcher::new().reply(Ok(ok_reply(200, r#"{"ok":1}"#))),
        );
        let request = engine
            .send(SendRequest::new("http://x/1").body("payload").header("x-a", "1"))
            .await
            .unwrap();
        let id = engine.pop().await.unwrap();

        let response = engine.receive(id).await.unwrap().expect("executed");

        assert_eq!(response.status(), RequestStatus::Success);
        assert!(matches!(
            &response.outcome,
            ResponseOutcome::Success { code: 200, body, .. } if body == r#"{"ok":1}"#
        ));
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Success));
        assert_eq!(engine.response(id).await.unwrap(), Some(response));

        let calls = dispatcher.calls();
        assert_eq!(calls, vec![DispatchRequest::from_request(&request)]);
        assert_eq!(calls[0].method, "post");
        assert_eq!(calls[0].body.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn receive_records_timeout_and_error() {
        let (_, _, engine) = engine_with(
            ScriptedDispatcher::new()
                .reply(Err(DispatchError::Timeout("timed out".into())))
                .reply(Err(DispatchError::Failed("connection refused".into()))),
        );
        let slow = engine.send(SendRequest::new("http://x/slow")).await.unwrap();
        let down = engine.send(SendRequest::new("http://x/down")).await.unwrap();

        let first = engine.receive(slow.id).await.unwrap().unwrap();
        let second = engine.receive(down.id).await.unwrap().unwrap();

        assert_eq!(first.status(), RequestStatus::Timeout);
        assert_eq!(first.outcome.message(), Some("timed out"));
        assert_eq!(second.status(), RequestStatus::Error);
        assert_eq!(second.outcome.message(), Some("connection refused"));
        assert_eq!(engine.status(slow.id).await.unwrap(), Some(RequestStatus::Timeout));
        assert_eq!(engine.status(down.id).await.unwrap(), Some(RequestStatus::Error));
    }

    #[tokio::test]
    async fn non_2xx_reply_is_still_success() {
        let (_, _, engine) =
            engine_with(ScriptedDispatcher::new().reply(Ok(ok_reply(503, "busy"))));
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        let response = engine.receive(request.id).await.unwrap().unwrap();

        assert!(matches!(response.outcome, ResponseOutcome::Success { code: 503, .. }));
    }

    #[tokio::test]
    async fn receive_of_unknown_id_is_a_noop() {
        let (_, dispatcher, engine) = engine();

        assert_eq!(engine.receive(RequestId::new_random()).await.unwrap(), None);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn second_receive_does_not_dispatch_again() {
        let (_, dispatcher, engine) = engine();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        engine.receive(request.id).await.unwrap().unwrap();
        assert_eq!(engine.receive(request.id).await.unwrap(), None);

        assert_eq!(dispatcher.calls().len(), 1);
        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Success));
    }

    #[tokio::test]
    async fn canceled_while_queued_is_skipped() {
        let (_, dispatcher, engine) = engine();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        assert!(engine.cancel(request.id).await.unwrap());
        let id = engine.pop().await.unwrap();
        assert_eq!(engine.receive(id).await.unwrap(), None);

        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Canceled));
        assert_eq!(engine.response(id).await.unwrap(), None);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unknown_is_false() {
        let (_, dispatcher, engine) = engine();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        assert!(engine.cancel(request.id).await.unwrap());
        assert!(engine.cancel(request.id).await.unwrap());
        assert!(!engine.cancel(RequestId::new_random()).await.unwrap());
        // queued cancel never reaches out to the remote
        assert_eq!(dispatcher.calls_with_method("delete"), 0);
    }

    #[tokio::test]
    async fn cancel_of_completed_request_deletes_response() {
        let (_, dispatcher, engine) = engine();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();
        engine.receive(request.id).await.unwrap().unwrap();

        assert!(engine.cancel(request.id).await.unwrap());

        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Canceled));
        assert_eq!(engine.response(request.id).await.unwrap(), None);
        assert_eq!(dispatcher.calls_with_method("delete"), 0);
    }

    #[tokio::test]
    async fn purge_keeps_status() {
        let (_, _, engine) = engine();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();
        engine.receive(request.id).await.unwrap().unwrap();

        assert!(engine.purge(request.id).await.unwrap());
        assert!(!engine.purge(request.id).await.unwrap());

        assert_eq!(engine.response(request.id).await.unwrap(), None);
        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Success));
    }

    #[tokio::test]
    async fn cancel_during_dispatch_discards_the_response() {
        let (dispatcher, gate) = ScriptedDispatcher::gated();
        let (_, dispatcher, engine) = engine_with(dispatcher);
        let engine = Arc::new(engine);
        let request = engine.send(SendRequest::new("http://x/slow")).await.unwrap();
        let id = engine.pop().await.unwrap();

        let worker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.receive(id).await })
        };
        gate.entered.notified().await;
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Pending));

        assert!(engine.cancel(id).await.unwrap());
        gate.release.notify_one();
        let received = worker.await.unwrap().unwrap();

        assert_eq!(received, None);
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Canceled));
        assert_eq!(engine.response(id).await.unwrap(), None);
        // the losing receive hands the id back; the next receive skips it
        assert_eq!(engine.size().await.unwrap(), 1);
        assert_eq!(engine.receive(engine.pop().await.unwrap()).await.unwrap(), None);

        let deletes: Vec<_> = dispatcher
            .calls()
            .into_iter()
            .filter(|c| c.method == "delete")
            .collect();
        assert_eq!(deletes, vec![DispatchRequest::cancellation_of(&request)]);
    }

    #[tokio::test]
    async fn commit_failure_requeues_the_id() {
        let (dispatcher, gate) = ScriptedDispatcher::gated();
        let (store, _, engine) = engine_with(dispatcher);
        let engine = Arc::new(engine);
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();
        let id = engine.pop().await.unwrap();

        let worker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.receive(id).await })
        };
        gate.entered.notified().await;
        // the PENDING write already happened; fail the outcome commit
        store.fail_next_commits(1).await;
        gate.release.notify_one();

        assert_eq!(worker.await.unwrap().unwrap(), None);
        assert_eq!(engine.size().await.unwrap(), 1);
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Pending));
        assert_eq!(engine.response(id).await.unwrap(), None);

        // a requeued PENDING request is skipped until an operator cancels it
        assert_eq!(engine.pop().await.unwrap(), request.id);
        assert_eq!(engine.receive(id).await.unwrap(), None);
        assert!(engine.cancel(id).await.unwrap());
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Canceled));
    }

    #[tokio::test]
    async fn cancel_gives_up_after_max_attempts() {
        let store = Arc::new(AlwaysConflictingStore::default());
        let engine = EngineBuilder::new(store)
            .dispatcher(Arc::new(ScriptedDispatcher::new()))
            .max_cancel_attempts(3)
            .build()
            .unwrap();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        let err = engine.cancel(request.id).await.unwrap_err();

        assert!(matches!(err, HtqError::Busy { attempts: 3, .. }));
        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Queued));
    }

    #[tokio::test]
    async fn cancel_retries_after_receive_completes_first() {
        let store = Arc::new(InterleavingStore::default());
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        let engine = EngineBuilder::new(store.clone())
            .dispatcher(dispatcher.clone())
            .build()
            .unwrap();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();
        let id = request.id;
        engine.claim(id).await.unwrap().expect("claimed");

        // the worker's outcome commit lands between cancel's read and write
        let response = Response {
            id,
            recorded_at: request.created_at,
            outcome: ResponseOutcome::from(Ok::<_, DispatchError>(ok_reply(200, "done"))),
        };
        store.arm(
            Transaction::new()
                .push(engine.requests.status_op(id, RequestStatus::Success))
                .extend(engine.responses.create_ops(&response).unwrap()),
        );

        assert!(engine.cancel(id).await.unwrap());

        assert_eq!(store.conflicts(), 1);
        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Canceled));
        assert_eq!(engine.response(id).await.unwrap(), None);
        // the retry took the completed path, so no DELETE went out
        assert_eq!(dispatcher.calls_with_method("delete"), 0);
    }

    #[tokio::test]
    async fn queued_skips_undecodable_records() {
        let (store, _, engine) = engine();
        let a = engine.send(SendRequest::new("http://x/a")).await.unwrap();
        plant_corrupt_request(store.as_ref()).await;
        let b = engine.send(SendRequest::new("http://x/b")).await.unwrap();

        let queued = engine.queued().await.unwrap();

        assert_eq!(queued, vec![a, b]);
        assert_eq!(engine.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn receive_requeues_when_claim_keeps_conflicting() {
        let store = Arc::new(AlwaysConflictingStore::default());
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        let engine = EngineBuilder::new(store)
            .dispatcher(dispatcher.clone())
            .build()
            .unwrap();
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();
        engine.pop().await.unwrap();

        assert_eq!(engine.receive(request.id).await.unwrap(), None);

        assert_eq!(engine.size().await.unwrap(), 1);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn queued_lists_records_in_fifo_order() {
        let (_, _, engine) = engine();
        let a = engine.send(SendRequest::new("http://x/a")).await.unwrap();
        let b = engine.send(SendRequest::new("http://x/b")).await.unwrap();
        engine.push(RequestId::new_random()).await.unwrap();

        let queued = engine.queued().await.unwrap();

        assert_eq!(queued, vec![a, b]);
        assert_eq!(engine.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pop_timeout_on_empty_queue() {
        let (_, _, engine) = engine();

        let popped = engine.pop_timeout(Duration::from_millis(20)).await.unwrap();

        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn await_terminal_sees_completion() {
        let (_, _, engine) = engine();
        let engine = Arc::new(engine);
        let request = engine.send(SendRequest::new("http://x/1")).await.unwrap();

        let queued = engine
            .await_terminal(request.id, Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(queued, Some(RequestStatus::Queued));

        let worker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.receive(request.id).await })
        };
        let done = engine
            .await_terminal(request.id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        worker.await.unwrap().unwrap();

        assert_eq!(done, Some(RequestStatus::Success));
        assert_eq!(
            engine
                .await_terminal(RequestId::new_random(), Duration::from_millis(5), Duration::ZERO)
                .await
                .unwrap(),
            None
        );
    }

    fn http_engine() -> Engine {
        EngineBuilder::new(Arc::new(InMemoryStore::new()))
            .dispatcher(Arc::new(HttpDispatcher::new().unwrap()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_success_against_http_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":1}"#))
            .expect(1)
            .mount(&server)
            .await;
        let engine = http_engine();

        let request = engine
            .send(SendRequest::new(format!("{}/1", server.uri())))
            .await
            .unwrap();
        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Queued));
        assert_eq!(engine.size().await.unwrap(), 1);

        let id = engine.pop().await.unwrap();
        assert_eq!(id, request.id);
        assert_eq!(engine.size().await.unwrap(), 0);
        engine.receive(id).await.unwrap();

        assert_eq!(engine.status(id).await.unwrap(), Some(RequestStatus::Success));
        let response = engine.response(id).await.unwrap().unwrap();
        match response.outcome {
            ResponseOutcome::Success { code, body, .. } => {
                assert_eq!(code, 200);
                assert_eq!(body, r#"{"ok":1}"#);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn end_to_end_unreachable_host_is_error() {
        let engine = http_engine();
        let request = engine
            .send(SendRequest::new("http://127.0.0.1:1/").timeout_ms(2_000))
            .await
            .unwrap();

        let response = engine.receive(request.id).await.unwrap().unwrap();

        assert_eq!(response.status(), RequestStatus::Error);
        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Error));
    }

    #[tokio::test]
    async fn end_to_end_cancel_of_pending_sends_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/job"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let engine = Arc::new(http_engine());
        let request = engine
            .send(SendRequest::new(format!("{}/job", server.uri())))
            .await
            .unwrap();

        let worker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.receive(request.id).await })
        };
        while engine.status(request.id).await.unwrap() != Some(RequestStatus::Pending) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.cancel(request.id).await.unwrap());
        assert_eq!(worker.await.unwrap().unwrap(), None);

        assert_eq!(engine.status(request.id).await.unwrap(), Some(RequestStatus::Canceled));
        assert_eq!(engine.response(request.id).await.unwrap(), None);
    }
}
