//! WorkerGroup - キュー消費ループ
//!
//! Each worker repeats `pop_timeout(poll)` → `receive(id)` until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::Engine;
use crate::domain::RequestId;

/// Worker group handle.
/// - `request_shutdown` でワーカー全体が止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one engine.
    ///
    /// `poll` bounds every wait on the queue, so it is also the longest an
    /// idle worker takes to notice shutdown.
    pub fn spawn(n: usize, engine: Arc<Engine>, poll: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let engine = Arc::clone(&engine);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, engine, poll, &mut rx).await;
            });
            joins.push(join);
        }

        info!(workers = n, "worker group started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new ids. In-flight receives run to completion.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task panicked");
            }
        }
        info!("worker group stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    engine: Arc<Engine>,
    poll: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Not raced against shutdown: dropping a pop mid-wait can lose the id
        // it was about to return.
        let id = match engine.pop_timeout(poll).await {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(err) => {
                warn!(worker_id, error = %err, "pop failed, backing off");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
                continue;
            }
        };

        handle(worker_id, &engine, id, poll, shutdown_rx).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Receive one popped id.
///
/// The id is already off the queue. It goes back only when the store was
/// unreachable, after waiting `poll`; any other failure would repeat forever,
/// so the id is dropped and its record left for an operator.
async fn handle(
    worker_id: usize,
    engine: &Engine,
    id: RequestId,
    poll: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    match engine.receive(id).await {
        Ok(Some(response)) => {
            debug!(worker_id, request_id = %id, status = %response.status(), "request completed");
        }
        Ok(None) => {}
        Err(err) if err.is_transient() => {
            warn!(worker_id, request_id = %id, error = %err, "receive failed, requeuing request");
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(poll) => {}
            }
            if let Err(err) = engine.push(id).await {
                error!(worker_id, request_id = %id, error = %err, "failed to requeue request");
            }
        }
        Err(err) => {
            error!(worker_id, request_id = %id, error = %err, "dropping request that cannot be received");
        }
    }
}
