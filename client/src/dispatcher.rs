//! Correlation table and background reader task binding requests to
//! responses on one worker's byte stream.
//!
//! One `Dispatcher` is bound one-to-one to one worker process: it owns the
//! write half of the transport (serialised behind an async mutex so
//! concurrent `exec`/`query` calls don't interleave partial frames), the
//! correlation table of outstanding requests, and the background task that
//! reads responses and resolves them. A second background task (the
//! "supervisor") waits for the closed signal and then performs the actual
//! teardown -- aborting the reader, half-closing the writer, killing and
//! reaping the child -- exactly once, regardless of which of the several
//! paths (`close()`, `quit()`, a protocol violation, or the worker simply
//! exiting) triggered it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use sqlite_bridge_wire::{FrameCodec, Outcome, Request, RequestId, Response};

use crate::bootstrap::{BoxedRead, BoxedWrite};
use crate::error::Error;

type Pending = HashMap<RequestId, oneshot::Sender<Result<serde_json::Value, Error>>>;

pub struct Dispatcher {
    write: tokio::sync::Mutex<FramedWrite<BoxedWrite, FrameCodec<Request>>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    error_slot: OnceLock<Error>,
}

impl Dispatcher {
    pub fn spawn(read: BoxedRead, write: BoxedWrite, child: Option<Child>) -> Arc<Self> {
        let (closed_tx, closed_rx) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher {
            write: tokio::sync::Mutex::new(FramedWrite::new(write, FrameCodec::new())),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reader_task: Mutex::new(None),
            child: tokio::sync::Mutex::new(child),
            closed_tx,
            closed_rx,
            error_slot: OnceLock::new(),
        });

        let reader = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { Dispatcher::read_loop(dispatcher, read).await })
        };
        *dispatcher.reader_task.lock() = Some(reader);

        {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { Dispatcher::supervise(dispatcher).await });
        }

        dispatcher
    }

    fn alloc_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.error_slot.get().cloned()
    }

    /// Waits for the connection's one `close` event. Resolves immediately if
    /// it has already fired.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Assigns a correlation id, registers it before writing so the response
    /// can never race ahead of the registration, writes the frame, then
    /// awaits the one-shot settlement.
    pub async fn call(&self, build: impl FnOnce(RequestId) -> Request) -> Result<serde_json::Value, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let id = self.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let request = build(id);

        {
            let mut write = self.write.lock().await;
            if write.send(request).await.is_err() {
                self.pending.lock().remove(&id);
                self.mark_closed(None);
                return Err(Error::Closed);
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            // The sender was dropped without sending, which only happens
            // when `drain_pending` removed it ahead of delivering an
            // outcome -- i.e. the connection closed underneath this call.
            Err(_) => Err(Error::Closed),
        }
    }

    /// Half-closes the writer, used by `quit()` once the `close` RPC's
    /// response has arrived (or failed) so the worker sees EOF on its input.
    pub async fn shutdown_writer(&self) {
        let mut write = self.write.lock().await;
        let _ = write.get_mut().shutdown().await;
    }

    /// First-caller-wins transition to the closed state: records `err` (if
    /// this is the first error reported), rejects every outstanding call
    /// with "Database closed", and flips the closed watch. Safe to call from
    /// multiple places; only the first call has any effect on state, but
    /// every caller observes it race-free via `wait_closed`.
    pub fn mark_closed(&self, err: Option<Error>) {
        if let Some(err) = err {
            let _ = self.error_slot.set(err);
        }
        if *self.closed_tx.borrow() {
            return;
        }
        self.drain_pending();
        let _ = self.closed_tx.send(true);
    }

    fn drain_pending(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(Error::Closed));
        }
    }

    async fn read_loop(dispatcher: Arc<Dispatcher>, read: BoxedRead) {
        let mut reader = FramedRead::new(read, FrameCodec::<Response>::new());
        loop {
            match reader.next().await {
                None => {
                    tracing::debug!("worker stream closed");
                    dispatcher.mark_closed(None);
                    return;
                }
                Some(Ok(response)) => dispatcher.handle_response(response),
                Some(Err(err)) => {
                    tracing::error!(%err, "malformed response frame");
                    dispatcher.mark_closed(Some(Error::Protocol));
                    return;
                }
            }
        }
    }

    fn handle_response(&self, response: Response) {
        let Some(id) = response.id else {
            // A terminal, un-framed error the worker emits before closing.
            tracing::error!("received a terminal stream error");
            self.mark_closed(Some(Error::Protocol));
            return;
        };

        let sender = self.pending.lock().remove(&id);
        match sender {
            Some(tx) => {
                let outcome = match response.outcome {
                    Outcome::Ok(value) => Ok(value),
                    Outcome::Err(err) => Err(Error::from(err)),
                };
                let _ = tx.send(outcome);
            }
            None => {
                tracing::error!(id, "response carried an unknown correlation id");
                self.mark_closed(Some(Error::Protocol));
            }
        }
    }

    /// Runs once per connection: waits for the closed signal, then tears
    /// down every resource this dispatcher owns, exactly once.
    async fn supervise(dispatcher: Arc<Dispatcher>) {
        dispatcher.wait_closed().await;

        if let Some(handle) = dispatcher.reader_task.lock().take() {
            handle.abort();
        }
        dispatcher.shutdown_writer().await;

        let mut child = dispatcher.child.lock().await;
        if let Some(mut child) = child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
