//! A virtual connection presenting the identical surface as
//! [`crate::connection::EagerConnection`] but deferring the underlying open
//! until first use, collapsing idle time with a timer, and recreating the
//! underlying connection transparently after failure or idle expiry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use sqlite_bridge_wire::QueryResult;

use crate::connection::EagerConnection;
use crate::error::{Error, Result};
use crate::factory::ConnectionOpener;
use crate::options::ConnectOptions;
use crate::params::IntoParams;

struct State {
    /// The live underlying connection, if one is currently open.
    current: Option<Arc<EagerConnection>>,
    /// Set while a soft-close (idle-triggered `quit()`) is in flight, so a
    /// new operation arriving in that window can force-close it instead of
    /// racing it.
    draining: Option<Arc<EagerConnection>>,
    idle_timer: Option<JoinHandle<()>>,
}

struct Shared {
    factory: Arc<dyn ConnectionOpener>,
    filename: String,
    options: ConnectOptions,
    state: AsyncMutex<State>,
    pending: AtomicU64,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    quit_called: AtomicBool,
}

#[derive(Clone)]
pub struct LazyConnection {
    shared: Arc<Shared>,
}

impl LazyConnection {
    pub(crate) fn new(
        factory: Arc<dyn ConnectionOpener>,
        filename: String,
        options: ConnectOptions,
    ) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        LazyConnection {
            shared: Arc::new(Shared {
                factory,
                filename,
                options,
                state: AsyncMutex::new(State {
                    current: None,
                    draining: None,
                    idle_timer: None,
                }),
                pending: AtomicU64::new(0),
                closed_tx,
                closed_rx,
                quit_called: AtomicBool::new(false),
            }),
        }
    }

    pub async fn exec(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.acquire().await?;
        let result = conn.exec(sql).await;
        self.release().await;
        result
    }

    pub async fn query(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        let conn = self.acquire().await?;
        let result = conn.query(sql, params).await;
        self.release().await;
        result
    }

    /// Resolves immediately if no eager connection exists and the lazy
    /// connection is not already closed; otherwise delegates to the
    /// underlying connection's `quit()` and transitions to closed when it
    /// completes.
    pub async fn quit(&self) -> Result<()> {
        if self.shared.quit_called.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosing);
        }

        let conn = {
            let mut state = self.shared.state.lock().await;
            cancel_idle_timer(&mut state);
            if let Some(draining) = state.draining.take() {
                draining.close();
            }
            state.current.take()
        };

        let result = match &conn {
            Some(conn) => conn.quit().await,
            None => Ok(()),
        };
        self.fire_close();
        result
    }

    /// Cancels any pending open, force-closes the current eager connection,
    /// cancels the idle timer, and fires `close` once. Synchronous and
    /// unconditional like `EagerConnection::close`; the actual teardown of
    /// the current connection happens on a background task since dropping
    /// it requires the async state lock.
    pub fn close(&self) {
        if self.shared.closed_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        }) {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                let mut state = shared.state.lock().await;
                cancel_idle_timer(&mut state);
                if let Some(draining) = state.draining.take() {
                    draining.close();
                }
                if let Some(conn) = state.current.take() {
                    conn.close();
                }
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_rx.borrow()
    }

    pub async fn closed(&self) {
        let mut rx = self.shared.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn fire_close(&self) {
        self.shared.closed_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
    }

    async fn acquire(&self) -> Result<Arc<EagerConnection>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.ensure_open().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.release().await;
                Err(err)
            }
        }
    }

    async fn release(&self) {
        if self.shared.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let Some(period) = self.shared.options.idle else {
            return;
        };

        let mut state = self.shared.state.lock().await;
        // Another operation may have started between the fetch_sub above and
        // taking this lock; don't arm a timer that a live operation would
        // immediately need cancelled.
        if self.shared.pending.load(Ordering::Acquire) != 0 || state.idle_timer.is_some() {
            return;
        }

        let shared = self.shared.clone();
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            on_idle_fire(shared).await;
        }));
    }

    /// Requests an eager open if none is live, reusing one already in
    /// flight so concurrent callers serialise onto the same open instead of
    /// racing separate ones.
    async fn ensure_open(&self) -> Result<Arc<EagerConnection>> {
        let mut state = self.shared.state.lock().await;
        cancel_idle_timer(&mut state);
        if let Some(draining) = state.draining.take() {
            // A new operation arrived while the previous connection was
            // being soft-closed for idleness: force it closed now and open a
            // fresh one below.
            draining.close();
        }

        if let Some(conn) = &state.current {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
            // The worker died spontaneously; drop the stale handle and fall
            // through to a fresh open. No `close`/`error` is re-emitted here.
            state.current = None;
        }

        let conn = Arc::new(
            self.shared
                .factory
                .open_connection(&self.shared.filename, self.shared.options.clone())
                .await?,
        );
        state.current = Some(conn.clone());
        Ok(conn)
    }
}

fn cancel_idle_timer(state: &mut State) {
    if let Some(handle) = state.idle_timer.take() {
        handle.abort();
    }
}

async fn on_idle_fire(shared: Arc<Shared>) {
    let conn = {
        let mut state = shared.state.lock().await;
        state.idle_timer = None;
        if shared.pending.load(Ordering::Acquire) != 0 {
            return;
        }
        let Some(conn) = state.current.take() else {
            return;
        };
        state.draining = Some(conn.clone());
        conn
    };

    let quit_result = conn.quit().await;

    let mut state = shared.state.lock().await;
    // Only clear `draining` if it's still this connection -- `ensure_open`
    // may have already force-closed and cleared it if a new operation
    // arrived while `quit()` was in flight.
    if matches!(&state.draining, Some(d) if Arc::ptr_eq(d, &conn)) {
        state.draining = None;
    }
    drop(state);

    if quit_result.is_err() {
        conn.close();
    }
}
