//! The parent-side request/response multiplexer bound to one worker process:
//! the public `exec`/`query`/`quit`/`close` surface and the `error`/`close`
//! event pair described in the protocol design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::process::Child;

use sqlite_bridge_wire::{QueryResult, Request};

use crate::bootstrap::{BoxedRead, BoxedWrite};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::params::IntoParams;

/// Bound one-to-one to a live worker process and SQLite handle. Exists from
/// a successful `open` until the first of: `close()`, `quit()` completing,
/// worker exit, or a fatal stream error.
pub struct EagerConnection {
    dispatcher: Arc<Dispatcher>,
    quit_called: AtomicBool,
}

impl EagerConnection {
    pub(crate) fn new(read: BoxedRead, write: BoxedWrite, child: Option<Child>) -> Self {
        EagerConnection {
            dispatcher: Dispatcher::spawn(read, write, child),
            quit_called: AtomicBool::new(false),
        }
    }

    pub(crate) async fn open_handle(&self, filename: &str, flags: i64) -> Result<()> {
        self.dispatcher
            .call(|id| Request::open(id, filename, Some(flags)))
            .await
            .map(|_| ())
    }

    /// Runs a statement without materialising a result set.
    pub async fn exec(&self, sql: &str) -> Result<QueryResult> {
        let value = self.dispatcher.call(|id| Request::exec(id, sql)).await?;
        decode_result(value)
    }

    /// Runs a statement and materialises its result set. `params` accepts
    /// `()`, a `Vec`/array of values coerced positionally, or
    /// [`crate::params::named`] for named placeholders.
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        let params = params.into_params().normalized();
        let value = self
            .dispatcher
            .call(move |id| Request::query(id, sql, &params))
            .await?;
        decode_result(value)
    }

    /// Enqueues a `close` RPC, ordered after every previously submitted
    /// operation, and resolves when its response arrives (or the stream
    /// dies first). A second call rejects.
    pub async fn quit(&self) -> Result<()> {
        if self.quit_called.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosing);
        }
        let result = self.dispatcher.call(Request::close).await.map(|_| ());
        // Half-close our side regardless of outcome so the worker observes
        // EOF and exits even if the `close` RPC itself failed.
        self.dispatcher.shutdown_writer().await;
        result
    }

    /// Synchronous and unconditional: rejects every outstanding future with
    /// "Database closed" and fires `close`. Resource teardown (killing the
    /// child, closing the streams) happens on a background task, but every
    /// caller-visible effect here is immediate. Subsequent calls are no-ops.
    pub fn close(&self) {
        self.dispatcher.mark_closed(None);
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    /// Resolves once `close` has fired (immediately if it already has).
    pub async fn closed(&self) {
        self.dispatcher.wait_closed().await;
    }

    /// The error that forced a terminal close, if any. `None` when the
    /// connection closed via `close()`/`quit()` or a plain worker exit.
    pub fn last_error(&self) -> Option<Error> {
        self.dispatcher.last_error()
    }
}

fn decode_result(value: serde_json::Value) -> Result<QueryResult> {
    serde_json::from_value(value).map_err(|_| Error::Protocol)
}

#[cfg(test)]
mod tests {
    use sqlite_bridge_wire::Value;

    use crate::params::named;
    use crate::test_support::mock_connection;

    use super::*;

    #[tokio::test]
    async fn select_one_round_trips() {
        let (conn, _worker) = mock_connection().await;
        let result = conn.query("SELECT 1 AS value", ()).await.unwrap();
        assert_eq!(result.rows.unwrap()[0].get("value"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn insert_id_matches_autoincrement() {
        let (conn, _worker) = mock_connection().await;
        conn.exec("CREATE TABLE foo(id INTEGER PRIMARY KEY AUTOINCREMENT, bar TEXT)")
            .await
            .unwrap();
        let result = conn
            .query("INSERT INTO foo(bar) VALUES(?1)", vec!["test".to_string()])
            .await
            .unwrap();
        assert_eq!(result.insert_id, 1);
        assert_eq!(result.changed, 1);
    }

    #[tokio::test]
    async fn invalid_sql_rejects_just_that_call() {
        let (conn, _worker) = mock_connection().await;
        let err = conn.query("nope", ()).await.unwrap_err();
        assert!(matches!(err, Error::Sql { .. }));
        // the connection is still usable afterwards.
        conn.exec("CREATE TABLE t(x)").await.unwrap();
    }

    #[tokio::test]
    async fn blob_round_trips_exactly() {
        let (conn, _worker) = mock_connection().await;
        let bytes = vec![0x00u8, 0x01, 0x02];
        let result = conn
            .query("SELECT ?1 AS v", vec![Value::Blob(bytes.clone())])
            .await
            .unwrap();
        assert_eq!(result.rows.unwrap()[0].get("v"), Some(&Value::Blob(bytes)));
    }

    #[tokio::test]
    async fn named_parameters_bind_by_name() {
        let (conn, _worker) = mock_connection().await;
        let result = conn
            .query("SELECT :a AS a", named([(":a", Value::Integer(7))]))
            .await
            .unwrap();
        assert_eq!(result.rows.unwrap()[0].get("a"), Some(&Value::Integer(7)));
    }

    #[tokio::test]
    async fn close_rejects_outstanding_and_subsequent_calls() {
        let (conn, _worker) = mock_connection().await;
        conn.close();
        assert!(conn.is_closed());
        let err = conn.exec("SELECT 1").await.unwrap_err();
        assert_eq!(err.to_string(), "Database closed");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (conn, _worker) = mock_connection().await;
        conn.close();
        conn.close();
        conn.closed().await;
    }

    #[tokio::test]
    async fn quit_resolves_and_second_call_rejects() {
        let (conn, _worker) = mock_connection().await;
        conn.quit().await.unwrap();
        let err = conn.quit().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyClosing));
    }

    #[tokio::test]
    async fn exec_before_open_is_a_soft_error() {
        let (conn, _worker) = crate::test_support::mock_pair();
        let err = conn.exec("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Sql { .. }));
    }
}
