//! An in-process mock worker: reads `wire::Request`s off one half of a
//! `tokio::io::duplex` pair, runs a tiny SQLite-backed responder (`rusqlite`
//! directly -- the same engine the real worker links), and writes
//! `wire::Response`s back. Exercises the dispatcher's framing, correlation,
//! ordering, and error-handling logic without spawning the compiled worker
//! binary or going through a real child process.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use sqlite_bridge_wire::{
    FrameCodec, Method, QueryParams, QueryResult, Request, Response, Row, RpcError, Value,
};

use crate::connection::EagerConnection;

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// Spawns a mock worker over an in-process duplex pipe and wraps the other
/// end in an `EagerConnection`. The returned connection is not yet `open`ed
/// against a database -- callers typically issue `open_handle` themselves or
/// go through `mock_connection` below.
pub fn mock_pair() -> (EagerConnection, JoinHandle<()>) {
    let (client_side, worker_side) = tokio::io::duplex(64 * 1024);
    let (worker_read, worker_write) = tokio::io::split(worker_side);
    let (client_read, client_write) = tokio::io::split(client_side);

    let handle = tokio::spawn(serve_mock(
        Box::new(worker_read) as BoxedRead,
        Box::new(worker_write) as BoxedWrite,
    ));

    let connection = EagerConnection::new(
        Box::new(client_read) as BoxedRead,
        Box::new(client_write) as BoxedWrite,
        None,
    );
    (connection, handle)
}

/// Convenience used by most dispatcher tests: a mock connection already
/// `open`ed against `:memory:`.
pub async fn mock_connection() -> (EagerConnection, JoinHandle<()>) {
    let (conn, handle) = mock_pair();
    conn.open_handle(":memory:", 0).await.unwrap();
    (conn, handle)
}

async fn serve_mock(read: BoxedRead, write: BoxedWrite) {
    let mut reader = FramedRead::new(read, FrameCodec::<Request>::new());
    let mut writer = FramedWrite::new(write, FrameCodec::<Response>::new());
    let mut conn: Option<rusqlite::Connection> = None;

    while let Some(frame) = reader.next().await {
        let Ok(request) = frame else {
            return;
        };
        let response = handle(&mut conn, request);
        if writer.send(response).await.is_err() {
            return;
        }
    }
}

fn handle(conn: &mut Option<rusqlite::Connection>, request: Request) -> Response {
    let Some(params) = request.params.as_array() else {
        return Response::err(request.id, RpcError::new("params must be a list"));
    };
    let Ok(method) = request.method.parse::<Method>() else {
        return Response::err(request.id, RpcError::new("unknown method"));
    };

    match method {
        Method::Open => {
            let filename = params.first().and_then(|v| v.as_str()).unwrap_or(":memory:");
            match rusqlite::Connection::open(filename) {
                Ok(c) => {
                    *conn = Some(c);
                    Response::ok(request.id, serde_json::json!({}))
                }
                Err(err) => Response::err(request.id, RpcError::new(err.to_string())),
            }
        }
        Method::Close => {
            if conn.take().is_none() {
                return Response::err(request.id, RpcError::new("invalid method call"));
            }
            Response::ok(request.id, serde_json::json!({}))
        }
        Method::Exec => {
            let Some(db) = conn.as_ref() else {
                return Response::err(request.id, RpcError::new("invalid method call"));
            };
            let sql = params.first().and_then(|v| v.as_str()).unwrap_or_default();
            match db.execute(sql, []) {
                Ok(changed) => Response::ok(
                    request.id,
                    serde_json::to_value(QueryResult {
                        insert_id: db.last_insert_rowid(),
                        changed: changed as u64,
                        columns: None,
                        rows: None,
                    })
                    .unwrap(),
                ),
                Err(err) => Response::err(request.id, RpcError::new(err.to_string())),
            }
        }
        Method::Query => {
            let Some(db) = conn.as_ref() else {
                return Response::err(request.id, RpcError::new("invalid method call"));
            };
            let sql = params.first().and_then(|v| v.as_str()).unwrap_or_default();
            let query_params: QueryParams = match params.get(1) {
                Some(raw) => match serde_json::from_value(raw.clone()) {
                    Ok(p) => p,
                    Err(err) => {
                        return Response::err(request.id, RpcError::new(err.to_string()))
                    }
                },
                None => QueryParams::None,
            };
            run_query(db, sql, &query_params)
                .map(|result| Response::ok(request.id, serde_json::to_value(result).unwrap()))
                .unwrap_or_else(|err| Response::err(request.id, RpcError::new(err.to_string())))
        }
    }
}

fn run_query(
    db: &rusqlite::Connection,
    sql: &str,
    params: &QueryParams,
) -> rusqlite::Result<QueryResult> {
    let mut stmt = db.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut rows_out = Vec::new();
    {
        let mut rows = match params {
            QueryParams::None => stmt.query([])?,
            QueryParams::Positional(values) => {
                let bound: Vec<rusqlite::types::Value> = values.iter().map(to_sql).collect();
                stmt.query(rusqlite::params_from_iter(bound))?
            }
            QueryParams::Named(pairs) => {
                let bound: Vec<(String, rusqlite::types::Value)> = pairs
                    .iter()
                    .map(|(name, value)| (name.clone(), to_sql(value)))
                    .collect();
                let refs: Vec<(&str, &dyn rusqlite::ToSql)> = bound
                    .iter()
                    .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
                    .collect();
                stmt.query(refs.as_slice())?
            }
        };

        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(idx)?;
                cells.push((name.clone(), from_sql(value)));
            }
            rows_out.push(Row(cells));
        }
    }

    Ok(QueryResult {
        insert_id: db.last_insert_rowid(),
        changed: db.changes(),
        columns: Some(columns),
        rows: Some(rows_out),
    })
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(*i),
        Value::Real(r) => rusqlite::types::Value::Real(*r),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_sql(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::Integer(i),
        rusqlite::types::Value::Real(r) => Value::Real(r),
        rusqlite::types::Value::Text(s) => Value::Text(s),
        rusqlite::types::Value::Blob(b) => Value::Blob(b),
    }
}
