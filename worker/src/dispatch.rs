//! Translates wire [`Request`]s into [`Engine`] calls and wire [`Response`]s.

use sqlite_bridge_wire::{
    Method, QueryParams, QueryResult, Request, Response, RpcError, CODE_METHOD_NOT_ALLOWED,
};

use crate::engine::Engine;

/// The outcome of dispatching one frame.
pub enum Dispatched {
    /// A normal, `id`-bearing response -- success or a soft error.
    Reply(Response),
    /// The request's envelope was malformed in a way that terminates the
    /// worker (see the framing rule in the protocol design): `params` was not
    /// a JSON array.
    Fatal(RpcError),
}

pub fn dispatch(engine: &mut Engine, req: Request) -> Dispatched {
    let Some(params) = req.params.as_array() else {
        return Dispatched::Fatal(RpcError::with_code(
            "params must be a list",
            sqlite_bridge_wire::CODE_INVALID_REQUEST,
        ));
    };

    let Ok(method) = req.method.parse::<Method>() else {
        return Dispatched::Reply(Response::err(
            req.id,
            RpcError::with_code(
                format!("unknown method `{}`", req.method),
                CODE_METHOD_NOT_ALLOWED,
            ),
        ));
    };

    tracing::trace!(id = req.id, method = method.as_str(), "dispatching request");

    let outcome = match method {
        Method::Open => handle_open(engine, params),
        Method::Exec => handle_exec(engine, params),
        Method::Query => handle_query(engine, params),
        Method::Close => handle_close(engine),
    };

    match outcome {
        Ok(result) => Dispatched::Reply(Response::ok(req.id, result)),
        Err(err) => {
            tracing::debug!(id = req.id, error = %err.message, "soft error");
            Dispatched::Reply(Response::err(req.id, err))
        }
    }
}

fn require_open(engine: &Engine) -> Result<(), RpcError> {
    if engine.is_open() {
        Ok(())
    } else {
        Err(RpcError::with_code(
            "invalid method call",
            CODE_METHOD_NOT_ALLOWED,
        ))
    }
}

fn handle_open(engine: &mut Engine, params: &[serde_json::Value]) -> Result<serde_json::Value, RpcError> {
    let filename = params
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::new("open requires a filename argument"))?;
    let flags = params.get(1).and_then(|v| v.as_i64());

    engine
        .open(filename, flags)
        .map_err(|e| RpcError::new(e.to_string()))?;

    Ok(serde_json::json!({}))
}

fn handle_exec(engine: &mut Engine, params: &[serde_json::Value]) -> Result<serde_json::Value, RpcError> {
    require_open(engine)?;
    let sql = params
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::new("exec requires a sql argument"))?;

    let out = engine.exec(sql).map_err(|e| RpcError::new(e.to_string()))?;
    Ok(serde_json::to_value(QueryResult {
        insert_id: out.insert_id,
        changed: out.changed,
        columns: None,
        rows: None,
    })
    .expect("QueryResult always serializes"))
}

fn handle_query(engine: &mut Engine, params: &[serde_json::Value]) -> Result<serde_json::Value, RpcError> {
    require_open(engine)?;
    let sql = params
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::new("query requires a sql argument"))?;
    let query_params: QueryParams = match params.get(1) {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| RpcError::new(format!("invalid params: {e}")))?,
        None => QueryParams::None,
    };

    let out = engine
        .query(sql, &query_params)
        .map_err(|e| RpcError::new(e.to_string()))?;

    Ok(serde_json::to_value(QueryResult {
        insert_id: out.insert_id,
        changed: out.changed,
        columns: Some(out.columns),
        rows: Some(out.rows),
    })
    .expect("QueryResult always serializes"))
}

fn handle_close(engine: &mut Engine) -> Result<serde_json::Value, RpcError> {
    require_open(engine)?;
    engine.close();
    Ok(serde_json::json!({}))
}
