//! Request/response envelopes and the `exec`/`query` result payload shape.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

pub type RequestId = u64;

/// The four recognized methods. Unlike `id`/`params`, a request's `method`
/// field is validated structurally as a plain string (any string is a
/// well-formed request); recognizing *which* method it names is the worker's
/// job, and an unrecognized one is a soft error, not a framing failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Open,
    Exec,
    Query,
    Close,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Open => "open",
            Method::Exec => "exec",
            Method::Query => "query",
            Method::Close => "close",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "open" => Ok(Method::Open),
            "exec" => Ok(Method::Exec),
            "query" => Ok(Method::Query),
            "close" => Ok(Method::Close),
            _ => Err(()),
        }
    }
}

/// Positional (1-based placeholders) or named (`:key`/`@key`/`$key`) parameters
/// for `query`. `exec` never carries bound parameters -- it runs the statement
/// verbatim, per the worker's negative-space rule of not validating SQL.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Serialize for QueryParams {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            QueryParams::None => serializer.serialize_seq(Some(0))?.end(),
            QueryParams::Positional(values) => values.serialize(serializer),
            QueryParams::Named(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct QueryParamsVisitor;

impl<'de> Visitor<'de> for QueryParamsVisitor {
    type Value = QueryParams;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of positional parameters or an object of named parameters")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<QueryParams, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut values = Vec::new();
        while let Some(v) = seq.next_element()? {
            values.push(v);
        }
        if values.is_empty() {
            Ok(QueryParams::None)
        } else {
            Ok(QueryParams::Positional(values))
        }
    }

    fn visit_map<A>(self, mut map: A) -> Result<QueryParams, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut pairs = Vec::new();
        while let Some((k, v)) = map.next_entry()? {
            pairs.push((k, v));
        }
        Ok(QueryParams::Named(pairs))
    }
}

impl<'de> Deserialize<'de> for QueryParams {
    fn deserialize<D>(deserializer: D) -> Result<QueryParams, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(QueryParamsVisitor)
    }
}

impl QueryParams {
    /// Re-applies the text/blob wire rule to every bound value (see
    /// `Value::normalized`). The dispatcher calls this once per `query`
    /// before building the request frame.
    pub fn normalized(self) -> QueryParams {
        match self {
            QueryParams::None => QueryParams::None,
            QueryParams::Positional(values) => {
                QueryParams::Positional(values.into_iter().map(Value::normalized).collect())
            }
            QueryParams::Named(pairs) => QueryParams::Named(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, v.normalized()))
                    .collect(),
            ),
        }
    }
}

/// A single result row: an ordered sequence of (column name, cell) pairs.
/// Ordered (rather than a sorted map) so the wire form preserves the column
/// order the worker reported, even though callers mostly look cells up by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row(pub Vec<(String, Value)>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct RowVisitor;

impl<'de> Visitor<'de> for RowVisitor {
    type Value = Row;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of column name to cell value")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Row, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut pairs = Vec::new();
        while let Some((k, v)) = map.next_entry()? {
            pairs.push((k, v));
        }
        Ok(Row(pairs))
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D>(deserializer: D) -> Result<Row, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RowVisitor)
    }
}

/// The `result` payload of a successful `exec` or `query` response. Any field
/// may be absent; `columns`/`rows` always appear together or not at all.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    #[serde(rename = "insertId", default, skip_serializing_if = "is_zero")]
    pub insert_id: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub changed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
}

fn is_zero<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

/// JSON-RPC error codes used for terminal, un-framed stream failures.
pub const CODE_PARSE_ERROR: i64 = -32700;
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_ALLOWED: i64 = -32601;

/// A request frame: `{"id": ..., "method": "...", "params": [...]}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: serde_json::Value,
}

impl Request {
    pub fn open(id: RequestId, filename: &str, flags: Option<i64>) -> Self {
        let params = match flags {
            Some(flags) => serde_json::json!([filename, flags]),
            None => serde_json::json!([filename]),
        };
        Request {
            id,
            method: Method::Open.as_str().to_owned(),
            params,
        }
    }

    pub fn exec(id: RequestId, sql: &str) -> Self {
        Request {
            id,
            method: Method::Exec.as_str().to_owned(),
            params: serde_json::json!([sql]),
        }
    }

    pub fn query(id: RequestId, sql: &str, params: &QueryParams) -> Self {
        Request {
            id,
            method: Method::Query.as_str().to_owned(),
            params: serde_json::json!([sql, params]),
        }
    }

    pub fn close(id: RequestId) -> Self {
        Request {
            id,
            method: Method::Close.as_str().to_owned(),
            params: serde_json::json!([]),
        }
    }
}

/// A response frame. `id` is `None` only for a terminal, un-framed stream
/// failure the worker emits before closing (decode/framing errors it can't
/// attribute to any one request).
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Ok(serde_json::Value),
    Err(RpcError),
}

impl Response {
    pub fn ok(id: RequestId, result: serde_json::Value) -> Self {
        Response {
            id: Some(id),
            outcome: Outcome::Ok(result),
        }
    }

    pub fn err(id: RequestId, error: RpcError) -> Self {
        Response {
            id: Some(id),
            outcome: Outcome::Err(error),
        }
    }

    pub fn terminal(error: RpcError) -> Self {
        Response {
            id: None,
            outcome: Outcome::Err(error),
        }
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.id.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(id) = self.id {
            map.serialize_entry("id", &id)?;
        }
        match &self.outcome {
            Outcome::Ok(result) => map.serialize_entry("result", result)?,
            Outcome::Err(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

struct ResponseVisitor;

impl<'de> Visitor<'de> for ResponseVisitor {
    type Value = Response;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a response object with `id` and exactly one of `result`/`error`")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Response, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut id: Option<RequestId> = None;
        let mut result: Option<serde_json::Value> = None;
        let mut error: Option<RpcError> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" => id = Some(map.next_value()?),
                "result" => result = Some(map.next_value()?),
                "error" => error = Some(map.next_value()?),
                _ => {
                    let _: de::IgnoredAny = map.next_value()?;
                }
            }
        }

        match (result, error) {
            (Some(_), Some(_)) => Err(de::Error::custom(
                "response carries both `result` and `error`",
            )),
            (Some(result), None) => Ok(Response {
                id,
                outcome: Outcome::Ok(result),
            }),
            (None, Some(error)) => Ok(Response { id, outcome: Outcome::Err(error) }),
            (None, None) => Err(de::Error::custom(
                "response carries neither `result` nor `error`",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> Result<Response, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ResponseVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = Request::exec(7, "CREATE TABLE t(x)");
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn positional_query_params_round_trip() {
        let params = QueryParams::Positional(vec![Value::Integer(1), Value::Null]);
        let req = Request::query(1, "SELECT ?, ?", &params);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"SELECT"));
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.method, "query");
    }

    #[test]
    fn response_ok_has_no_error_field() {
        let resp = Response::ok(3, serde_json::json!({"changed": 1}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn terminal_error_has_no_id() {
        let resp = Response::terminal(RpcError::with_code("bad frame", CODE_PARSE_ERROR));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"id\""));
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, None);
    }

    #[test]
    fn response_with_both_result_and_error_is_rejected() {
        let json = r#"{"id":1,"result":1,"error":{"message":"x"}}"#;
        assert!(serde_json::from_str::<Response>(json).is_err());
    }

    #[test]
    fn query_result_omits_absent_fields() {
        let result = QueryResult {
            insert_id: 0,
            changed: 0,
            columns: None,
            rows: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn row_preserves_declared_column_order() {
        let json = r#"{"t":"TEXT","v":1}"#;
        let row: Row = serde_json::from_str(json).unwrap();
        assert_eq!(row.0[0].0, "t");
        assert_eq!(row.0[1].0, "v");
    }

    #[test]
    fn normalized_query_params_rewraps_control_bytes_in_every_position() {
        let params = QueryParams::Positional(vec![Value::Text("\x01".into()), Value::Integer(1)]);
        let normalized = params.normalized();
        assert_eq!(
            normalized,
            QueryParams::Positional(vec![Value::Blob(vec![1]), Value::Integer(1)])
        );
    }
}
