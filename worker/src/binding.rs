//! Conversions between the wire [`Value`] and `rusqlite`'s own value type.
//!
//! Heavily inspired by the `From<Value> for RusqliteValue` pair libsql-client
//! keeps for its local (non-remote) connection -- the worker links the same
//! engine and needs the identical boundary conversion.

use rusqlite::types::Value as SqlValue;
use sqlite_bridge_wire::Value;

pub fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

pub fn sql_to_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(r) => Value::Real(r),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Blob(b),
    }
}
