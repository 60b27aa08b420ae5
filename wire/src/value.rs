//! The tagged value type that flows across the wire, and the rule that decides
//! whether a string is carried as plain JSON text or as a base64 blob envelope.

use std::fmt;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value bound as a statement parameter, or read back out of a result row.
///
/// Mirrors SQLite's own type domain: `NULL`, `INTEGER`, `REAL`, `TEXT`, `BLOB`.
/// There is no `Bool` variant because SQLite has none; callers coerce booleans
/// into `Integer` before binding (see [`needs_blob_encoding`] for the analogous
/// text/blob rule).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Bytes that must be carried as `{"base64": "..."}` instead of a bare JSON string
/// are exactly those that are not valid UTF-8, or that are valid UTF-8 but contain
/// a control byte a JSON-speaking peer should not have to round-trip raw. Tab, LF
/// and CR are exempted so that ordinary multi-line text stays human-readable on
/// the wire.
pub fn needs_blob_encoding(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Err(_) => true,
        Ok(_) => bytes.iter().any(|&b| is_forced_blob_byte(b)),
    }
}

fn is_forced_blob_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0c | 0x0e..=0x1f | 0x7f)
}

impl Value {
    /// Build a `Text` or `Blob` value from raw bytes, applying the rule in
    /// [`needs_blob_encoding`]. This is the single place that decision is made
    /// for caller-supplied byte strings.
    pub fn text_or_blob(bytes: Vec<u8>) -> Value {
        if needs_blob_encoding(&bytes) {
            Value::Blob(bytes)
        } else {
            // needs_blob_encoding already checked this is valid UTF-8.
            Value::Text(String::from_utf8(bytes).expect("checked utf8 above"))
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// The SQLite type-affinity tag this value would report via `typeof()`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    /// Re-applies the text/blob rule to a value built outside the `From`
    /// coercions (e.g. a `Value::Text` constructed directly with control
    /// bytes inside it). The dispatcher calls this on every bound parameter
    /// before writing the request frame, so the wire encoding is correct
    /// regardless of how the caller assembled the value.
    pub fn normalized(self) -> Value {
        match self {
            Value::Text(s) if needs_blob_encoding(s.as_bytes()) => Value::Blob(s.into_bytes()),
            other => other,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text_or_blob(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::text_or_blob(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::text_or_blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::text_or_blob(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// The `{"base64": "..."}` envelope used for blob cells and parameters.
#[derive(Serialize, Deserialize)]
struct Base64Envelope {
    base64: String,
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(r) => serializer.serialize_f64(*r),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Blob(b) => {
                let envelope = Base64Envelope {
                    base64: BASE64_STANDARD.encode(b),
                };
                envelope.serialize(serializer)
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a number, a string, a bool, or a {\"base64\": ...} object")
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        // The wire protocol coerces booleans to 1/0 before binding; accepting a
        // raw JSON bool here keeps the worker tolerant of any caller that sends
        // one directly instead of going through `From<bool>`.
        Ok(Value::Integer(v as i64))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| de::Error::custom("integer too large for i64"))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Real(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let key: String = match map.next_key()? {
            Some(k) => k,
            None => return Err(de::Error::custom("expected a \"base64\" field")),
        };
        if key != "base64" {
            return Err(de::Error::custom(format!(
                "unexpected field `{key}` in blob envelope"
            )));
        }
        let encoded: String = map.next_value()?;
        let bytes = BASE64_STANDARD
            .decode(&encoded)
            .map_err(de::Error::custom)?;
        Ok(Value::Blob(bytes))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) -> Value {
        let json = serde_json::to_string(&v).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn null_roundtrips() {
        assert_eq!(roundtrip(Value::Null), Value::Null);
    }

    #[test]
    fn integer_roundtrips() {
        assert_eq!(roundtrip(Value::Integer(42)), Value::Integer(42));
        assert_eq!(roundtrip(Value::Integer(-1)), Value::Integer(-1));
    }

    #[test]
    fn zero_valued_float_stays_a_float_on_the_wire() {
        let json = serde_json::to_string(&Value::Real(0.0)).unwrap();
        assert_eq!(json, "0.0");
        assert_eq!(roundtrip(Value::Real(1.0)), Value::Real(1.0));
    }

    #[test]
    fn plain_text_is_not_wrapped() {
        let v = Value::from("hello\tworld\r\n");
        assert!(matches!(v, Value::Text(_)));
        let json = serde_json::to_string(&v).unwrap();
        assert!(!json.contains("base64"));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn control_bytes_force_blob_encoding() {
        let v = Value::from(b"\x01\x02hi".as_slice());
        assert!(matches!(v, Value::Blob(_)));
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("base64"));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn invalid_utf8_forces_blob_encoding() {
        let bytes = vec![0xff, 0xfe, 0x00, 0x01];
        let v = Value::text_or_blob(bytes.clone());
        assert_eq!(v, Value::Blob(bytes));
    }

    #[test]
    fn bool_coerces_to_integer() {
        assert_eq!(Value::from(true), Value::Integer(1));
        assert_eq!(Value::from(false), Value::Integer(0));
    }

    #[test]
    fn raw_json_bool_is_tolerated_on_decode() {
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Integer(1));
    }

    #[test]
    fn normalized_rewraps_a_hand_built_text_value_with_control_bytes() {
        let v = Value::Text("\x01\x02".to_string()).normalized();
        assert_eq!(v, Value::Blob(vec![1, 2]));
    }

    #[test]
    fn normalized_leaves_plain_text_alone() {
        let v = Value::Text("hello".to_string()).normalized();
        assert_eq!(v, Value::Text("hello".to_string()));
    }
}
