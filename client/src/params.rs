//! Convenience coercions from native Rust collections into [`QueryParams`].
//!
//! `QueryParams` itself lives in the wire crate; the orphan rule keeps us
//! from implementing `From` for it here, so this is a small local trait
//! instead.

use sqlite_bridge_wire::{QueryParams, Value};

pub trait IntoParams {
    fn into_params(self) -> QueryParams;
}

impl IntoParams for QueryParams {
    fn into_params(self) -> QueryParams {
        self
    }
}

impl IntoParams for () {
    fn into_params(self) -> QueryParams {
        QueryParams::None
    }
}

impl<T: Into<Value>> IntoParams for Vec<T> {
    fn into_params(self) -> QueryParams {
        if self.is_empty() {
            QueryParams::None
        } else {
            QueryParams::Positional(self.into_iter().map(Into::into).collect())
        }
    }
}

impl<T: Into<Value> + Clone, const N: usize> IntoParams for [T; N] {
    fn into_params(self) -> QueryParams {
        self.to_vec().into_params()
    }
}

/// Builds named parameters, e.g. `named([("a", 1i64.into()), ("b", Value::Null)])`.
/// A free function rather than another blanket `IntoParams` impl: a generic
/// `Vec<(K, V)>` impl would overlap with the positional `Vec<T>` one above.
pub fn named<K: Into<String>, V: Into<Value>>(
    pairs: impl IntoIterator<Item = (K, V)>,
) -> QueryParams {
    let pairs: Vec<(String, Value)> = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
    if pairs.is_empty() {
        QueryParams::None
    } else {
        QueryParams::Named(pairs)
    }
}
