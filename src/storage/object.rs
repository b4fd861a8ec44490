//! Tagged value container.
//!
//! Everything stored in the keyspace is a [`Value`]: a tagged variant
//! covering the kinds the server knows about. Only the string kind is fully
//! exercised by the reference command set; the container kinds exist so that
//! typed commands can be added without touching the storage layer.
//!
//! Payloads are `bytes::Bytes`, so cloning a value shares the underlying
//! buffer instead of copying it, and dropping the last owner releases it.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// The kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    List,
    Set,
    ZSet,
    Hash,
}

impl Kind {
    /// Human-readable kind name, used in error replies and logs.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::ZSet => "zset",
            Kind::Hash => "hash",
        }
    }
}

/// A tagged datum.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    ZSet(BTreeMap<Bytes, i64>),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    /// Builds a string value.
    pub fn str(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    /// Builds a string value holding the decimal rendering of `n`.
    ///
    /// Integers are not a kind of their own; they ride in string payloads
    /// and come back out through [`Value::as_int`].
    pub fn from_int(n: i64) -> Self {
        Value::Str(Bytes::from(n.to_string()))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::Str,
            Value::List(_) => Kind::List,
            Value::Set(_) => Kind::Set,
            Value::ZSet(_) => Kind::ZSet,
            Value::Hash(_) => Kind::Hash,
        }
    }

    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&Bytes> {
        match self {
            Value::Str(data) => Some(data),
            _ => None,
        }
    }

    /// Parses the string payload as a signed 64-bit decimal.
    ///
    /// Anything unparsable, and any non-string kind, reads as 0.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Str(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            _ => 0,
        }
    }
}
