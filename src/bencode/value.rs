//! # Dynamic Bencode Values
//!
//! Not every document is worth a schema: tracker responses are permissive,
//! and debugging a malformed metainfo file is easier against a dynamic
//! tree. `Value` is the any-shaped decode target, mirroring the four value
//! kinds of the format.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::{ByteBuf, Bytes};

/// A bencode value of any shape.
///
/// Strings in this format are byte sequences, not text, so both string
/// values and dictionary keys are raw bytes. The `BTreeMap` keeps
/// dictionary keys in ascending byte order, which is also the canonical
/// encoding order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// An arbitrary byte string.
    Bytes(Vec<u8>),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// A mapping from byte-string keys to values, key-ordered.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Returns the integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the raw bytes, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Looks up a dictionary entry by key.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries.get(key),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(Bytes::new(key), value)?;
                }
                map.end()
            }
        }
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

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a bencode value")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        match i64::try_from(v) {
            Ok(n) => Ok(Value::Integer(n)),
            Err(_) => Err(E::custom("integer out of range")),
        }
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Bytes(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::Bytes(v.as_bytes().to_vec()))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }

        Ok(Value::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<ByteBuf, Value>()? {
            entries.insert(key.into_vec(), value);
        }

        Ok(Value::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode;

    #[test]
    fn decodes_any_shape() {
        let value: Value = bencode::from_bytes(b"d4:spaml1:ai-3eee").unwrap();

        let spam = value.get(b"spam").unwrap();
        match spam {
            Value::List(items) => {
                assert_eq!(items[0].as_bytes(), Some(&b"a"[..]));
                assert_eq!(items[1].as_integer(), Some(-3));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn round_trips_through_canonical_encoding() {
        let input = b"d3:agei27e5:items3:\x00\xff\x7f4:nameli1ei2eee";
        let value: Value = bencode::from_bytes(input).unwrap();
        let encoded = bencode::to_bytes(&value).unwrap();
        assert_eq!(encoded, input.to_vec());

        let again: Value = bencode::from_bytes(&encoded).unwrap();
        assert_eq!(again, value);
    }
}
