use bytes::Bytes;
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Bencode has four data types: integers, byte strings, lists, and
/// dictionaries. Byte strings are not guaranteed to be valid UTF-8, so they
/// are kept as raw [`Bytes`].
///
/// # Examples
///
/// ```
/// use remora::bencode::decode;
///
/// let value = decode(b"d3:agei30e4:name5:Alicee").unwrap();
/// assert_eq!(value.get(b"name").and_then(|v| v.as_str()), Some("Alice"));
/// assert_eq!(value.get(b"age").and_then(|v| v.as_integer()), Some(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string.
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary keyed by byte strings.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Returns the integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the byte string as UTF-8 text, if it is one and decodes cleanly.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the list, if this is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the dictionary, if this is one.
    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key if this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}
