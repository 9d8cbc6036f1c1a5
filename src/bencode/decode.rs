use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes a bencode value spanning the whole input.
///
/// # Errors
///
/// Fails on truncated input, malformed syntax, nesting deeper than 64
/// levels, or bytes remaining after the value.
///
/// # Examples
///
/// ```
/// use remora::bencode::decode;
///
/// assert_eq!(decode(b"i42e").unwrap().as_integer(), Some(42));
/// assert_eq!(decode(b"5:hello").unwrap().as_str(), Some("hello"));
/// assert!(decode(b"i42etrailing").is_err());
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_prefix(data, &mut pos)?;

    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Decodes one bencode value starting at `*pos`, advancing `*pos` past it.
///
/// Comparing the position before and after the call recovers the exact
/// encoded span of the value, which is how the metainfo parser hashes the
/// `info` dictionary without re-encoding it.
pub fn decode_prefix(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    decode_value(data, pos, 0)
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::TooDeep);
    }

    match data.get(*pos) {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => decode_integer(data, pos),
        Some(b'l') => decode_list(data, pos, depth),
        Some(b'd') => decode_dict(data, pos, depth),
        Some(b'0'..=b'9') => decode_bytes(data, pos),
        Some(&b) => Err(BencodeError::UnexpectedByte(b)),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let digits = std::str::from_utf8(&data[start..*pos])
        .map_err(|_| BencodeError::InvalidInteger("not ascii".into()))?;

    if digits.is_empty() {
        return Err(BencodeError::InvalidInteger("empty".into()));
    }

    // "i-0e" and zero-padded forms are invalid per BEP-3
    if digits.starts_with("-0") || (digits.starts_with('0') && digits.len() > 1) {
        return Err(BencodeError::InvalidInteger("leading zeros".into()));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| BencodeError::InvalidInteger(digits.into()))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let len: usize = std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidLength)?;

    *pos += 1;

    if data.len() - *pos < len {
        return Err(BencodeError::UnexpectedEof);
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;

    Ok(Value::Bytes(bytes))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        let key = match decode_value(data, pos, depth + 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::InvalidKey),
        };

        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}
