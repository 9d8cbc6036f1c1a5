use crate::bencode::{decode, Value};

use super::error::TrackerError;

/// Parses an announce response body into `"host:port"` strings.
///
/// The `peers` key comes in two shapes: a compact byte string of 6-byte
/// records (IPv4 address then big-endian port), or a list of dictionaries
/// with `ip` and `port` entries. A `failure reason` key aborts with the
/// tracker's own message.
pub fn parse_peers(body: &[u8]) -> Result<Vec<String>, TrackerError> {
    let value = decode(body)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::InvalidResponse("expected dictionary".into()))?;

    if let Some(reason) = dict
        .get(b"failure reason".as_slice())
        .and_then(|v| v.as_str())
    {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let peers = dict
        .get(b"peers".as_slice())
        .ok_or_else(|| TrackerError::InvalidResponse("missing peers".into()))?;

    match peers {
        Value::Bytes(data) => Ok(parse_compact(data)),
        Value::List(list) => Ok(parse_dicts(list)),
        _ => Err(TrackerError::InvalidResponse("malformed peers".into())),
    }
}

// 4 bytes IPv4 + 2 bytes port per record; a trailing fragment is ignored
fn parse_compact(data: &[u8]) -> Vec<String> {
    data.chunks_exact(6)
        .map(|record| {
            let port = u16::from_be_bytes([record[4], record[5]]);
            format!(
                "{}.{}.{}.{}:{}",
                record[0], record[1], record[2], record[3], port
            )
        })
        .collect()
}

fn parse_dicts(list: &[Value]) -> Vec<String> {
    list.iter()
        .filter_map(|peer| {
            let ip = peer.get(b"ip")?.as_str()?;
            let port = peer.get(b"port")?.as_integer()?;
            Some(format!("{}:{}", ip, port))
        })
        .collect()
}
