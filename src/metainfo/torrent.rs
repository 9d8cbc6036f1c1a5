use std::path::PathBuf;

use crate::bencode::{decode_prefix, Value};

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed `.torrent` file.
///
/// # Examples
///
/// ```no_run
/// use remora::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let meta = Metainfo::from_bytes(&data)?;
///
/// println!("{}: {} bytes in {} pieces", meta.info.name, meta.info.total_length, meta.info.pieces.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary with file and piece information.
    pub info: Info,
    /// SHA-1 of the bencoded info dictionary, identifying the swarm.
    pub info_hash: InfoHash,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list (BEP-12).
    pub announce_list: Vec<Vec<String>>,
}

/// The core metadata describing the torrent's content.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or root directory.
    pub name: String,
    /// Bytes per piece; all pieces but possibly the last have this length.
    pub piece_length: u64,
    /// SHA-1 hash of each piece.
    pub pieces: Vec<[u8; 20]>,
    /// Files in download order.
    pub files: Vec<File>,
    /// Total size of all files combined.
    pub total_length: u64,
}

/// A file within a torrent.
///
/// `offset` is the file's starting position in the virtual concatenation of
/// all files, so the piece at byte `p` lives in the file whose
/// `offset..offset + length` range contains `p`.
#[derive(Debug, Clone)]
pub struct File {
    /// Path relative to the download root.
    pub path: PathBuf,
    /// Size in bytes.
    pub length: u64,
    /// Cumulative byte offset in the torrent's content.
    pub offset: u64,
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// The info hash is computed over the exact byte span of the `info`
    /// value in the input, so torrents with unsorted or unusual encodings
    /// hash the same way other clients see them.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        if data.first() != Some(&b'd') {
            return Err(MetainfoError::InvalidField("root"));
        }

        let mut pos = 1;
        let mut announce = None;
        let mut announce_list = Vec::new();
        let mut info = None;

        while pos < data.len() && data[pos] != b'e' {
            let key = match decode_prefix(data, &mut pos)? {
                Value::Bytes(b) => b,
                _ => return Err(MetainfoError::InvalidField("root")),
            };

            let start = pos;
            let value = decode_prefix(data, &mut pos)?;

            match key.as_ref() {
                b"info" => {
                    let info_hash = InfoHash::from_info_bytes(&data[start..pos]);
                    info = Some((parse_info(&value)?, info_hash));
                }
                b"announce" => {
                    announce = value.as_str().map(String::from);
                }
                b"announce-list" => {
                    announce_list = value
                        .as_list()
                        .map(parse_announce_list)
                        .unwrap_or_default();
                }
                _ => {}
            }
        }

        let (info, info_hash) = info.ok_or(MetainfoError::MissingField("info"))?;

        Ok(Self {
            info,
            info_hash,
            announce,
            announce_list,
        })
    }

    /// Returns all tracker URLs, primary `announce` first, then the
    /// announce-list tiers in order, with duplicates removed.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers = Vec::new();

        if let Some(ref announce) = self.announce {
            trackers.push(announce.clone());
        }

        for tier in &self.announce_list {
            for tracker in tier {
                if !trackers.contains(tracker) {
                    trackers.push(tracker.clone());
                }
            }
        }

        trackers
    }
}

fn parse_announce_list(tiers: &[Value]) -> Vec<Vec<String>> {
    tiers
        .iter()
        .filter_map(|tier| {
            tier.as_list().map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(String::from))
                    .collect()
            })
        })
        .collect()
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

    let name = dict
        .get(b"name".as_slice())
        .and_then(|v| v.as_str())
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(|v| v.as_integer())
        .filter(|&v| v > 0)
        .ok_or(MetainfoError::MissingField("piece length"))? as u64;

    let pieces_bytes = dict
        .get(b"pieces".as_slice())
        .and_then(|v| v.as_bytes())
        .ok_or(MetainfoError::MissingField("pieces"))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidHashLength);
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let (files, total_length) = parse_files(dict, &name)?;

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
    })
}

fn parse_files(
    dict: &std::collections::BTreeMap<bytes::Bytes, Value>,
    name: &str,
) -> Result<(Vec<File>, u64), MetainfoError> {
    // single-file form: a top-level "length" key
    if let Some(length) = dict.get(b"length".as_slice()).and_then(|v| v.as_integer()) {
        let length = length as u64;
        let file = File {
            path: PathBuf::from(name),
            length,
            offset: 0,
        };
        return Ok((vec![file], length));
    }

    // multi-file form: a "files" list of {length, path} dictionaries
    let files_list = dict
        .get(b"files".as_slice())
        .and_then(|v| v.as_list())
        .ok_or(MetainfoError::MissingField("length or files"))?;

    let mut files = Vec::with_capacity(files_list.len());
    let mut offset = 0u64;

    for file_value in files_list {
        let file_dict = file_value
            .as_dict()
            .ok_or(MetainfoError::InvalidField("files"))?;

        let length = file_dict
            .get(b"length".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or(MetainfoError::MissingField("file length"))? as u64;

        let path_list = file_dict
            .get(b"path".as_slice())
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("file path"))?;

        let path: PathBuf = std::iter::once(name.to_string())
            .chain(
                path_list
                    .iter()
                    .filter_map(|p| p.as_str().map(String::from)),
            )
            .collect();

        files.push(File {
            path,
            length,
            offset,
        });

        offset += length;
    }

    Ok((files, offset))
}
