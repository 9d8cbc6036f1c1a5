use std::fmt;

use sha1::{Digest, Sha1};

/// The 20-byte SHA-1 of a torrent's bencoded `info` dictionary.
///
/// The info hash is the swarm identifier: it is sent in the tracker announce
/// and in every peer handshake, and a peer whose handshake carries a
/// different hash is talking about a different torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Creates an info hash from its raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Computes the info hash of a raw bencoded `info` dictionary.
    pub fn from_info_bytes(info_bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        Self(hasher.finalize().into())
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hexadecimal form, for logs.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(40), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02x}", b);
                s
            })
    }

    /// Percent-encodes the hash for a tracker announce query: every byte
    /// becomes `%XX` with uppercase hex digits.
    pub fn url_encode(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(60), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "%{:02X}", b);
                s
            })
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
