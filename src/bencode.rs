//! Bencode decoding (BEP-3)
//!
//! Bencode is the encoding trackers and `.torrent` files use for loosely
//! structured data. A leech-only client never produces bencode, so this
//! module only decodes.

mod decode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use error::BencodeError;
pub use value::Value;
