use thiserror::Error;

/// Errors produced while decoding bencode.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is malformed (empty, zero-padded, or out of range).
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidLength,

    /// Dictionary key is not a byte string.
    #[error("dictionary key is not a string")]
    InvalidKey,

    /// Encountered a byte that starts no bencode value.
    #[error("unexpected byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Extra data exists after the value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    TooDeep,
}
