use crate::bencode::BencodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// The tracker answered with a `failure reason`.
    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
