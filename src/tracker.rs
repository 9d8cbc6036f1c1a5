//! HTTP tracker announces (BEP-3)
//!
//! A tracker is asked over plain HTTP GET for the swarm's peer list. Each
//! [`Tracker`] keeps the most recent list it received, so a failed announce
//! degrades to stale peers instead of none.

mod error;
mod http;
mod response;

pub use error::TrackerError;
pub use http::{Tracker, DEFAULT_PORT};
pub use response::parse_peers;
