use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::metainfo::InfoHash;
use crate::peer::PeerId;

use super::error::TrackerError;
use super::response::parse_peers;

/// Port advertised to trackers.
pub const DEFAULT_PORT: u16 = 6881;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(10);

/// One announce endpoint.
///
/// `update_peers` replaces the cached peer list only on a successful
/// announce; on any failure the previous list stays in place and the next
/// refresh simply tries again.
pub struct Tracker {
    url: String,
    client: Client,
    peers: Vec<String>,
}

impl Tracker {
    pub fn new(url: impl Into<String>) -> Result<Self, TrackerError> {
        let url = url.into();

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url));
        }

        let client = Client::builder()
            .timeout(ANNOUNCE_TIMEOUT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            url,
            client,
            peers: Vec::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The peers returned by the most recent successful announce.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Announces to the tracker and refreshes the cached peer list.
    pub async fn update_peers(
        &mut self,
        info_hash: &InfoHash,
        peer_id: &PeerId,
        left: u64,
    ) -> Result<&[String], TrackerError> {
        let url = announce_url(&self.url, info_hash, peer_id, left);

        let response = self.client.get(&url).send().await?;
        let body = response.bytes().await?;

        let peers = parse_peers(&body)?;
        debug!(tracker = %self.url, count = peers.len(), "announce ok");

        self.peers = peers;
        Ok(&self.peers)
    }
}

// the exact query other clients send for a fresh leech: nothing downloaded
// or uploaded yet, everything left
pub(super) fn announce_url(
    announce: &str,
    info_hash: &InfoHash,
    peer_id: &PeerId,
    left: u64,
) -> String {
    format!(
        "{}?info_hash={}&peer_id={}&port={}&downloaded=0&uploaded=0&left={}&event=started",
        announce,
        info_hash.url_encode(),
        peer_id,
        DEFAULT_PORT,
        left,
    )
}
