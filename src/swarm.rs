//! The swarm coordinator.
//!
//! Owns the trackers, the peer sessions, and the piece store, and runs the
//! periodic work: tracker refresh, dead-peer reaping, cache eviction, and
//! the progress/termination check. Each peer session runs in its own task;
//! the coordinator only ever looks at a session's shared `connected` flag
//! and abort handle, so all swarm bookkeeping stays on this one task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::metainfo::Metainfo;
use crate::peer::{PeerId, PeerSession};
use crate::storage::{PieceStore, CACHE_BUDGET};
use crate::tracker::Tracker;

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);
const REAP_INTERVAL: Duration = Duration::from_secs(5);
const EVICT_INTERVAL: Duration = Duration::from_secs(5);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

// a peer gets this long to become connected before the reaper may take it
const PEER_GRACE: Duration = Duration::from_secs(30);

struct PeerHandle {
    created_at: Instant,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Coordinates one download to completion.
pub struct Swarm {
    meta: Arc<Metainfo>,
    store: Arc<PieceStore>,
    peer_id: PeerId,
    trackers: Vec<Tracker>,
    peers: HashMap<String, PeerHandle>,
}

impl Swarm {
    pub fn new(meta: Arc<Metainfo>, store: Arc<PieceStore>, trackers: Vec<Tracker>) -> Self {
        Self {
            meta,
            store,
            peer_id: PeerId::default(),
            trackers,
            peers: HashMap::new(),
        }
    }

    /// Runs until every piece is verified and on disk.
    ///
    /// The first tracker announce happens immediately; after that the
    /// timers take over. Tracker failures are logged and absorbed — the
    /// swarm keeps going with whatever peers it has.
    pub async fn run(&mut self) {
        let mut announce = interval(ANNOUNCE_INTERVAL);
        let mut reap = interval(REAP_INTERVAL);
        let mut evict = interval(EVICT_INTERVAL);
        let mut progress = interval(PROGRESS_INTERVAL);

        loop {
            tokio::select! {
                _ = announce.tick() => self.refresh_peers().await,
                _ = reap.tick() => self.reap_peers(),
                _ = evict.tick() => self.store.evict_cached(CACHE_BUDGET),
                _ = progress.tick() => {
                    let (done, total) = self.store.progress();
                    debug!(done, total, peers = self.peers.len(), "progress");

                    if self.store.is_complete() {
                        info!("download finished");
                        self.shutdown();
                        return;
                    }
                }
            }
        }
    }

    /// Announces to every tracker and admits each address not already in
    /// the swarm. Addresses are deduplicated by their `"host:port"` string;
    /// the first admission wins.
    async fn refresh_peers(&mut self) {
        let info_hash = self.meta.info_hash;
        let left = self.store.total_length();

        for tracker in &mut self.trackers {
            if let Err(e) = tracker.update_peers(&info_hash, &self.peer_id, left).await {
                warn!(tracker = %tracker.url(), error = %e, "announce failed");
            }
        }

        let addrs: Vec<String> = self
            .trackers
            .iter()
            .flat_map(|t| t.peers().iter().cloned())
            .collect();

        for addr in addrs {
            self.admit(addr);
        }
    }

    fn admit(&mut self, addr: String) {
        if self.peers.contains_key(&addr) {
            return;
        }

        debug!(%addr, "admitting peer");

        let connected = Arc::new(AtomicBool::new(false));
        let session = PeerSession::new(
            addr.clone(),
            self.meta.info_hash,
            self.peer_id,
            self.store.clone(),
            connected.clone(),
        );

        let task = tokio::spawn(async move {
            // session errors are peer-local; they already logged themselves
            let _ = session.run().await;
        });

        self.peers.insert(
            addr,
            PeerHandle {
                created_at: Instant::now(),
                connected,
                task,
            },
        );
    }

    /// Drops sessions that are not connected and past their grace period.
    /// Covers both connects that never succeeded and sessions that died;
    /// a reaped address can be re-admitted by a later announce.
    fn reap_peers(&mut self) {
        let before = self.peers.len();

        self.peers.retain(|addr, handle| {
            let keep = handle.connected.load(Ordering::Relaxed)
                || handle.created_at.elapsed() < PEER_GRACE;
            if !keep {
                debug!(%addr, "reaping peer");
                handle.task.abort();
            }
            keep
        });

        let reaped = before - self.peers.len();
        if reaped > 0 {
            debug!(reaped, remaining = self.peers.len(), "reaped peers");
        }
    }

    fn shutdown(&mut self) {
        for (_, handle) in self.peers.drain() {
            handle.task.abort();
        }
    }
}
