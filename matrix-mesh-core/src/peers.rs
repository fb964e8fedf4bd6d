//! Liveness tracking of mesh peers.
//!
//! Every announcement refreshes the sender's `last_seen`. Peers that stay
//! quiet longer than the liveness timeout are pruned, and a board's rank is
//! its position among the surviving ids in ascending order.

use heapless::index_map::FnvIndexMap;
use log::{debug, info, warn};

use crate::{LogicalTime, NodeId};

/// Upper bound on simultaneously tracked peers (self included).
pub const MAX_PEERS: usize = 16;

/// Last-seen table for the peers currently considered alive.
#[derive(Debug, Clone)]
pub struct PeerTracker {
    timeout: LogicalTime,
    last_seen: FnvIndexMap<NodeId, LogicalTime, MAX_PEERS>,
}

impl PeerTracker {
    /// Create an empty tracker that expires peers after `timeout`
    pub fn new(timeout: LogicalTime) -> Self {
        Self {
            timeout,
            last_seen: FnvIndexMap::new(),
        }
    }

    /// Record `now` as the last time `peer` was heard from.
    ///
    /// When the table is full, the least recently seen peer makes room.
    pub fn touch(&mut self, peer: NodeId, now: LogicalTime) {
        if let Some(seen) = self.last_seen.get_mut(&peer) {
            *seen = now;
            return;
        }

        if self.last_seen.len() == MAX_PEERS {
            if let Some(stalest) = self.stalest() {
                warn!("Peer table full, evicting {}", stalest);
                self.last_seen.remove(&stalest);
            }
        }

        if self.last_seen.insert(peer, now).is_ok() {
            info!("Peer {} joined ({} tracked)", peer, self.last_seen.len());
        }
    }

    /// Remove every peer whose `last_seen` is older than `now - timeout`.
    ///
    /// Returns the number of peers removed.
    pub fn prune(&mut self, now: LogicalTime) -> usize {
        let cutoff = now.saturating_sub(self.timeout);
        let before = self.last_seen.len();
        self.last_seen.retain(|&peer, &mut seen| {
            let alive = seen >= cutoff;
            if !alive {
                info!(
                    "Peer {} expired: last seen {}, cutoff {}, now {}",
                    peer, seen, cutoff, now
                );
            }
            alive
        });
        let removed = before - self.last_seen.len();
        if removed > 0 {
            debug!("{} peers remain after pruning", self.last_seen.len());
        }
        removed
    }

    /// Number of tracked ids strictly below `id`.
    ///
    /// An id that is not tracked (e.g. self before its first announcement)
    /// has rank 0.
    pub fn rank_of(&self, id: NodeId) -> usize {
        if !self.last_seen.contains_key(&id) {
            return 0;
        }
        self.last_seen.keys().filter(|&&peer| peer < id).count()
    }

    /// Number of tracked peers
    pub fn count(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether `peer` is currently tracked
    pub fn contains(&self, peer: NodeId) -> bool {
        self.last_seen.contains_key(&peer)
    }

    /// Last time `peer` was heard from, if tracked
    pub fn last_seen(&self, peer: NodeId) -> Option<LogicalTime> {
        self.last_seen.get(&peer).copied()
    }

    /// Tracked peers in no particular order
    pub fn peers(&self) -> impl Iterator<Item = (NodeId, LogicalTime)> + '_ {
        self.last_seen.iter().map(|(&peer, &seen)| (peer, seen))
    }

    fn stalest(&self) -> Option<NodeId> {
        self.last_seen
            .iter()
            .min_by_key(|&(peer, seen)| (*seen, *peer))
            .map(|(peer, _)| *peer)
    }
}
