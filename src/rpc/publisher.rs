//! Telemetry fan-out.
//!
//! [`Publisher::publish`] is called from the control loop.  It copies the
//! peer handles out under the [`PeerSet`] lock, then writes to each peer
//! with [`Link::try_send`] outside the lock:
//!
//! - success: nothing to do;
//! - `Busy` (an ack is being written): this record is skipped for that peer;
//! - anything else: the peer is removed and its link closed, without retry.
//!
//! Nothing here blocks and no error escapes to the caller.

use std::sync::Arc;

use log::debug;

use crate::app::ports::TelemetrySink;

use super::link::{Peer, PeerId, PeerSet};

/// Initial scratch capacity; grows only if more peers connect.
const SCRATCH_PEERS: usize = 16;

pub struct Publisher {
    peers: PeerSet,
    scratch: Vec<Arc<Peer>>,
    dead: Vec<PeerId>,
    reaped: u64,
    skipped: u64,
}

impl Publisher {
    pub fn new(peers: PeerSet) -> Self {
        Self {
            peers,
            scratch: Vec::with_capacity(SCRATCH_PEERS),
            dead: Vec::with_capacity(SCRATCH_PEERS),
            reaped: 0,
            skipped: 0,
        }
    }

    /// Send `record` to every connected peer.
    ///
    /// Returns `true` when every peer took the record; vacuously `true`
    /// with no peers.
    pub fn publish(&mut self, record: &[u8]) -> bool {
        self.peers.snapshot_into(&mut self.scratch);

        let mut delivered_all = true;
        for peer in &self.scratch {
            match peer.link.try_send(record) {
                Ok(()) => {}
                Err(e) if !e.is_fatal_for_peer() => {
                    delivered_all = false;
                    self.skipped += 1;
                }
                Err(e) => {
                    delivered_all = false;
                    debug!("dropping peer {} ({}): {}", peer.id, peer.addr, e);
                    self.dead.push(peer.id);
                }
            }
        }
        self.scratch.clear();

        for id in self.dead.drain(..) {
            if let Some(peer) = self.peers.remove(id) {
                peer.link.close();
                self.reaped += 1;
            }
        }

        delivered_all
    }

    /// Peers removed after a failed write, since construction.
    pub fn reaped(&self) -> u64 {
        self.reaped
    }

    /// Records skipped because a peer's writer was busy.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }
}

impl TelemetrySink for Publisher {
    fn publish(&mut self, record: &[u8]) -> bool {
        Publisher::publish(self, record)
    }
}
