//! Peer links and the shared peer set.
//!
//! A [`Link`] is the write half of one connection.  It offers two send
//! flavours:
//!
//! - [`Link::try_send`]: never blocks.  Used by the publisher from the
//!   control loop thread.
//! - [`Link::send`]: waits a bounded time for socket buffer space.  Used
//!   for acks from the connection's own thread.
//!
//! [`PeerSet`] is the single list of connected peers.  Its lock is held only
//! to insert, remove, or copy out `Arc` handles; never across I/O.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Upper bound on how long an ack write waits for socket buffer space.
pub const ACK_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Write half of a connection.
pub trait Link: Send + Sync {
    /// Write all of `bytes` now or fail.
    ///
    /// [`TransportError::Busy`] means another writer holds the link and
    /// nothing was written.  Any other error leaves the stream in an
    /// unknown state and the peer should be dropped.
    fn try_send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Write all of `bytes`, waiting at most a bounded time.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Shut the connection down.  Idempotent.
    fn close(&self);
}

// ───────────────────────────────────────────────────────────────
// TCP link
// ───────────────────────────────────────────────────────────────

/// [`Link`] over a non-blocking `TcpStream`.
pub struct TcpLink {
    writer: Mutex<TcpStream>,
    /// Separate handle so `close` never waits on the writer lock.
    control: TcpStream,
}

impl TcpLink {
    /// `stream` must already be in non-blocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let control = stream.try_clone()?;
        Ok(Self {
            writer: Mutex::new(stream),
            control,
        })
    }

    fn lock(&self) -> MutexGuard<'_, TcpStream> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Link for TcpLink {
    fn try_send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut stream = match self.writer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(TransportError::Busy),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        loop {
            return match stream.write(bytes) {
                Ok(n) if n == bytes.len() => Ok(()),
                Ok(0) => Err(TransportError::Closed),
                // Partial frame on the wire; the stream is now misaligned.
                Ok(_) => Err(TransportError::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e.into()),
            };
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + ACK_WRITE_TIMEOUT;
        let mut stream = self.lock();
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::WouldBlock);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&self) {
        // NotConnected after the peer already hung up is expected.
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

// ───────────────────────────────────────────────────────────────
// Peer set
// ───────────────────────────────────────────────────────────────

pub type PeerId = u64;

pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub link: Box<dyn Link>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Shared list of connected peers.  Clones share the same list.
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<Mutex<Vec<Arc<Peer>>>>,
    next_id: Arc<AtomicU64>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer and return its handle.
    pub fn insert(&self, addr: SocketAddr, link: Box<dyn Link>) -> Arc<Peer> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer { id, addr, link });
        self.lock().push(Arc::clone(&peer));
        peer
    }

    /// Remove a peer.  `None` if someone else already removed it.
    pub fn remove(&self, id: PeerId) -> Option<Arc<Peer>> {
        let mut peers = self.lock();
        let idx = peers.iter().position(|p| p.id == id)?;
        Some(peers.swap_remove(idx))
    }

    /// Replace the contents of `out` with the current peers.
    ///
    /// `out` keeps its capacity between calls, so a steady peer count never
    /// reallocates.
    pub fn snapshot_into(&self, out: &mut Vec<Arc<Peer>>) {
        out.clear();
        out.extend(self.lock().iter().cloned());
    }

    /// Take every peer out of the set.
    pub fn drain(&self) -> Vec<Arc<Peer>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Peer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
