//! TCP command server.
//!
//! One listener, one thread per connection:
//!
//! ```text
//!  ipc-accept ──accept──▶ PeerSet.insert ──spawn──▶ ipc-conn-N
//!                                                    │ read ─▶ split on \n ─▶ ProtocolEngine
//!                                                    └ ack ─▶ Link::send
//! ```
//!
//! Sockets run non-blocking and every thread polls the shared `running`
//! flag, so [`IpcServer::stop`] ends them without forcing anything.  The
//! accept thread drops the listener on exit; stop joins it, then joins
//! every connection thread, then closes any peers still registered.
//!
//! Per connection, lines are processed strictly in arrival order.  A line
//! that is not JSON gets its error ack and then the connection is closed;
//! every other rejection keeps the connection open.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::TransportError;

use super::engine::ProtocolEngine;
use super::link::{Peer, PeerSet, TcpLink};

/// Longest unterminated line a connection may buffer before it is dropped.
pub const MAX_LINE_LEN: usize = 64 * 1024;

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const READ_POLL: Duration = Duration::from_millis(5);
const READ_CHUNK: usize = 4096;

pub struct IpcServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    peers: PeerSet,
}

impl IpcServer {
    /// Bind `addr` and start accepting.  Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub fn start(
        addr: SocketAddr,
        engine: ProtocolEngine,
        peers: PeerSet,
    ) -> Result<Self, TransportError> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let running = Arc::new(AtomicBool::new(true));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept = Acceptor {
            listener,
            engine,
            peers: peers.clone(),
            running: Arc::clone(&running),
            connections: Arc::clone(&connections),
        };
        let accept_thread = thread::Builder::new()
            .name("ipc-accept".into())
            .spawn(move || accept.run())
            .map_err(TransportError::Spawn)?;

        info!("IPC server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            running,
            accept_thread: Some(accept_thread),
            connections,
            peers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting, join every thread, close remaining peers.  Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        let Some(accept) = self.accept_thread.take() else {
            return;
        };
        if accept.join().is_err() {
            error!("accept thread panicked");
        }

        let handles = std::mem::take(
            &mut *self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let joined = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                error!("connection thread panicked");
            }
        }

        for peer in self.peers.drain() {
            peer.link.close();
        }
        info!("IPC server on {} stopped ({} connection threads joined)", self.local_addr, joined);
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ───────────────────────────────────────────────────────────────
// Accept loop
// ───────────────────────────────────────────────────────────────

struct Acceptor {
    listener: TcpListener,
    engine: ProtocolEngine,
    peers: PeerSet,
    running: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Acceptor {
    fn run(self) {
        while self.running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!("accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("accept loop exiting");
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let conn = match Connection::open(stream, addr, &self.peers) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("rejecting {}: {}", addr, e);
                return;
            }
        };
        let id = conn.peer.id;
        info!("client {} connected from {}", id, addr);

        let engine = self.engine.clone();
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name(format!("ipc-conn-{id}"))
            .spawn(move || conn.serve(&engine, &running));

        match spawned {
            Ok(handle) => {
                let mut handles = self
                    .connections
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => {
                error!("cannot spawn connection thread for {}: {}", addr, e);
                if let Some(peer) = self.peers.remove(id) {
                    peer.link.close();
                }
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────

enum Flow {
    Continue,
    Close(&'static str),
}

struct Connection {
    peer: Arc<Peer>,
    reader: TcpStream,
    peers: PeerSet,
}

impl Connection {
    fn open(stream: TcpStream, addr: SocketAddr, peers: &PeerSet) -> io::Result<Self> {
        // Clones share the file status flags: the publisher needs
        // non-blocking writes, so the reader polls instead of blocking.
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let link = TcpLink::new(stream)?;
        let peer = peers.insert(addr, Box::new(link));
        Ok(Self {
            peer,
            reader,
            peers: peers.clone(),
        })
    }

    fn serve(mut self, engine: &ProtocolEngine, running: &AtomicBool) {
        let mut pending: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        let reason = loop {
            if !running.load(Ordering::Acquire) {
                break "server stopping";
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => break "peer closed",
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    if let Flow::Close(why) = self.drain_lines(&mut pending, engine) {
                        break why;
                    }
                    if pending.len() > MAX_LINE_LEN {
                        break "line exceeds 64 KiB";
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(READ_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("client {} read error: {}", self.peer.id, e);
                    break "read error";
                }
            }
        };

        if self.peers.remove(self.peer.id).is_none() {
            debug!("client {} already reaped by publisher", self.peer.id);
        }
        self.peer.link.close();
        info!("client {} ({}) disconnected: {}", self.peer.id, self.peer.addr, reason);
    }

    /// Handle every complete line in `pending`, leaving any partial tail.
    fn drain_lines(&self, pending: &mut Vec<u8>, engine: &ProtocolEngine) -> Flow {
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line = &pending[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let flow = self.handle_line(line, engine);
            pending.drain(..=pos);
            if let Flow::Close(_) = flow {
                return flow;
            }
        }
        Flow::Continue
    }

    fn handle_line(&self, line: &[u8], engine: &ProtocolEngine) -> Flow {
        if line.is_empty() {
            return Flow::Continue;
        }
        let dispatch = engine.dispatch_bytes(line);
        if let Err(e) = self.peer.link.send(dispatch.response.as_bytes()) {
            debug!("client {} ack write failed: {}", self.peer.id, e);
            return Flow::Close("ack write failed");
        }
        if dispatch.fail_closed {
            warn!("client {} sent invalid JSON, closing", self.peer.id);
            return Flow::Close("invalid JSON");
        }
        Flow::Continue
    }
}
