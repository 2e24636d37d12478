//! Relay-aware datagram transport
//!
//! [`TunnelTransport`] lets the rest of the peer address other participants
//! by [`PeerIndex`] as if every one of them had a direct socket. With a relay
//! configured, every outgoing datagram is prefixed with a [`RelayHeader`] and
//! sent to the relay; incoming datagrams are checked against the session's
//! tunnel id, stripped, and mapped back to a peer index. Without a relay the
//! payload goes straight to the peer's endpoint.
//!
//! Stray, truncated or foreign datagrams are counted and dropped. Only real
//! socket failures come back as errors.

use crate::address_table::RelayAddressTable;
use log::{debug, error, warn};
use shared::{PeerIndex, RelayHeader, MAX_DATAGRAM_SIZE, RELAY_HEADER_SIZE};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Non-blocking datagram socket. Both calls must return
/// `io::ErrorKind::WouldBlock` instead of waiting.
pub trait DatagramSocket {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

impl DatagramSocket for tokio::net::UdpSocket {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        tokio::net::UdpSocket::try_send_to(self, buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        tokio::net::UdpSocket::try_recv_from(self, buf)
    }
}

/// Expects the socket to have been put in non-blocking mode.
impl DatagramSocket for std::net::UdpSocket {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf)
    }
}

/// In-memory socket for offline sessions and tests.
#[derive(Debug)]
pub struct MemorySocket {
    local: SocketAddr,
    inbox: RefCell<VecDeque<io::Result<(SocketAddr, Vec<u8>)>>>,
    outbox: RefCell<Vec<(SocketAddr, Vec<u8>)>>,
    fail_sends: Cell<bool>,
}

impl MemorySocket {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            local,
            inbox: RefCell::new(VecDeque::new()),
            outbox: RefCell::new(Vec::new()),
            fail_sends: Cell::new(false),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Queues a datagram as if it had arrived from `from`.
    pub fn push_incoming(&self, from: SocketAddr, datagram: Vec<u8>) {
        self.inbox.borrow_mut().push_back(Ok((from, datagram)));
    }

    /// Queues a receive failure of `kind`, returned in order with datagrams.
    pub fn push_receive_error(&self, kind: io::ErrorKind) {
        self.inbox.borrow_mut().push_back(Err(kind.into()));
    }

    /// Removes and returns everything sent so far.
    pub fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Makes every following send fail with `BrokenPipe`.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.set(fail);
    }
}

impl DatagramSocket for MemorySocket {
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.fail_sends.get() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send disabled"));
        }
        self.outbox.borrow_mut().push((target, buf.to_vec()));
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let Some(next) = self.inbox.borrow_mut().pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let (from, datagram) = next?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Nothing is registered for this index; nothing was sent.
    #[error("no endpoint registered for peer {0}")]
    UnknownPeer(PeerIndex),
    #[error("socket send failed: {0}")]
    Io(#[from] io::Error),
}

/// Result of one receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Datagram { from: PeerIndex, payload: Vec<u8> },
    /// A datagram was read and discarded.
    Dropped,
    /// Nothing to read right now.
    Idle,
}

impl Received {
    /// True when no payload was produced.
    pub fn is_empty(&self) -> bool {
        !matches!(self, Received::Datagram { .. })
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sent: u64,
    pub received: u64,
    pub unknown_peer_sends: u64,
    pub send_failures: u64,
    pub dropped_short: u64,
    pub dropped_oversize: u64,
    pub dropped_foreign: u64,
    pub dropped_unknown: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tunnel {
    relay: SocketAddr,
    tunnel_id: u16,
}

pub struct TunnelTransport<S> {
    socket: S,
    table: RelayAddressTable,
    tunnel: Option<Tunnel>,
    stats: TransportStats,
    /// One byte over the limit, so an oversized datagram shows up as `len > MAX_DATAGRAM_SIZE`.
    buffer: Box<[u8; MAX_DATAGRAM_SIZE + 1]>,
}

impl<S: DatagramSocket> TunnelTransport<S> {
    /// Transport that relays through the table's relay address when
    /// `tunnel_id` is given, and talks to peers directly otherwise.
    pub fn new(socket: S, table: RelayAddressTable, tunnel_id: Option<u16>) -> Self {
        let tunnel = match (table.relay_addr(), tunnel_id) {
            (Some(relay), Some(tunnel_id)) => Some(Tunnel { relay, tunnel_id }),
            _ => None,
        };

        Self {
            socket,
            table,
            tunnel,
            stats: TransportStats::default(),
            buffer: Box::new([0u8; MAX_DATAGRAM_SIZE + 1]),
        }
    }

    /// Sends `payload` to `peer`. Returns the number of payload bytes sent.
    pub fn send(&mut self, peer: PeerIndex, payload: &[u8]) -> Result<usize, SendError> {
        let Some(endpoint) = self.table.resolve(peer) else {
            self.stats.unknown_peer_sends += 1;
            warn!("Dropping send to unknown peer {}", peer);
            return Err(SendError::UnknownPeer(peer));
        };

        let result = match self.tunnel {
            Some(tunnel) => {
                let datagram = RelayHeader::new(tunnel.tunnel_id, endpoint.port()).wrap(payload);
                self.socket
                    .try_send_to(&datagram, tunnel.relay)
                    .map(|n| n.saturating_sub(RELAY_HEADER_SIZE))
            }
            None => self.socket.try_send_to(payload, endpoint),
        };

        match result {
            Ok(n) => {
                self.stats.sent += 1;
                Ok(n)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                Err(SendError::Io(e))
            }
        }
    }

    /// Reads at most one datagram without blocking.
    pub fn receive(&mut self) -> io::Result<Received> {
        let (len, source) = match self.socket.try_recv_from(&mut self.buffer[..]) {
            Ok(result) => result,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Received::Idle),
            Err(e) => return Err(e),
        };
        if len > MAX_DATAGRAM_SIZE {
            self.stats.dropped_oversize += 1;
            debug!("Dropping oversized datagram from {}", source);
            return Ok(Received::Dropped);
        }
        let datagram = &self.buffer[..len];

        let (sender_addr, payload) = match self.tunnel {
            Some(tunnel) => {
                let Ok((header, payload)) = RelayHeader::parse(datagram) else {
                    self.stats.dropped_short += 1;
                    debug!("Dropping {} byte datagram from {}", len, source);
                    return Ok(Received::Dropped);
                };
                if header.tunnel_id != tunnel.tunnel_id {
                    self.stats.dropped_foreign += 1;
                    debug!(
                        "Dropping datagram for tunnel {} (ours is {}) from {}",
                        header.tunnel_id, tunnel.tunnel_id, source
                    );
                    return Ok(Received::Dropped);
                }
                (SocketAddr::new(source.ip(), header.port), payload)
            }
            None => (source, datagram),
        };

        let Some(from) = self.table.reverse_resolve(sender_addr) else {
            self.stats.dropped_unknown += 1;
            debug!("Dropping datagram from unrecognized sender {}", sender_addr);
            return Ok(Received::Dropped);
        };

        self.stats.received += 1;
        Ok(Received::Datagram {
            from,
            payload: payload.to_vec(),
        })
    }

    /// Reads until the socket has nothing left, keeping only accepted datagrams.
    ///
    /// A socket error ends the drain. It is returned only when nothing was
    /// accepted before it; otherwise it is logged and the accepted datagrams
    /// are returned.
    pub fn drain(&mut self) -> io::Result<Vec<(PeerIndex, Vec<u8>)>> {
        let mut datagrams = Vec::new();
        loop {
            match self.receive() {
                Ok(Received::Datagram { from, payload }) => datagrams.push((from, payload)),
                Ok(Received::Dropped) => continue,
                Ok(Received::Idle) => return Ok(datagrams),
                Err(e) if datagrams.is_empty() => return Err(e),
                Err(e) => {
                    error!("Error receiving packet after {} datagrams: {}", datagrams.len(), e);
                    return Ok(datagrams);
                }
            }
        }
    }

    pub fn is_relayed(&self) -> bool {
        self.tunnel.is_some()
    }

    pub fn table(&self) -> &RelayAddressTable {
        &self.table
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }
}
