//! Routing table and header rewriting for one tunnel

use shared::{RelayHeader, WireError};
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;

/// Why a datagram was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error(transparent)]
    Malformed(#[from] WireError),
    #[error("datagram for tunnel {got}, relay serves tunnel {expected}")]
    ForeignTunnel { expected: u16, got: u16 },
    #[error("no route for source {0}")]
    UnknownSource(SocketAddr),
    #[error("no route for virtual port {0}")]
    UnknownDestination(u16),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub forwarded: u64,
    pub dropped: u64,
}

/// Maps virtual ports to the real endpoints behind them.
///
/// A datagram's header names the destination's virtual port on the way in.
/// On the way out the relay rewrites it to the sender's virtual port, so the
/// receiver sees every peer as `relay address : virtual port`.
#[derive(Debug, Clone)]
pub struct Forwarder {
    tunnel_id: u16,
    routes: HashMap<u16, SocketAddr>,
    sources: HashMap<SocketAddr, u16>,
    stats: ForwarderStats,
}

impl Forwarder {
    pub fn new(tunnel_id: u16) -> Self {
        Self {
            tunnel_id,
            routes: HashMap::new(),
            sources: HashMap::new(),
            stats: ForwarderStats::default(),
        }
    }

    /// Routes `port` to `addr`. Returns `false` and keeps the existing route
    /// when either side is already taken.
    pub fn add_route(&mut self, port: u16, addr: SocketAddr) -> bool {
        if self.routes.contains_key(&port) || self.sources.contains_key(&addr) {
            return false;
        }
        self.routes.insert(port, addr);
        self.sources.insert(addr, port);
        true
    }

    pub fn tunnel_id(&self) -> u16 {
        self.tunnel_id
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    /// Returns where to send `datagram` and the rewritten bytes.
    pub fn forward(
        &mut self,
        src: SocketAddr,
        datagram: &[u8],
    ) -> Result<(SocketAddr, Vec<u8>), DropReason> {
        let result = self.route(src, datagram);
        match result {
            Ok(_) => self.stats.forwarded += 1,
            Err(_) => self.stats.dropped += 1,
        }
        result
    }

    fn route(&self, src: SocketAddr, datagram: &[u8]) -> Result<(SocketAddr, Vec<u8>), DropReason> {
        let (header, payload) = RelayHeader::parse(datagram)?;
        if header.tunnel_id != self.tunnel_id {
            return Err(DropReason::ForeignTunnel {
                expected: self.tunnel_id,
                got: header.tunnel_id,
            });
        }

        let source_port = *self
            .sources
            .get(&src)
            .ok_or(DropReason::UnknownSource(src))?;
        let destination = *self
            .routes
            .get(&header.port)
            .ok_or(DropReason::UnknownDestination(header.port))?;

        Ok((
            destination,
            RelayHeader::new(self.tunnel_id, source_port).wrap(payload),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn forwarder() -> Forwarder {
        let mut forwarder = Forwarder::new(7);
        assert!(forwarder.add_route(100, addr("192.168.0.1:7001")));
        assert!(forwarder.add_route(200, addr("192.168.0.2:7002")));
        forwarder
    }

    #[test]
    fn test_forward_rewrites_port_to_sender() {
        let mut forwarder = forwarder();
        let datagram = RelayHeader::new(7, 200).wrap(b"hi");

        let (destination, forwarded) = forwarder.forward(addr("192.168.0.1:7001"), &datagram).unwrap();

        assert_eq!(destination, addr("192.168.0.2:7002"));
        assert_eq!(forwarded, vec![0x00, 0x07, 0x00, 0x64, b'h', b'i']);
        assert_eq!(forwarder.stats().forwarded, 1);
    }

    #[test]
    fn test_duplicate_routes_rejected() {
        let mut forwarder = forwarder();
        assert!(!forwarder.add_route(100, addr("192.168.0.9:7009")));
        assert!(!forwarder.add_route(300, addr("192.168.0.1:7001")));
        assert_eq!(forwarder.route_count(), 2);
    }

    #[test]
    fn test_short_datagram_dropped() {
        let mut forwarder = forwarder();
        let result = forwarder.forward(addr("192.168.0.1:7001"), &[0, 7, 0]);
        assert!(matches!(result, Err(DropReason::Malformed(WireError::TooShort { .. }))));
        assert_eq!(forwarder.stats().dropped, 1);
    }

    #[test]
    fn test_foreign_tunnel_dropped() {
        let mut forwarder = forwarder();
        let datagram = RelayHeader::new(8, 200).wrap(b"hi");
        assert_eq!(
            forwarder.forward(addr("192.168.0.1:7001"), &datagram),
            Err(DropReason::ForeignTunnel { expected: 7, got: 8 })
        );
    }

    #[test]
    fn test_unknown_source_dropped() {
        let mut forwarder = forwarder();
        let datagram = RelayHeader::new(7, 200).wrap(b"hi");
        assert_eq!(
            forwarder.forward(addr("10.1.1.1:9999"), &datagram),
            Err(DropReason::UnknownSource(addr("10.1.1.1:9999")))
        );
    }

    #[test]
    fn test_unknown_destination_dropped() {
        let mut forwarder = forwarder();
        let datagram = RelayHeader::new(7, 300).wrap(b"hi");
        assert_eq!(
            forwarder.forward(addr("192.168.0.1:7001"), &datagram),
            Err(DropReason::UnknownDestination(300))
        );
    }
}
