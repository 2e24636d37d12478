//! Peer index <-> network endpoint resolution
//!
//! The table is filled once from the session configuration before any traffic
//! flows and is read-only afterwards. When the session runs through a relay,
//! every registered endpoint usually shares the relay's IP and differs only in
//! the relay-assigned port, which is why reverse lookups compare ports unless
//! the session opts into port-insensitive matching.

use crate::config::ConfigError;
use shared::{PeerIndex, MAX_PLAYERS};
use std::net::SocketAddr;

/// Real endpoint registered for one peer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub index: PeerIndex,
    pub addr: SocketAddr,
}

impl PeerEndpoint {
    pub fn new(index: PeerIndex, addr: SocketAddr) -> Self {
        Self { index, addr }
    }
}

/// Per-session mapping between peer indices and real endpoints.
#[derive(Debug, Clone)]
pub struct RelayAddressTable {
    endpoints: Vec<PeerEndpoint>,
    relay: Option<SocketAddr>,
    port_insensitive: bool,
}

impl RelayAddressTable {
    pub fn new(relay: Option<SocketAddr>, port_insensitive: bool) -> Self {
        Self {
            endpoints: Vec::with_capacity(MAX_PLAYERS),
            relay,
            port_insensitive,
        }
    }

    /// Adds one endpoint. Only called while the session is being set up.
    pub fn register(&mut self, endpoint: PeerEndpoint) -> Result<(), ConfigError> {
        if endpoint.index.is_reserved() {
            return Err(ConfigError::ReservedIndex);
        }
        if endpoint.index.slot().is_none() {
            return Err(ConfigError::IndexOutOfRange(endpoint.index));
        }
        if self.endpoints.iter().any(|e| e.index == endpoint.index) {
            return Err(ConfigError::DuplicatePeer(endpoint.index));
        }
        if self.endpoints.len() >= MAX_PLAYERS {
            return Err(ConfigError::TableFull {
                capacity: MAX_PLAYERS,
            });
        }

        self.endpoints.push(endpoint);
        Ok(())
    }

    /// Registered endpoint for `index`, or `None` if nothing is registered.
    pub fn resolve(&self, index: PeerIndex) -> Option<SocketAddr> {
        self.endpoints
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.addr)
    }

    /// First peer whose endpoint matches `addr`.
    pub fn reverse_resolve(&self, addr: SocketAddr) -> Option<PeerIndex> {
        self.endpoints
            .iter()
            .find(|e| {
                e.addr.ip() == addr.ip() && (self.port_insensitive || e.addr.port() == addr.port())
            })
            .map(|e| e.index)
    }

    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.relay
    }

    pub fn indices(&self) -> impl Iterator<Item = PeerIndex> + '_ {
        self.endpoints.iter().map(|e| e.index)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
