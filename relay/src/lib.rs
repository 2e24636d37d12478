//! # Tunnel Relay
//!
//! A small UDP relay for sessions whose peers cannot reach each other
//! directly. Every participant sends to the relay's single socket; the relay
//! checks the tunnel id in the 4-byte header, looks up the destination by the
//! header's virtual port, rewrites that port to the sender's own virtual port
//! and passes the datagram on. Payloads are never inspected.
//!
//! - `forwarder`: routing table and header rewriting, no I/O
//! - `network`: the tokio socket loop around a [`forwarder::Forwarder`]

pub mod forwarder;
pub mod network;
