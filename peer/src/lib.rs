//! # Lockstep Peer Library
//!
//! Session-side implementation of relay tunnelling and adaptive latency
//! synchronization for peer-to-peer lockstep games. Every peer runs the same
//! code and reaches the same pacing decisions without any peer being in charge.
//!
//! ## Relay Tunnelling
//!
//! Peers that cannot reach each other directly exchange datagrams through a
//! relay. Each outgoing datagram carries a four byte header naming the
//! session's tunnel and a virtual port; the [`tunnel`] module adds and strips
//! that header and maps virtual endpoints back to player indices through the
//! [`address_table`].
//!
//! ## Latency Synchronization
//!
//! Each peer periodically classifies its measured delay into a tier and sends
//! a report through the lockstep [`channel`]. Reports are stamped for a future
//! frame, so every peer applies the same reports on the same frame. The
//! [`consensus`] table folds them into the worst tier seen recently and the
//! [`controller`] escalates the pacing parameters to match. Tiers never go
//! back down within a session.
//!
//! ## Module Organization
//!
//! - `address_table`: peer index to endpoint mapping and its reverse
//! - `channel`: the frame-stamped event channel contract and an in-memory queue
//! - `config`: TOML session configuration and validation
//! - `consensus`: per-peer latency table with decay
//! - `controller`: tier escalation and status lines
//! - `network`: the tokio frame loop, ping/pong delay estimation
//! - `sampler`: periodic latency reports
//! - `session`: the per-session arena tying it all together
//! - `tunnel`: relay header handling over any datagram socket
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::config::SessionConfig;
//! use peer::network::PeerNode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::load("session.toml")?;
//!     let mut node = PeerNode::bind(&config, "0.0.0.0:7000", 30).await?;
//!
//!     // Runs forever, one simulated frame per tick
//!     node.run(None).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod address_table;
pub mod channel;
pub mod config;
pub mod consensus;
pub mod controller;
pub mod network;
pub mod sampler;
pub mod session;
pub mod tunnel;
