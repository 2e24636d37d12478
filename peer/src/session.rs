//! Per-session state
//!
//! A [`Session`] owns every piece of latency-sync state for one game: the
//! relay transport, the sampler, the consensus table and the pacing
//! controller. It is built from a validated configuration when the game
//! starts and dropped when it ends, so nothing carries over between sessions.

use crate::channel::EventChannel;
use crate::config::{ConfigError, SessionConfig};
use crate::consensus::LatencyConsensus;
use crate::controller::{StatusSink, SyncParameterController, SyncState};
use crate::sampler::LatencySampler;
use crate::tunnel::{DatagramSocket, TunnelTransport};
use log::info;
use shared::{Frame, LatencyReport, PeerIndex};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind session socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// What happened during one [`Session::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub frame: Frame,
    /// Reports applied to the consensus table this frame.
    pub applied: usize,
    /// Report handed to the channel this frame.
    pub emitted: Option<LatencyReport>,
    pub escalated: bool,
}

pub struct Session<S> {
    local_index: PeerIndex,
    frame: Frame,
    transport: TunnelTransport<S>,
    sampler: LatencySampler,
    consensus: LatencyConsensus,
    controller: SyncParameterController,
}

impl<S: DatagramSocket> Session<S> {
    pub fn new(config: &SessionConfig, socket: S) -> Result<Self, SessionError> {
        config.validate()?;

        let local_index = config.local_peer();
        let tiers = config.tier_table()?;
        let table = config.address_table()?;
        let tunnel_id = config.tunnel()?.map(|(_, id)| id);

        match table.relay_addr() {
            Some(relay) => info!(
                "Session for player {} with {} peers via relay {} (tunnel {})",
                local_index,
                table.len(),
                relay,
                config.tunnel_id
            ),
            None => info!(
                "Session for player {} with {} direct peers",
                local_index,
                table.len()
            ),
        }

        Ok(Self {
            local_index,
            frame: 0,
            transport: TunnelTransport::new(socket, table, tunnel_id),
            sampler: LatencySampler::new(local_index, config.remote, config.sampling_interval),
            consensus: LatencyConsensus::new(config.remote, config.sampling_interval),
            controller: SyncParameterController::new(tiers, config.max_tier),
        })
    }

    /// Simulates one frame: applies every report due now, then lets the
    /// sampler emit a new one. Never fails.
    pub fn step(
        &mut self,
        measured_delay: Option<u8>,
        channel: &mut dyn EventChannel,
        status: &mut dyn StatusSink,
    ) -> FrameSummary {
        let frame = self.frame;
        let tier_before = self.controller.state().current_tier;

        let mut applied = 0;
        for report in channel.take_due(frame) {
            if self
                .consensus
                .on_report(&report, frame, &mut self.controller, status)
                .is_some()
            {
                applied += 1;
            }
        }

        let emitted = self.sampler.tick(
            frame,
            measured_delay,
            self.controller.tiers(),
            self.controller.state().max_ahead_buffer,
            channel,
        );

        self.frame = frame.saturating_add(1);

        FrameSummary {
            frame,
            applied,
            emitted,
            escalated: self.controller.state().current_tier > tier_before,
        }
    }

    /// Frame that the next `step` will simulate.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn local_index(&self) -> PeerIndex {
        self.local_index
    }

    pub fn sync_state(&self) -> &SyncState {
        self.controller.state()
    }

    pub fn consensus(&self) -> &LatencyConsensus {
        &self.consensus
    }

    pub fn transport(&self) -> &TunnelTransport<S> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TunnelTransport<S> {
        &mut self.transport
    }
}
