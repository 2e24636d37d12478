//! Session-wide latency agreement
//!
//! Every peer keeps the same fixed table of the latest report per player slot
//! and recomputes the aggregate each time a report is applied. Reports arrive
//! through the lockstep channel, so every peer applies the same reports on the
//! same frames, and the recomputation reads nothing but that table and the
//! frame counter. No peer is authoritative; they all reach the same answer.
//!
//! An entry that has not been refreshed for the decay window is cleared, so a
//! peer that goes silent stops holding the aggregate up.

use crate::controller::{StatusSink, SyncParameterController};
use log::debug;
use shared::{Frame, LatencyReport, PeerIndex, DECAY_FACTOR, MAX_PLAYERS};

/// Latest report from one peer. All zero means "no data".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerLatencyEntry {
    pub max_ahead: u8,
    pub tier: u8,
    pub last_update_frame: Frame,
}

impl PeerLatencyEntry {
    pub fn is_empty(&self) -> bool {
        self.max_ahead == LatencyReport::NO_DATA
    }
}

/// Result of one recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub candidate_tier: u8,
    pub worst_max_ahead: u8,
}

#[derive(Debug, Clone)]
pub struct LatencyConsensus {
    entries: [PeerLatencyEntry; MAX_PLAYERS],
    decay_window: u32,
    remote: bool,
}

impl LatencyConsensus {
    /// Entries expire after `DECAY_FACTOR` sampling intervals.
    pub fn new(remote: bool, sampling_interval: u32) -> Self {
        Self::with_decay_window(remote, sampling_interval.saturating_mul(DECAY_FACTOR))
    }

    pub fn with_decay_window(remote: bool, decay_window: u32) -> Self {
        Self {
            entries: [PeerLatencyEntry::default(); MAX_PLAYERS],
            decay_window,
            remote,
        }
    }

    /// Applies a report delivered at `current_frame` and escalates the
    /// controller if the new aggregate calls for it. Returns `None` when the
    /// report is ignored.
    ///
    /// The entry is dated by the report's frame stamp, which is the delivery
    /// frame on every peer whenever the channel delivers on time. A late
    /// report therefore still expires on the same frame everywhere.
    pub fn on_report(
        &mut self,
        report: &LatencyReport,
        current_frame: Frame,
        controller: &mut SyncParameterController,
        status: &mut dyn StatusSink,
    ) -> Option<Aggregate> {
        if !self.remote || !report.has_data() {
            return None;
        }
        let Some(slot) = report.peer_index.slot() else {
            debug!("Ignoring latency report from out-of-range peer {}", report.peer_index);
            return None;
        };

        self.entries[slot] = PeerLatencyEntry {
            max_ahead: report.max_ahead_hint,
            tier: report.latency_tier,
            last_update_frame: report.frame_stamp.min(current_frame),
        };

        let aggregate = self.recompute(current_frame);
        controller.apply(aggregate.candidate_tier, aggregate.worst_max_ahead, status);
        Some(aggregate)
    }

    /// Clears stale entries and folds the rest into one aggregate.
    pub fn recompute(&mut self, current_frame: Frame) -> Aggregate {
        let mut aggregate = Aggregate::default();
        let decay_window = self.decay_window;

        for entry in self.entries.iter_mut() {
            if entry.is_empty() {
                continue;
            }
            if is_stale(entry, decay_window, current_frame) {
                *entry = PeerLatencyEntry::default();
                continue;
            }
            aggregate.worst_max_ahead = aggregate.worst_max_ahead.max(entry.max_ahead);
            aggregate.candidate_tier = aggregate.candidate_tier.max(entry.tier);
        }

        aggregate
    }

    /// Whether `peer` would still count toward an aggregate computed at `frame`.
    pub fn is_active(&self, peer: PeerIndex, frame: Frame) -> bool {
        self.entry(peer)
            .is_some_and(|entry| !entry.is_empty() && !is_stale(entry, self.decay_window, frame))
    }

    pub fn entry(&self, peer: PeerIndex) -> Option<&PeerLatencyEntry> {
        peer.slot().map(|slot| &self.entries[slot])
    }

    pub fn decay_window(&self) -> u32 {
        self.decay_window
    }
}

fn is_stale(entry: &PeerLatencyEntry, decay_window: u32, current_frame: Frame) -> bool {
    current_frame >= entry.last_update_frame.saturating_add(decay_window)
}
