//! Tier escalation and frame pacing parameters
//!
//! The agreed latency tier only ever goes up during a session. There is no
//! path back down, even after the peer that caused an escalation speeds up.

use log::info;
use shared::{TierTable, MAX_TIER};

/// Pacing state read by the frame loop every simulated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    pub current_tier: u8,
    pub worst_max_ahead: u8,
    /// Frames between two event sends.
    pub send_rate: u8,
    /// Frames the local simulation may run ahead of confirmed input.
    pub max_ahead_buffer: u8,
}

/// Where the one user-visible line per escalation goes.
pub trait StatusSink {
    fn post(&mut self, line: &str);
}

/// Writes status lines to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn post(&mut self, line: &str) {
        info!("{}", line);
    }
}

impl StatusSink for Vec<String> {
    fn post(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

pub struct SyncParameterController {
    state: SyncState,
    tiers: TierTable,
    max_tier: u8,
}

impl SyncParameterController {
    /// Starts at tier 0 with its pacing parameters.
    pub fn new(tiers: TierTable, max_tier: u8) -> Self {
        let initial = tiers.params(0);
        Self {
            state: SyncState {
                current_tier: 0,
                worst_max_ahead: 0,
                send_rate: initial.send_rate,
                max_ahead_buffer: initial.max_ahead,
            },
            tiers,
            max_tier: max_tier.min(MAX_TIER),
        }
    }

    /// Escalates to `candidate_tier` (capped at the session's maximum) if it
    /// is above the current tier. Returns whether the state changed.
    pub fn apply(
        &mut self,
        candidate_tier: u8,
        worst_max_ahead: u8,
        status: &mut dyn StatusSink,
    ) -> bool {
        let tier = candidate_tier.min(self.max_tier);
        if tier <= self.state.current_tier {
            return false;
        }

        let params = self.tiers.params(tier);
        self.state = SyncState {
            current_tier: tier,
            worst_max_ahead,
            send_rate: params.send_rate,
            max_ahead_buffer: params.max_ahead,
        };

        status.post(&format!(
            "Latency mode set to tier {} (max ahead {}, send rate {})",
            tier, params.max_ahead, params.send_rate
        ));
        true
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn max_tier(&self) -> u8 {
        self.max_tier
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }
}
