use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAX_PLAYERS: usize = 8;
pub const MAX_TIER: u8 = 9;
pub const TIER_COUNT: usize = MAX_TIER as usize + 1;

pub const RELAY_HEADER_SIZE: usize = 4;
pub const LATENCY_REPORT_SIZE: usize = 2;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Frames between two latency reports from the same peer.
pub const SAMPLING_INTERVAL: u32 = 30;
/// A peer entry goes stale after `DECAY_FACTOR * sampling interval` frames.
pub const DECAY_FACTOR: u32 = 4;
/// Sampling intervals to wait before the first report, so the delay estimate can settle.
pub const INITIAL_SAMPLING_DELAY: u32 = 6;

/// Simulation frame number.
pub type Frame = u32;

/// Session-wide player slot. Index 0 is reserved for local, non-relayed simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIndex(pub u8);

impl PeerIndex {
    pub const LOCAL: PeerIndex = PeerIndex(0);

    pub fn is_reserved(self) -> bool {
        self.0 == 0
    }

    /// Position of this index in a fixed `MAX_PLAYERS` table, if it has one.
    pub fn slot(self) -> Option<usize> {
        let index = self.0 as usize;
        if (1..=MAX_PLAYERS).contains(&index) {
            Some(index - 1)
        } else {
            None
        }
    }

    pub fn from_slot(slot: usize) -> Self {
        PeerIndex((slot + 1) as u8)
    }
}

impl fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },
    #[error("latency tier {0} out of range")]
    BadTier(u8),
}

/// Prefix carried by every datagram that goes through the relay.
///
/// Wire format, big-endian:
/// ```text
/// [tunnel_id: u16][port: u16][payload...]
/// ```
/// On the way out `port` names the destination peer; the relay rewrites it
/// to the sender's port before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    pub tunnel_id: u16,
    pub port: u16,
}

impl RelayHeader {
    pub fn new(tunnel_id: u16, port: u16) -> Self {
        Self { tunnel_id, port }
    }

    pub fn to_bytes(&self) -> [u8; RELAY_HEADER_SIZE] {
        let id = self.tunnel_id.to_be_bytes();
        let port = self.port.to_be_bytes();
        [id[0], id[1], port[0], port[1]]
    }

    /// Builds `header ++ payload`.
    pub fn wrap(&self, payload: &[u8]) -> Vec<u8> {
        let mut datagram = Vec::with_capacity(RELAY_HEADER_SIZE + payload.len());
        datagram.extend_from_slice(&self.to_bytes());
        datagram.extend_from_slice(payload);
        datagram
    }

    /// Splits a datagram into its header and the remaining payload.
    pub fn parse(datagram: &[u8]) -> Result<(RelayHeader, &[u8]), WireError> {
        if datagram.len() < RELAY_HEADER_SIZE {
            return Err(WireError::TooShort {
                len: datagram.len(),
                needed: RELAY_HEADER_SIZE,
            });
        }

        let tunnel_id = u16::from_be_bytes([datagram[0], datagram[1]]);
        let port = u16::from_be_bytes([datagram[2], datagram[3]]);

        Ok((
            RelayHeader { tunnel_id, port },
            &datagram[RELAY_HEADER_SIZE..],
        ))
    }
}

/// One peer's latency measurement, scheduled for a future simulation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyReport {
    pub peer_index: PeerIndex,
    /// Measured round trip + 1; `NO_DATA` when nothing was measured.
    pub max_ahead_hint: u8,
    /// 1..=MAX_TIER, or `NO_DATA` when uninitialized.
    pub latency_tier: u8,
    pub frame_stamp: Frame,
}

impl LatencyReport {
    pub const NO_DATA: u8 = 0;

    pub fn has_data(&self) -> bool {
        self.max_ahead_hint != Self::NO_DATA
    }

    /// Event body as carried by the lockstep channel. Peer index and frame
    /// stamp travel in the channel's own envelope.
    pub fn payload(&self) -> [u8; LATENCY_REPORT_SIZE] {
        [self.max_ahead_hint, self.latency_tier]
    }

    pub fn from_payload(
        peer_index: PeerIndex,
        frame_stamp: Frame,
        payload: &[u8],
    ) -> Result<Self, WireError> {
        if payload.len() < LATENCY_REPORT_SIZE {
            return Err(WireError::TooShort {
                len: payload.len(),
                needed: LATENCY_REPORT_SIZE,
            });
        }

        let latency_tier = payload[1];
        if latency_tier > MAX_TIER {
            return Err(WireError::BadTier(latency_tier));
        }

        Ok(Self {
            peer_index,
            max_ahead_hint: payload[0],
            latency_tier,
            frame_stamp,
        })
    }
}

/// Frame pacing applied while a tier is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    /// Frames of buffering allowed ahead of confirmed receipt. Doubles as the
    /// classification threshold for the tier.
    pub max_ahead: u8,
    /// Frames between two event sends.
    pub send_rate: u8,
}

impl TierParams {
    pub const fn new(max_ahead: u8, send_rate: u8) -> Self {
        Self {
            max_ahead,
            send_rate,
        }
    }
}

/// Per-tier pacing lookup. Tier 0 holds the parameters a session starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: [TierParams; TIER_COUNT],
}

impl TierTable {
    pub const DEFAULT_TIERS: [TierParams; TIER_COUNT] = [
        TierParams::new(4, 2),
        TierParams::new(4, 2),
        TierParams::new(6, 2),
        TierParams::new(8, 2),
        TierParams::new(12, 4),
        TierParams::new(16, 4),
        TierParams::new(20, 4),
        TierParams::new(24, 4),
        TierParams::new(28, 4),
        TierParams::new(32, 4),
    ];

    pub fn new(tiers: [TierParams; TIER_COUNT]) -> Self {
        Self { tiers }
    }

    /// Parameters for `tier`, saturating at the highest tier.
    pub fn params(&self, tier: u8) -> TierParams {
        self.tiers[(tier.min(MAX_TIER)) as usize]
    }

    /// Lowest tier in 1..=MAX_TIER whose threshold covers `delay`.
    pub fn classify(&self, delay: u8) -> u8 {
        (1..=MAX_TIER)
            .find(|&tier| delay <= self.tiers[tier as usize].max_ahead)
            .unwrap_or(MAX_TIER)
    }

    /// Thresholds must never shrink from one tier to the next.
    pub fn is_ascending(&self) -> bool {
        self.tiers
            .windows(2)
            .all(|pair| pair[0].max_ahead <= pair[1].max_ahead)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIERS)
    }
}

/// Peer-to-peer packets carried inside relayed datagrams.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A lockstep event stamped for `frame`.
    LatencyEvent {
        frame: Frame,
        sender: PeerIndex,
        payload: [u8; LATENCY_REPORT_SIZE],
    },
    Ping {
        sender: PeerIndex,
        frame: Frame,
    },
    Pong {
        sender: PeerIndex,
        frame: Frame,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_index_slots() {
        assert_eq!(PeerIndex(0).slot(), None);
        assert_eq!(PeerIndex(1).slot(), Some(0));
        assert_eq!(PeerIndex(MAX_PLAYERS as u8).slot(), Some(MAX_PLAYERS - 1));
        assert_eq!(PeerIndex(MAX_PLAYERS as u8 + 1).slot(), None);
        assert_eq!(PeerIndex::from_slot(2), PeerIndex(3));
        assert!(PeerIndex::LOCAL.is_reserved());
    }

    #[test]
    fn test_relay_header_layout() {
        let datagram = RelayHeader::new(7, 200).wrap(b"hi");
        assert_eq!(datagram, vec![0x00, 0x07, 0x00, 0xC8, b'h', b'i']);
    }

    #[test]
    fn test_relay_header_parse() {
        let datagram = [0x12, 0x34, 0xAB, 0xCD, 1, 2, 3];
        let (header, payload) = RelayHeader::parse(&datagram).unwrap();

        assert_eq!(header.tunnel_id, 0x1234);
        assert_eq!(header.port, 0xABCD);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn test_relay_header_header_only() {
        let (header, payload) = RelayHeader::parse(&[0, 1, 0, 2]).unwrap();
        assert_eq!(header, RelayHeader::new(1, 2));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_relay_header_too_short() {
        let result = RelayHeader::parse(&[0, 7, 0]);
        assert_eq!(result, Err(WireError::TooShort { len: 3, needed: 4 }));
    }

    #[test]
    fn test_latency_report_payload() {
        let report = LatencyReport {
            peer_index: PeerIndex(2),
            max_ahead_hint: 5,
            latency_tier: 3,
            frame_stamp: 1000,
        };
        assert_eq!(report.payload(), [5, 3]);

        let decoded = LatencyReport::from_payload(PeerIndex(2), 1000, &report.payload()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_latency_report_rejects_bad_tier() {
        let result = LatencyReport::from_payload(PeerIndex(1), 10, &[5, MAX_TIER + 1]);
        assert_eq!(result, Err(WireError::BadTier(MAX_TIER + 1)));

        let result = LatencyReport::from_payload(PeerIndex(1), 10, &[5]);
        assert!(matches!(result, Err(WireError::TooShort { .. })));
    }

    #[test]
    fn test_latency_report_no_data() {
        let report = LatencyReport {
            peer_index: PeerIndex(1),
            max_ahead_hint: LatencyReport::NO_DATA,
            latency_tier: 4,
            frame_stamp: 0,
        };
        assert!(!report.has_data());
    }

    #[test]
    fn test_classify_picks_lowest_covering_tier() {
        let table = TierTable::default();

        assert_eq!(table.classify(0), 1);
        assert_eq!(table.classify(4), 1);
        assert_eq!(table.classify(5), 2);
        assert_eq!(table.classify(8), 3);
        assert_eq!(table.classify(9), 4);
        assert_eq!(table.classify(32), 9);
    }

    #[test]
    fn test_classify_saturates() {
        let table = TierTable::default();
        assert_eq!(table.classify(200), MAX_TIER);
        assert_eq!(table.classify(u8::MAX), MAX_TIER);
    }

    #[test]
    fn test_tier_table_ascending() {
        assert!(TierTable::default().is_ascending());

        let mut tiers = TierTable::DEFAULT_TIERS;
        tiers[5] = TierParams::new(2, 2);
        assert!(!TierTable::new(tiers).is_ascending());
    }

    #[test]
    fn test_params_saturate() {
        let table = TierTable::default();
        assert_eq!(table.params(42), table.params(MAX_TIER));
    }

    #[test]
    fn test_packet_serialization_latency_event() {
        let packet = Packet::LatencyEvent {
            frame: 1234,
            sender: PeerIndex(3),
            payload: [9, 2],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::LatencyEvent {
                frame,
                sender,
                payload,
            } => {
                assert_eq!(frame, 1234);
                assert_eq!(sender, PeerIndex(3));
                assert_eq!(payload, [9, 2]);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
