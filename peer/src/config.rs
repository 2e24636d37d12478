//! Session configuration
//!
//! Read once when a session is set up. Every check that can fail is done by
//! [`SessionConfig::validate`] so that a bad configuration stops the session
//! from starting instead of surfacing mid-game.
//!
//! ```toml
//! local_index = 1
//! relay_enabled = true
//! relay = "203.0.113.5:50000"
//! tunnel_id = 7
//! max_tier = 9
//!
//! [[peers]]
//! index = 2
//! address = "203.0.113.5:200"
//! ```

use crate::address_table::{PeerEndpoint, RelayAddressTable};
use serde::Deserialize;
use shared::{PeerIndex, TierParams, TierTable, MAX_PLAYERS, MAX_TIER, SAMPLING_INTERVAL, TIER_COUNT};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("relay mode is enabled but no relay address is configured")]
    RelayAddressMissing,
    #[error("peer index 0 is reserved for local simulation")]
    ReservedIndex,
    #[error("peer index {0} is outside 1..={max}", max = MAX_PLAYERS)]
    IndexOutOfRange(PeerIndex),
    #[error("peer index {0} is registered twice")]
    DuplicatePeer(PeerIndex),
    #[error("local index {0} must not appear in the peer list")]
    LocalIndexRegistered(PeerIndex),
    #[error("peer table is full ({capacity} entries)")]
    TableFull { capacity: usize },
    #[error("tier table needs {expected} entries, got {got}")]
    TierTableLength { expected: usize, got: usize },
    #[error("tier table thresholds must be ascending")]
    TierTableNotAscending,
    #[error("tier {tier} has a zero send rate")]
    ZeroSendRate { tier: usize },
    #[error("max tier {0} is above {max}", max = MAX_TIER)]
    MaxTierOutOfRange(u8),
    #[error("sampling interval must be at least one frame")]
    ZeroSamplingInterval,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub index: u8,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Our own player slot.
    pub local_index: u8,
    /// False for single-machine sessions; latency sampling is then disabled.
    #[serde(default = "default_remote")]
    pub remote: bool,
    #[serde(default)]
    pub relay_enabled: bool,
    pub relay: Option<SocketAddr>,
    #[serde(default)]
    pub tunnel_id: u16,
    #[serde(default)]
    pub port_insensitive: bool,
    #[serde(default = "default_max_tier")]
    pub max_tier: u8,
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u32,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    pub tiers: Option<Vec<TierParams>>,
}

fn default_remote() -> bool {
    true
}

fn default_max_tier() -> u8 {
    MAX_TIER
}

fn default_sampling_interval() -> u32 {
    SAMPLING_INTERVAL
}

impl SessionConfig {
    /// Direct (non-relayed) remote session with default pacing.
    pub fn direct(local_index: u8) -> Self {
        Self {
            local_index,
            remote: true,
            relay_enabled: false,
            relay: None,
            tunnel_id: 0,
            port_insensitive: false,
            max_tier: MAX_TIER,
            sampling_interval: SAMPLING_INTERVAL,
            peers: Vec::new(),
            tiers: None,
        }
    }

    /// Remote session that routes through `relay` under `tunnel_id`.
    pub fn relayed(local_index: u8, relay: SocketAddr, tunnel_id: u16) -> Self {
        Self {
            relay_enabled: true,
            relay: Some(relay),
            tunnel_id,
            ..Self::direct(local_index)
        }
    }

    pub fn with_peer(mut self, index: u8, address: SocketAddr) -> Self {
        self.peers.push(PeerConfig { index, address });
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn local_peer(&self) -> PeerIndex {
        PeerIndex(self.local_index)
    }

    /// Relay endpoint and tunnel id when relaying is active.
    pub fn tunnel(&self) -> Result<Option<(SocketAddr, u16)>, ConfigError> {
        if !self.relay_enabled {
            return Ok(None);
        }
        let relay = self.relay.ok_or(ConfigError::RelayAddressMissing)?;
        Ok(Some((relay, self.tunnel_id)))
    }

    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        let Some(tiers) = &self.tiers else {
            return Ok(TierTable::default());
        };

        let tiers: [TierParams; TIER_COUNT] =
            tiers
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::TierTableLength {
                    expected: TIER_COUNT,
                    got: tiers.len(),
                })?;

        if let Some(tier) = tiers.iter().position(|t| t.send_rate == 0) {
            return Err(ConfigError::ZeroSendRate { tier });
        }

        let table = TierTable::new(tiers);
        if !table.is_ascending() {
            return Err(ConfigError::TierTableNotAscending);
        }
        Ok(table)
    }

    pub fn address_table(&self) -> Result<RelayAddressTable, ConfigError> {
        let relay = self.tunnel()?.map(|(addr, _)| addr);
        let mut table = RelayAddressTable::new(relay, self.port_insensitive);

        for peer in &self.peers {
            let index = PeerIndex(peer.index);
            if index == self.local_peer() {
                return Err(ConfigError::LocalIndexRegistered(index));
            }
            table.register(PeerEndpoint::new(index, peer.address))?;
        }
        Ok(table)
    }

    /// Runs every setup-time check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let local = self.local_peer();
        if local.is_reserved() {
            return Err(ConfigError::ReservedIndex);
        }
        if local.slot().is_none() {
            return Err(ConfigError::IndexOutOfRange(local));
        }
        if self.max_tier > MAX_TIER {
            return Err(ConfigError::MaxTierOutOfRange(self.max_tier));
        }
        if self.sampling_interval == 0 {
            return Err(ConfigError::ZeroSamplingInterval);
        }

        self.tunnel()?;
        self.tier_table()?;
        self.address_table()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = SessionConfig::from_toml_str(
            r#"
            local_index = 1
            relay_enabled = true
            relay = "203.0.113.5:50000"
            tunnel_id = 7
            max_tier = 6

            [[peers]]
            index = 2
            address = "203.0.113.5:200"

            [[peers]]
            index = 3
            address = "203.0.113.5:300"
            "#,
        )
        .unwrap();

        assert_eq!(config.local_peer(), PeerIndex(1));
        assert!(config.remote);
        assert_eq!(config.tunnel().unwrap(), Some((addr("203.0.113.5:50000"), 7)));
        assert_eq!(config.max_tier, 6);
        assert_eq!(config.sampling_interval, SAMPLING_INTERVAL);
        assert_eq!(config.peers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error() {
        let result = SessionConfig::from_toml_str("local_index = \"one\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_relay_without_address() {
        let mut config = SessionConfig::direct(1);
        config.relay_enabled = true;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::RelayAddressMissing)
        ));
    }

    #[test]
    fn test_relay_address_ignored_when_disabled() {
        let mut config = SessionConfig::direct(1);
        config.relay = Some(addr("10.0.0.1:50000"));

        assert_eq!(config.tunnel().unwrap(), None);
        assert_eq!(config.address_table().unwrap().relay_addr(), None);
    }

    #[test]
    fn test_reserved_local_index() {
        let config = SessionConfig::direct(0);
        assert!(matches!(config.validate(), Err(ConfigError::ReservedIndex)));
    }

    #[test]
    fn test_local_index_in_peer_list() {
        let config = SessionConfig::direct(1).with_peer(1, addr("10.0.0.1:1"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LocalIndexRegistered(PeerIndex(1)))
        ));
    }

    #[test]
    fn test_duplicate_peer() {
        let config = SessionConfig::direct(1)
            .with_peer(2, addr("10.0.0.2:1"))
            .with_peer(2, addr("10.0.0.3:1"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePeer(PeerIndex(2)))
        ));
    }

    #[test]
    fn test_max_tier_out_of_range() {
        let mut config = SessionConfig::direct(1);
        config.max_tier = MAX_TIER + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaxTierOutOfRange(_))
        ));
    }

    #[test]
    fn test_custom_tier_table() {
        let mut config = SessionConfig::direct(1);
        config.tiers = Some((0..TIER_COUNT as u8).map(|i| TierParams::new(2 + i * 2, 2)).collect());

        let table = config.tier_table().unwrap();
        assert_eq!(table.params(3), TierParams::new(8, 2));
    }

    #[test]
    fn test_tier_table_wrong_length() {
        let mut config = SessionConfig::direct(1);
        config.tiers = Some(vec![TierParams::new(4, 2); 3]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TierTableLength { expected: 10, got: 3 })
        ));
    }

    #[test]
    fn test_tier_table_descending() {
        let mut tiers = TierTable::DEFAULT_TIERS.to_vec();
        tiers[2] = TierParams::new(1, 2);

        let mut config = SessionConfig::direct(1);
        config.tiers = Some(tiers);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TierTableNotAscending)
        ));
    }

    #[test]
    fn test_tier_table_zero_send_rate() {
        let mut tiers = TierTable::DEFAULT_TIERS.to_vec();
        tiers[4] = TierParams::new(12, 0);

        let mut config = SessionConfig::direct(1);
        config.tiers = Some(tiers);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroSendRate { tier: 4 })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = SessionConfig::load("/nonexistent/session.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
