//! Supported-network registry.
//!
//! The set of chains the fleet can track is closed. Every component that
//! needs per-network constants (explorer base URL, balance denomination,
//! epoch sentinels) looks them up here by [`Network`] instead of carrying
//! free-floating constants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A supported proof-of-stake network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Gnosis,
    Holesky,
}

impl Network {
    /// All supported networks, in registry order.
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Gnosis, Network::Holesky];

    /// Parse a network identifier. Only the closed set is accepted.
    pub fn parse(s: &str) -> Option<Network> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "ethereum" => Some(Network::Mainnet),
            "gnosis" => Some(Network::Gnosis),
            "holesky" => Some(Network::Holesky),
            _ => None,
        }
    }

    /// Canonical lowercase identifier, as used in config keys and URLs.
    pub fn id(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Gnosis => "gnosis",
            Network::Holesky => "holesky",
        }
    }

    /// Per-network constants for this network.
    pub fn spec(&self) -> &'static NetworkSpec {
        match self {
            Network::Mainnet => &MAINNET,
            Network::Gnosis => &GNOSIS,
            Network::Holesky => &HOLESKY,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Static per-network constants.
///
/// `balance_divisor` converts the explorer's smallest-unit balances into
/// whole coins. `far_future_epoch` is the chain's sentinel for "no exit
/// scheduled"; observations carrying it are treated as having no exit epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSpec {
    pub network: Network,
    pub display_name: &'static str,
    pub explorer_base: &'static str,
    pub balance_divisor: f64,
    pub far_future_epoch: u64,
}

static MAINNET: NetworkSpec = NetworkSpec {
    network: Network::Mainnet,
    display_name: "Ethereum Mainnet",
    explorer_base: "https://beaconcha.in/api/v1",
    balance_divisor: 1_000_000_000.0,
    far_future_epoch: u64::MAX,
};

static GNOSIS: NetworkSpec = NetworkSpec {
    network: Network::Gnosis,
    display_name: "Gnosis Chain",
    explorer_base: "https://gnosischa.in/api/v1",
    balance_divisor: 1_000_000_000.0,
    far_future_epoch: u64::MAX,
};

static HOLESKY: NetworkSpec = NetworkSpec {
    network: Network::Holesky,
    display_name: "Holesky Testnet",
    explorer_base: "https://holesky.beaconcha.in/api/v1",
    balance_divisor: 1_000_000_000.0,
    far_future_epoch: u64::MAX,
};
