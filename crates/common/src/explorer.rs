//! Chain explorer client abstraction.
//!
//! The upstream beacon-chain explorer is a third-party HTTP API with
//! per-network base URLs and differing response shapes. This module
//! defines the [`ChainExplorer`] trait as the contract the rest of the
//! fleet depends on: a narrow projection of a validator's on-chain state.
//! The registry never sees a specific upstream's response shape.
//!
//! # Contract for implementors
//!
//! Implementations MUST:
//! - be thread-safe (`Send + Sync`)
//! - return [`ExplorerError::NotFound`] for unknown validators
//! - never block inside async methods

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::Network;

// ════════════════════════════════════════════════════════════════════════════
// OBSERVATION PROJECTION
// ════════════════════════════════════════════════════════════════════════════

/// A point-in-time view of one validator as reported by the chain.
///
/// Balances are in whole coins (already divided by the network's
/// smallest-unit denominator). `exit_epoch` is `None` when the chain
/// reports its far-future sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainObservation {
    pub public_key: String,
    pub index: Option<u64>,
    pub status: String,
    pub balance: f64,
    pub effective_balance: f64,
    pub activation_epoch: Option<u64>,
    pub exit_epoch: Option<u64>,
    pub slashed: bool,
}

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("validator not found on chain")]
    NotFound,
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("explorer response could not be decoded: {0}")]
    Decode(String),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
}

// ════════════════════════════════════════════════════════════════════════════
// EXPLORER TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Abstraction over the upstream chain explorer for one network.
#[async_trait]
pub trait ChainExplorer: Send + Sync {
    /// The network this explorer answers for.
    fn network(&self) -> Network;

    /// Look up a validator by its chain-native public key.
    async fn lookup_by_pubkey(&self, pubkey: &str) -> Result<ChainObservation, ExplorerError>;

    /// Look up a validator by its numeric chain index.
    async fn lookup_by_index(&self, index: u64) -> Result<ChainObservation, ExplorerError>;
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════

/// Explorer envelope: `{"status": "OK", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    data: Option<RawValidator>,
}

/// Upstream validator record, lowercase keys as the explorer emits them.
#[derive(Debug, Deserialize)]
struct RawValidator {
    pubkey: String,
    #[serde(default)]
    validatorindex: Option<u64>,
    status: String,
    #[serde(default)]
    balance: u64,
    #[serde(default)]
    effectivebalance: u64,
    #[serde(default)]
    activationepoch: Option<u64>,
    #[serde(default)]
    exitepoch: Option<u64>,
    #[serde(default)]
    slashed: bool,
}

/// HTTP-backed [`ChainExplorer`], one instance per network.
///
/// The base URL comes from the network registry and can be overridden
/// (tests point it at a local stub).
pub struct HttpExplorer {
    network: Network,
    base_url: String,
    balance_divisor: f64,
    far_future_epoch: u64,
    http: reqwest::Client,
}

impl HttpExplorer {
    pub fn for_network(network: Network) -> Self {
        let spec = network.spec();
        Self {
            network,
            base_url: spec.explorer_base.to_string(),
            balance_divisor: spec.balance_divisor,
            far_future_epoch: spec.far_future_epoch,
            http: reqwest::Client::new(),
        }
    }

    /// Replace the upstream base URL (trailing slash stripped).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut url = base_url.into();
        while url.ends_with('/') {
            url.pop();
        }
        self.base_url = url;
        self
    }

    fn project(&self, raw: RawValidator) -> ChainObservation {
        let exit_epoch = raw
            .exitepoch
            .filter(|&e| e != self.far_future_epoch);
        ChainObservation {
            public_key: raw.pubkey,
            index: raw.validatorindex,
            status: raw.status,
            balance: raw.balance as f64 / self.balance_divisor,
            effective_balance: raw.effectivebalance as f64 / self.balance_divisor,
            activation_epoch: raw.activationepoch,
            exit_epoch,
            slashed: raw.slashed,
        }
    }

    async fn fetch(&self, ident: &str) -> Result<ChainObservation, ExplorerError> {
        let url = format!("{}/validator/{}", self.base_url, ident);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExplorerError::NotFound);
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| ExplorerError::Decode(e.to_string()))?;
        if !envelope.status.eq_ignore_ascii_case("ok") {
            return Err(ExplorerError::Decode(format!(
                "upstream status '{}'",
                envelope.status,
            )));
        }
        match envelope.data {
            Some(raw) => Ok(self.project(raw)),
            None => Err(ExplorerError::NotFound),
        }
    }
}

#[async_trait]
impl ChainExplorer for HttpExplorer {
    fn network(&self) -> Network {
        self.network
    }

    async fn lookup_by_pubkey(&self, pubkey: &str) -> Result<ChainObservation, ExplorerError> {
        self.fetch(pubkey).await
    }

    async fn lookup_by_index(&self, index: u64) -> Result<ChainObservation, ExplorerError> {
        self.fetch(&index.to_string()).await
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════

/// In-memory [`ChainExplorer`] for tests: serves pre-seeded observations.
pub struct MockExplorer {
    network: Network,
    observations: Vec<ChainObservation>,
}

impl MockExplorer {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            observations: Vec::new(),
        }
    }

    pub fn with_observation(mut self, obs: ChainObservation) -> Self {
        self.observations.push(obs);
        self
    }
}

#[async_trait]
impl ChainExplorer for MockExplorer {
    fn network(&self) -> Network {
        self.network
    }

    async fn lookup_by_pubkey(&self, pubkey: &str) -> Result<ChainObservation, ExplorerError> {
        self.observations
            .iter()
            .find(|o| o.public_key == pubkey)
            .cloned()
            .ok_or(ExplorerError::NotFound)
    }

    async fn lookup_by_index(&self, index: u64) -> Result<ChainObservation, ExplorerError> {
        self.observations
            .iter()
            .find(|o| o.index == Some(index))
            .cloned()
            .ok_or(ExplorerError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(pubkey: &str, index: u64) -> ChainObservation {
        ChainObservation {
            public_key: pubkey.to_string(),
            index: Some(index),
            status: "active_online".to_string(),
            balance: 32.0,
            effective_balance: 32.0,
            activation_epoch: Some(100),
            exit_epoch: None,
            slashed: false,
        }
    }

    #[tokio::test]
    async fn test_mock_lookup_by_pubkey_and_index() {
        let mock = MockExplorer::new(Network::Mainnet)
            .with_observation(obs("0xaa", 1))
            .with_observation(obs("0xbb", 2));

        let by_key = mock.lookup_by_pubkey("0xbb").await.expect("found");
        assert_eq!(by_key.index, Some(2));

        let by_index = mock.lookup_by_index(1).await.expect("found");
        assert_eq!(by_index.public_key, "0xaa");

        assert!(matches!(
            mock.lookup_by_pubkey("0xcc").await,
            Err(ExplorerError::NotFound)
        ));
    }

    #[test]
    fn test_far_future_exit_epoch_is_none() {
        let explorer = HttpExplorer::for_network(Network::Mainnet);
        let raw = RawValidator {
            pubkey: "0xaa".into(),
            validatorindex: Some(7),
            status: "active_exiting".into(),
            balance: 32_000_000_000,
            effectivebalance: 32_000_000_000,
            activationepoch: Some(5),
            exitepoch: Some(u64::MAX),
            slashed: false,
        };
        let projected = explorer.project(raw);
        assert_eq!(projected.exit_epoch, None);
        assert!((projected.balance - 32.0).abs() < 1e-9);
    }
}
