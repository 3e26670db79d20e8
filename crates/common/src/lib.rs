//! # Stakewatch Common Crate
//!
//! Shared leaf crate for the stakewatch validator fleet workspace.
//!
//! ## Modules
//! - `config`: Configuration management (TOML + env overrides)
//! - `network`: Supported-chain registry and per-network constants
//! - `explorer`: Chain explorer client abstraction
//! - `crypto`: Envelope encryption for operator secrets
//! - `report`: Agent report wire format (shared by server and agent)
//!
//! ## Explorer Architecture
//! ```text
//! ┌──────────────────┐
//! │  ChainExplorer   │  <- Abstract trait
//! └────────┬─────────┘
//!          │
//!    ┌─────┴──────┐
//!    │            │
//! ┌──▼────────┐ ┌─▼────────────┐
//! │HttpExplorer│ │MockExplorer  │
//! └───────────┘ └──────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let explorer = HttpExplorer::for_network(Network::Mainnet);
//! let obs = explorer.lookup_by_pubkey("0x...").await?;
//! ```

pub mod config;
pub mod crypto;
pub mod explorer;
pub mod network;
pub mod report;

pub use config::{AgentConfig, FleetConfig};
pub use crypto::{derive_key, open, seal, CryptoError, SealedBlob};
pub use explorer::{ChainExplorer, ChainObservation, ExplorerError, HttpExplorer, MockExplorer};
pub use network::{Network, NetworkSpec};
pub use report::{AgentReport, IngestSummary, ReportKind};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
