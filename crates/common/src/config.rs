//! Configuration loading using TOML and serde.
//!
//! Both binaries load a small typed config: [`FleetConfig`] for the server,
//! [`AgentConfig`] for the host agent. Fields are optional in the file;
//! consumers fall back to [`Default`] values. A handful of deployment
//! secrets can also come from `STAKEWATCH_*` environment variables, which
//! take precedence over the file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// Server-side configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct FleetConfig {
    /// Bind address for the HTTP API (e.g., "127.0.0.1:8080").
    pub bind_addr: Option<String>,

    /// Default network for validators created without an explicit one.
    pub default_network: Option<String>,

    /// Passphrase the vault key is derived from. Rotating it without
    /// migrating stored ciphertexts makes them permanently unreadable.
    pub vault_passphrase: Option<String>,

    /// Token required for admin routes.
    pub admin_token: Option<String>,

    /// Agent capability tokens: token -> node server names it may report
    /// for. A single "*" entry grants the whole fleet.
    pub agent_tokens: Option<HashMap<String, Vec<String>>>,

    /// Telegram bot token for the notification dispatcher. Absent means
    /// notifications are logged only.
    pub telegram_bot_token: Option<String>,

    /// Override for the Telegram API base URL (tests point this at a stub).
    pub telegram_api_base: Option<String>,

    /// Per-network explorer base URL overrides, keyed by network id.
    pub explorer_base_urls: Option<HashMap<String, String>>,

    /// Expected agent poll interval in seconds; commands pending longer
    /// than five intervals are surfaced as stale.
    pub agent_poll_interval_secs: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            bind_addr: Some("127.0.0.1:8080".to_string()),
            default_network: Some("mainnet".to_string()),
            vault_passphrase: None,
            admin_token: None,
            agent_tokens: None,
            telegram_bot_token: None,
            telegram_api_base: None,
            explorer_base_urls: None,
            agent_poll_interval_secs: Some(60),
        }
    }
}

impl FleetConfig {
    /// Load config from a TOML file path.
    /// If the file is missing or fails to parse, an error is returned.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<FleetConfig> {
        let s = fs::read_to_string(path.as_ref())?;
        let cfg: FleetConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Apply `STAKEWATCH_*` environment overrides on top of this config.
    ///
    /// Recognized variables:
    /// - `STAKEWATCH_BIND_ADDR`
    /// - `STAKEWATCH_VAULT_PASSPHRASE`
    /// - `STAKEWATCH_ADMIN_TOKEN`
    /// - `STAKEWATCH_TELEGRAM_BOT_TOKEN`
    pub fn apply_env(mut self) -> FleetConfig {
        if let Ok(v) = std::env::var("STAKEWATCH_BIND_ADDR") {
            self.bind_addr = Some(v);
        }
        if let Ok(v) = std::env::var("STAKEWATCH_VAULT_PASSPHRASE") {
            self.vault_passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("STAKEWATCH_ADMIN_TOKEN") {
            self.admin_token = Some(v);
        }
        if let Ok(v) = std::env::var("STAKEWATCH_TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(v);
        }
        self
    }
}

/// Host-agent configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Fleet server endpoint (e.g., "http://127.0.0.1:8080").
    pub server_endpoint: Option<String>,

    /// Capability token presented on every request.
    pub agent_token: Option<String>,

    /// Id of the node server record this agent reports for.
    pub node_id: Option<String>,

    /// Seconds between poll/report cycles.
    pub poll_interval_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            server_endpoint: Some("http://127.0.0.1:8080".to_string()),
            agent_token: None,
            node_id: None,
            poll_interval_secs: Some(60),
        }
    }
}

impl AgentConfig {
    /// Load agent config from a TOML file path.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<AgentConfig> {
        let s = fs::read_to_string(path.as_ref())?;
        let cfg: AgentConfig = toml::from_str(&s)?;
        Ok(cfg)
    }
}
