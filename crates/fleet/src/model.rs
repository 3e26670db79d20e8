//! Core fleet records.
//!
//! Everything the server tracks lives here as plain serde structs:
//! validators, node servers, queued commands, and provisioning orders.
//! Records carry explicit `u64` millisecond timestamps supplied by the
//! caller. No constructor reads the wall clock, which keeps every state
//! transition reproducible in tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stakewatch_common::network::Network;

// ════════════════════════════════════════════════════════════════════════════
// VALIDATOR STATUS
// ════════════════════════════════════════════════════════════════════════════

/// Lifecycle status mirrored from the chain.
///
/// The registry records whatever status the chain (or an agent) last
/// reported. It does not enforce transition legality; the chain is the
/// authority on validator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    Pending,
    PendingQueued,
    ActiveOngoing,
    ActiveOnline,
    ActiveOffline,
    ActiveExiting,
    ExitingOnline,
    ExitingOffline,
    Exited,
    ExitedUnslashed,
    WithdrawalPossible,
    WithdrawalDone,
    SlashingOnline,
    SlashingOffline,
    Slashed,
    Unknown,
}

impl ValidatorStatus {
    /// Parse an upstream status string. Unrecognized values collapse to
    /// [`ValidatorStatus::Unknown`] rather than failing the whole report.
    pub fn parse(s: &str) -> ValidatorStatus {
        match s {
            "pending" => ValidatorStatus::Pending,
            "pending_queued" => ValidatorStatus::PendingQueued,
            "active_ongoing" => ValidatorStatus::ActiveOngoing,
            "active_online" => ValidatorStatus::ActiveOnline,
            "active_offline" => ValidatorStatus::ActiveOffline,
            "active_exiting" => ValidatorStatus::ActiveExiting,
            "exiting_online" => ValidatorStatus::ExitingOnline,
            "exiting_offline" => ValidatorStatus::ExitingOffline,
            "exited" => ValidatorStatus::Exited,
            "exited_unslashed" => ValidatorStatus::ExitedUnslashed,
            "withdrawal_possible" => ValidatorStatus::WithdrawalPossible,
            "withdrawal_done" => ValidatorStatus::WithdrawalDone,
            "slashing_online" => ValidatorStatus::SlashingOnline,
            "slashing_offline" => ValidatorStatus::SlashingOffline,
            "slashed" => ValidatorStatus::Slashed,
            _ => ValidatorStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorStatus::Pending => "pending",
            ValidatorStatus::PendingQueued => "pending_queued",
            ValidatorStatus::ActiveOngoing => "active_ongoing",
            ValidatorStatus::ActiveOnline => "active_online",
            ValidatorStatus::ActiveOffline => "active_offline",
            ValidatorStatus::ActiveExiting => "active_exiting",
            ValidatorStatus::ExitingOnline => "exiting_online",
            ValidatorStatus::ExitingOffline => "exiting_offline",
            ValidatorStatus::Exited => "exited",
            ValidatorStatus::ExitedUnslashed => "exited_unslashed",
            ValidatorStatus::WithdrawalPossible => "withdrawal_possible",
            ValidatorStatus::WithdrawalDone => "withdrawal_done",
            ValidatorStatus::SlashingOnline => "slashing_online",
            ValidatorStatus::SlashingOffline => "slashing_offline",
            ValidatorStatus::Slashed => "slashed",
            ValidatorStatus::Unknown => "unknown",
        }
    }

    /// A healthy validator is attesting and not on its way out involuntarily.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            ValidatorStatus::ActiveOngoing
                | ValidatorStatus::ActiveOnline
                | ValidatorStatus::ExitingOnline
        )
    }

    /// Statuses that warrant an operator alert when entered.
    pub fn is_alertable(&self) -> bool {
        matches!(
            self,
            ValidatorStatus::ActiveOffline
                | ValidatorStatus::ExitingOffline
                | ValidatorStatus::SlashingOnline
                | ValidatorStatus::SlashingOffline
                | ValidatorStatus::Slashed
        )
    }

}

impl std::fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// VALIDATOR RECORD
// ════════════════════════════════════════════════════════════════════════════

/// How a validator entered the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Operator-supplied key, watched only.
    Monitoring,
    /// Provisioned and run by the fleet; removal goes through cancellation.
    Managed,
}

pub use stakewatch_common::report::EffectivenessScale;

/// Rolling performance figures reported by agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Performance {
    pub effectiveness: Option<f64>,
    /// Unit the sender declared for `effectiveness`. Absent on legacy
    /// senders; the dashboard then falls back to a magnitude heuristic.
    pub effectiveness_scale: Option<EffectivenessScale>,
    pub missed_proposals: u32,
}

/// One tracked validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub id: String,
    /// Chain public key, hex with 0x prefix. Unique across the registry
    /// when present; validators created ahead of deposit may lack one.
    pub public_key: Option<String>,
    pub index: Option<u64>,
    pub network: Network,
    pub service_type: ServiceType,
    pub name: String,
    /// Owning user id. Report-created validators have no owner until an
    /// operator claims them.
    pub owner: Option<String>,
    /// Node server this validator runs on, when known.
    pub server_id: Option<String>,
    /// Provisioning order that created this validator, managed only.
    pub order_id: Option<String>,
    pub status: ValidatorStatus,
    pub balance: f64,
    pub effective_balance: f64,
    pub rewards: f64,
    pub performance: Performance,
    pub activation_epoch: Option<u64>,
    pub exit_epoch: Option<u64>,
    pub slashed: bool,

    // Alert bookkeeping. `alert_count` counts consecutive unhealthy
    // observations and resets on recovery; `total_alert_count` never resets.
    pub last_alert_sent: Option<u64>,
    pub alert_count: u32,
    pub total_alert_count: u64,
    /// Status at the previous observation, for transition detection.
    pub last_known_status: Option<ValidatorStatus>,
    pub needs_attention: bool,

    pub cancel_requested: bool,
    pub cancel_reason: Option<String>,
    pub cancel_requested_at: Option<u64>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl Validator {
    pub fn new(
        name: impl Into<String>,
        network: Network,
        service_type: ServiceType,
        now_ms: u64,
    ) -> Validator {
        Validator {
            id: Uuid::new_v4().to_string(),
            public_key: None,
            index: None,
            network,
            service_type,
            name: name.into(),
            owner: None,
            server_id: None,
            order_id: None,
            status: ValidatorStatus::Unknown,
            balance: 0.0,
            effective_balance: 0.0,
            rewards: 0.0,
            performance: Performance::default(),
            activation_epoch: None,
            exit_epoch: None,
            slashed: false,
            last_alert_sent: None,
            alert_count: 0,
            total_alert_count: 0,
            last_known_status: None,
            needs_attention: false,
            cancel_requested: false,
            cancel_reason: None,
            cancel_requested_at: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NODE SERVERS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    Execution,
    Consensus,
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Online,
    Offline,
    Syncing,
    Maintenance,
    Updating,
}

/// Point-in-time host resource usage, percentages 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceSnapshot {
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

/// A host machine running validator clients, reported on by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeServer {
    pub id: String,
    /// Unique across the fleet; capability tokens grant access by name.
    pub name: String,
    pub address: Option<String>,
    pub ssh_user: Option<String>,
    pub role: ServerRole,
    pub status: ServerStatus,
    pub execution_version: Option<String>,
    pub consensus_version: Option<String>,
    pub resources: ResourceSnapshot,
    pub last_heartbeat: Option<u64>,
    pub reachable: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl NodeServer {
    pub fn new(name: impl Into<String>, role: ServerRole, now_ms: u64) -> NodeServer {
        NodeServer {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            address: None,
            ssh_user: None,
            role,
            status: ServerStatus::Offline,
            execution_version: None,
            consensus_version: None,
            resources: ResourceSnapshot::default(),
            last_heartbeat: None,
            reachable: false,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    RefreshData,
    UpdateSoftware,
    CheckVersion,
    FetchMetrics,
    ProvisionValidator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CommandStatus {
    /// Legal transitions: pending -> running -> completed | failed.
    /// Completed and failed are terminal.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Pending, CommandStatus::Running)
                | (CommandStatus::Running, CommandStatus::Completed)
                | (CommandStatus::Running, CommandStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

/// A unit of work queued for one agent to pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub command_type: CommandType,
    /// Node server id whose agent should execute this.
    pub target_node: String,
    /// Server name hint, echoed to the agent alongside connection details.
    pub target_server: Option<String>,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub logs: Vec<String>,
    /// User or subsystem that queued the command.
    pub created_by: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Command {
    pub fn new(
        command_type: CommandType,
        target_node: impl Into<String>,
        created_by: impl Into<String>,
        now_ms: u64,
    ) -> Command {
        Command {
            id: Uuid::new_v4().to_string(),
            command_type,
            target_node: target_node.into(),
            target_server: None,
            payload: serde_json::Value::Null,
            status: CommandStatus::Pending,
            logs: Vec::new(),
            created_by: created_by.into(),
            created_at: now_ms,
            updated_at: now_ms,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Command {
        self.payload = payload;
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROVISIONING ORDERS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Paid,
    Provisioned,
    Cancelled,
}

/// One sealed keystore file attached to an order.
///
/// `ciphertext` is an encoded [`stakewatch_common::crypto::SealedBlob`];
/// the plaintext JSON never touches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoreEntry {
    pub filename: String,
    pub ciphertext: String,
    pub public_key: Option<String>,
    pub index: Option<u64>,
}

/// A request to provision managed validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOrder {
    pub id: String,
    pub user_id: String,
    pub network: Network,
    pub quantity: u32,
    pub status: OrderStatus,
    pub keystores: Vec<KeystoreEntry>,
    /// Sealed unlock password shared by the order's keystores.
    pub keystore_password: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl NodeOrder {
    pub fn new(user_id: impl Into<String>, network: Network, quantity: u32, now_ms: u64) -> NodeOrder {
        NodeOrder {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            network,
            quantity,
            status: OrderStatus::Submitted,
            keystores: Vec::new(),
            keystore_password: None,
            cancel_reason: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_known_and_unknown() {
        assert_eq!(
            ValidatorStatus::parse("active_online"),
            ValidatorStatus::ActiveOnline
        );
        assert_eq!(ValidatorStatus::parse("slashed"), ValidatorStatus::Slashed);
        assert_eq!(
            ValidatorStatus::parse("some_future_status"),
            ValidatorStatus::Unknown
        );
    }

    #[test]
    fn test_status_parse_display_roundtrip() {
        for s in [
            ValidatorStatus::Pending,
            ValidatorStatus::ActiveOngoing,
            ValidatorStatus::ExitingOffline,
            ValidatorStatus::WithdrawalDone,
            ValidatorStatus::Slashed,
        ] {
            assert_eq!(ValidatorStatus::parse(s.as_str()), s);
        }
    }

    #[test]
    fn test_healthy_and_alertable_are_disjoint() {
        for s in [
            ValidatorStatus::Pending,
            ValidatorStatus::PendingQueued,
            ValidatorStatus::ActiveOngoing,
            ValidatorStatus::ActiveOnline,
            ValidatorStatus::ActiveOffline,
            ValidatorStatus::ActiveExiting,
            ValidatorStatus::ExitingOnline,
            ValidatorStatus::ExitingOffline,
            ValidatorStatus::Exited,
            ValidatorStatus::ExitedUnslashed,
            ValidatorStatus::WithdrawalPossible,
            ValidatorStatus::WithdrawalDone,
            ValidatorStatus::SlashingOnline,
            ValidatorStatus::SlashingOffline,
            ValidatorStatus::Slashed,
            ValidatorStatus::Unknown,
        ] {
            assert!(!(s.is_healthy() && s.is_alertable()), "{} both", s);
        }
    }

    #[test]
    fn test_command_transitions() {
        assert!(CommandStatus::Pending.can_transition_to(CommandStatus::Running));
        assert!(CommandStatus::Running.can_transition_to(CommandStatus::Completed));
        assert!(CommandStatus::Running.can_transition_to(CommandStatus::Failed));
        assert!(!CommandStatus::Pending.can_transition_to(CommandStatus::Completed));
        assert!(!CommandStatus::Completed.can_transition_to(CommandStatus::Running));
        assert!(!CommandStatus::Failed.can_transition_to(CommandStatus::Pending));
        assert!(CommandStatus::Completed.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
    }

    #[test]
    fn test_validator_new_defaults() {
        let v = Validator::new("v-1", Network::Mainnet, ServiceType::Monitoring, 1_000);
        assert_eq!(v.status, ValidatorStatus::Unknown);
        assert_eq!(v.alert_count, 0);
        assert!(v.owner.is_none());
        assert_eq!(v.created_at, v.updated_at);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let s = serde_json::to_string(&ValidatorStatus::ActiveOffline).expect("ser");
        assert_eq!(s, "\"active_offline\"");
        let t = serde_json::to_string(&CommandType::RefreshData).expect("ser");
        assert_eq!(t, "\"REFRESH_DATA\"");
    }
}
