//! Agent report wire format.
//!
//! Shared between the fleet server (which ingests reports) and the host
//! agent (which produces them). All keys are camelCase on the wire; the
//! report discriminator travels as `type`. Every field beyond the kind
//! is optional: an absent field means "no new information", never
//! "clear the stored value".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReportKind {
    #[serde(rename = "FULL")]
    #[default]
    Full,
    #[serde(rename = "STATUS")]
    Status,
    #[serde(rename = "ALERT")]
    Alert,
}

/// Declared unit for reported effectiveness values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectivenessScale {
    /// 0.0 ..= 1.0
    Fraction,
    /// 0.0 ..= 100.0
    Percent,
    /// 0 ..= 10_000
    BasisPoints,
}

/// Host resource usage as the agent measured it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

/// Liveness of the validator client services on the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub execution_running: Option<bool>,
    pub consensus_running: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareVersions {
    pub execution: Option<String>,
    pub consensus: Option<String>,
}

/// One validator as seen by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedValidator {
    pub pubkey: Option<String>,
    pub validator_index: Option<u64>,
    pub status: Option<String>,
    pub balance: Option<f64>,
    pub effective_balance: Option<f64>,
    pub rewards: Option<f64>,
    pub effectiveness: Option<f64>,
    pub effectiveness_scale: Option<EffectivenessScale>,
    pub missed_proposals: Option<u32>,
    pub activation_epoch: Option<u64>,
    pub exit_epoch: Option<u64>,
    pub slashed: Option<bool>,
}

/// The report body agents POST once per cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    #[serde(rename = "type", default)]
    pub kind: ReportKind,
    #[serde(default)]
    pub system: Option<SystemMetrics>,
    // wire name kept from the container-era agents
    #[serde(rename = "docker", default)]
    pub services: Option<ServiceStatus>,
    #[serde(default)]
    pub versions: Option<SoftwareVersions>,
    #[serde(default)]
    pub validators: Option<Vec<ReportedValidator>>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// What the agent hears back, always at HTTP 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub success: bool,
    pub validators_updated: usize,
    pub alerts_dispatched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestSummary {
    pub fn failure(message: impl Into<String>) -> IngestSummary {
        IngestSummary {
            success: false,
            validators_updated: 0,
            alerts_dispatched: 0,
            message: Some(message.into()),
        }
    }
}
