//! Queued command execution.
//!
//! The agent pulls pending commands, acknowledges each by moving it to
//! `running`, does the work, and closes it as `completed` or `failed`.
//! One bad command never aborts the batch.

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use stakewatch_common::report::{AgentReport, ReportKind};

use crate::client::{FleetClient, PendingCommand};
use crate::collect;

/// Process names the agent probes for liveness and versions.
#[derive(Debug, Clone, Default)]
pub struct ProbeTargets {
    pub execution: Option<String>,
    pub consensus: Option<String>,
}

impl ProbeTargets {
    pub fn execution(&self) -> Option<&str> {
        self.execution.as_deref()
    }

    pub fn consensus(&self) -> Option<&str> {
        self.consensus.as_deref()
    }
}

/// Execute every pending command, reporting each outcome back. Returns
/// how many commands were executed (in either direction).
pub async fn execute_all(
    client: &FleetClient,
    probes: &ProbeTargets,
    commands: Vec<PendingCommand>,
) -> usize {
    let mut executed = 0;
    for command in commands {
        if let Err(e) = client.update_command(&command.id, "running", None).await {
            warn!(id = %command.id, error = %e, "could not acknowledge command");
            continue;
        }
        match execute_one(client, probes, &command).await {
            Ok(log) => {
                info!(id = %command.id, kind = %command.command_type, "command completed");
                if let Err(e) = client.update_command(&command.id, "completed", Some(log)).await {
                    warn!(id = %command.id, error = %e, "could not report completion");
                }
            }
            Err(e) => {
                warn!(id = %command.id, kind = %command.command_type, error = %e, "command failed");
                let log = e.to_string();
                if let Err(e) = client.update_command(&command.id, "failed", Some(log)).await {
                    warn!(id = %command.id, error = %e, "could not report failure");
                }
            }
        }
        executed += 1;
    }
    executed
}

async fn execute_one(
    client: &FleetClient,
    probes: &ProbeTargets,
    command: &PendingCommand,
) -> Result<String> {
    match command.command_type.as_str() {
        "REFRESH_DATA" => {
            let report = status_report(probes);
            let summary = client.push_report(&report).await?;
            Ok(format!(
                "refreshed: {} validators updated",
                summary.validators_updated
            ))
        }
        "CHECK_VERSION" => {
            let versions = collect::software_versions(probes.execution(), probes.consensus());
            if versions.execution.is_none() && versions.consensus.is_none() {
                client.put_versions(&versions).await?;
                Ok("no version information available on this host".to_string())
            } else {
                client.put_versions(&versions).await?;
                Ok(format!(
                    "versions reported: execution={:?} consensus={:?}",
                    versions.execution, versions.consensus
                ))
            }
        }
        "FETCH_METRICS" => {
            let metrics = collect::system_metrics();
            client.put_metrics(&metrics).await?;
            Ok("metrics reported".to_string())
        }
        // these need operator-driven tooling on the host; acknowledge so
        // the queue does not wedge on them
        "UPDATE_SOFTWARE" | "PROVISION_VALIDATOR" => {
            Ok("acknowledged; requires operator action on this host".to_string())
        }
        other => Err(anyhow!("unsupported command type {}", other)),
    }
}

/// A STATUS report carrying freshly collected host state.
pub fn status_report(probes: &ProbeTargets) -> AgentReport {
    AgentReport {
        kind: ReportKind::Status,
        system: Some(collect::system_metrics()),
        services: Some(collect::service_status(probes.execution(), probes.consensus())),
        versions: Some(collect::software_versions(probes.execution(), probes.consensus())),
        validators: None,
        timestamp: None,
    }
}
