//! Agent report ingestion.
//!
//! Agents push one JSON report per cycle. A report is processed in a
//! fixed order regardless of kind: heartbeat, resource snapshot, service
//! status, software versions, validator batch, and only then (for ALERT
//! reports) the alert engine. Fields absent from a report never clear
//! stored data.
//!
//! Ingestion never surfaces an error to the agent. Whatever goes wrong
//! is logged server-side and summarized as `success: false`; the agent
//! keeps its cycle and retries next interval.

use tracing::{debug, info, warn};

use stakewatch_common::network::Network;

use crate::alerts::{AlertEngine, AlertOutcome};
use crate::model::{ServerStatus, ServiceType, ValidatorStatus};
use crate::registry::{CreateSpec, ValidatorRegistry};
use crate::store::FleetStore;

pub use stakewatch_common::report::{
    AgentReport, IngestSummary, ReportKind, ReportedValidator, ServiceStatus, SoftwareVersions,
    SystemMetrics,
};

// ════════════════════════════════════════════════════════════════════════════
// INGESTOR
// ════════════════════════════════════════════════════════════════════════════

pub struct ReportIngestor {
    store: FleetStore,
    registry: ValidatorRegistry,
    alerts: AlertEngine,
    default_network: Network,
}

impl ReportIngestor {
    pub fn new(
        store: FleetStore,
        registry: ValidatorRegistry,
        alerts: AlertEngine,
        default_network: Network,
    ) -> ReportIngestor {
        ReportIngestor {
            store,
            registry,
            alerts,
            default_network,
        }
    }

    /// Apply one report from the agent on `node_id`.
    pub async fn ingest(&self, node_id: &str, report: AgentReport, now_ms: u64) -> IngestSummary {
        if self.store.get_server(node_id).is_none() {
            warn!(node_id, "report for unknown node server");
            return IngestSummary::failure("unknown node server");
        }

        // heartbeat first: even a malformed payload proves the agent is up
        self.store.update_server(node_id, |s| {
            s.last_heartbeat = Some(now_ms);
            s.reachable = true;
            s.updated_at = now_ms;
        });

        if let Some(system) = &report.system {
            // wholesale replace; a partial snapshot is still the newest truth
            self.store.update_server(node_id, |s| {
                s.resources = crate::model::ResourceSnapshot {
                    cpu_percent: system.cpu_percent,
                    ram_percent: system.ram_percent,
                    disk_percent: system.disk_percent,
                };
            });
        }

        if let Some(services) = &report.services {
            let any_down = services.execution_running == Some(false)
                || services.consensus_running == Some(false);
            let any_reported =
                services.execution_running.is_some() || services.consensus_running.is_some();
            if any_reported {
                self.store.update_server(node_id, |s| {
                    s.status = if any_down {
                        ServerStatus::Offline
                    } else {
                        ServerStatus::Online
                    };
                });
            }
        }

        if let Some(versions) = &report.versions {
            self.store.update_server(node_id, |s| {
                if let Some(v) = &versions.execution {
                    s.execution_version = Some(v.clone());
                }
                if let Some(v) = &versions.consensus {
                    s.consensus_version = Some(v.clone());
                }
            });
        }

        let mut processed = 0usize;
        let mut alert_pubkeys: Vec<String> = Vec::new();
        if let Some(validators) = &report.validators {
            for reported in validators {
                match self.reconcile_validator(node_id, reported, now_ms).await {
                    Some(pubkey) => {
                        processed += 1;
                        alert_pubkeys.push(pubkey);
                    }
                    None => {
                        debug!(node_id, ?reported, "skipped unidentifiable validator entry");
                    }
                }
            }
        }

        let mut alerts_dispatched = 0usize;
        if report.kind == ReportKind::Alert && !alert_pubkeys.is_empty() {
            let outcomes = self.alerts.process_batch(&alert_pubkeys, now_ms).await;
            alerts_dispatched = outcomes
                .iter()
                .filter(|o| matches!(o, AlertOutcome::Sent | AlertOutcome::Escalated))
                .count();
        }

        info!(
            node_id,
            kind = ?report.kind,
            processed,
            alerts_dispatched,
            "report ingested"
        );
        IngestSummary {
            success: true,
            validators_updated: processed,
            alerts_dispatched,
            message: None,
        }
    }

    /// Reconcile one reported validator into the registry. Returns the
    /// pubkey it resolved to, or `None` when the entry names nothing we
    /// can identify.
    async fn reconcile_validator(
        &self,
        node_id: &str,
        reported: &ReportedValidator,
        now_ms: u64,
    ) -> Option<String> {
        let existing = match (&reported.pubkey, reported.validator_index) {
            (Some(pubkey), _) => self.store.find_validator_by_pubkey(pubkey),
            (None, Some(index)) => self
                .store
                .validators_where(|v| v.index == Some(index))
                .into_iter()
                .next(),
            (None, None) => return None,
        };

        let pubkey = match (&reported.pubkey, &existing) {
            (Some(p), _) => p.clone(),
            (None, Some(v)) => v.public_key.clone()?,
            (None, None) => return None,
        };

        // recovery detection against the stored record, before the upsert
        let recovering = existing
            .as_ref()
            .map(|v| {
                v.alert_count > 0
                    && reported
                        .status
                        .as_deref()
                        .map(|s| ValidatorStatus::parse(s).is_healthy())
                        .unwrap_or(false)
            })
            .unwrap_or(false);

        let create = CreateSpec {
            name: format!(
                "validator-{}",
                reported
                    .validator_index
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| pubkey.chars().take(10).collect())
            ),
            network: self.default_network,
            service_type: ServiceType::Monitoring,
            owner: None,
            server_id: Some(node_id.to_string()),
        };
        let updated = self
            .registry
            .upsert_by_pubkey(&pubkey, create, now_ms, |v| {
                if let Some(index) = reported.validator_index {
                    v.index = Some(index);
                }
                if let Some(status) = &reported.status {
                    v.last_known_status = Some(v.status);
                    v.status = ValidatorStatus::parse(status);
                }
                if let Some(balance) = reported.balance {
                    v.balance = balance;
                }
                if let Some(eb) = reported.effective_balance {
                    v.effective_balance = eb;
                }
                if let Some(rewards) = reported.rewards {
                    v.rewards = rewards;
                }
                if let Some(eff) = reported.effectiveness {
                    v.performance.effectiveness = Some(eff);
                    v.performance.effectiveness_scale = reported.effectiveness_scale;
                }
                if let Some(missed) = reported.missed_proposals {
                    v.performance.missed_proposals = missed;
                }
                if let Some(epoch) = reported.activation_epoch {
                    v.activation_epoch = Some(epoch);
                }
                if let Some(epoch) = reported.exit_epoch {
                    v.exit_epoch = Some(epoch);
                }
                if let Some(slashed) = reported.slashed {
                    v.slashed = slashed;
                }
                if recovering {
                    v.alert_count = 0;
                    v.needs_attention = false;
                }
            });

        if recovering {
            info!(pubkey = %pubkey, id = %updated.id, "validator recovered, counters reset");
            self.alerts.notify_recovery(&updated).await;
        }
        Some(pubkey)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{NodeServer, ServerRole, Validator};
    use crate::notify::MockNotifier;

    fn setup() -> (FleetStore, Arc<MockNotifier>, ReportIngestor, String) {
        let store = FleetStore::new();
        let mock = Arc::new(MockNotifier::new());
        let registry = ValidatorRegistry::new(store.clone());
        let alerts = AlertEngine::new(store.clone(), mock.clone());
        let server = NodeServer::new("node-1", ServerRole::Combined, 1);
        let node_id = server.id.clone();
        store.insert_server(server);
        let ingestor = ReportIngestor::new(store.clone(), registry, alerts, Network::Mainnet);
        (store, mock, ingestor, node_id)
    }

    fn full_report(validators: Vec<ReportedValidator>) -> AgentReport {
        AgentReport {
            kind: ReportKind::Full,
            system: Some(SystemMetrics {
                cpu_percent: Some(21.5),
                ram_percent: Some(63.0),
                disk_percent: Some(48.2),
            }),
            services: Some(ServiceStatus {
                execution_running: Some(true),
                consensus_running: Some(true),
            }),
            versions: Some(SoftwareVersions {
                execution: Some("geth/1.14.0".to_string()),
                consensus: Some("lighthouse/5.1.3".to_string()),
            }),
            validators: Some(validators),
            timestamp: None,
        }
    }

    fn reported(pubkey: &str, status: &str) -> ReportedValidator {
        ReportedValidator {
            pubkey: Some(pubkey.to_string()),
            status: Some(status.to_string()),
            balance: Some(32.1),
            ..ReportedValidator::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_node_is_soft_failure() {
        let (_, _, ingestor, _) = setup();
        let summary = ingestor.ingest("missing", AgentReport::default(), 1).await;
        assert!(!summary.success);
        assert!(summary.message.is_some());
    }

    #[tokio::test]
    async fn test_full_report_updates_server_and_creates_validators() {
        let (store, _, ingestor, node_id) = setup();
        let summary = ingestor
            .ingest(
                &node_id,
                full_report(vec![
                    reported("0xaa", "active_online"),
                    reported("0xbb", "active_offline"),
                ]),
                9_000,
            )
            .await;
        assert!(summary.success);
        assert_eq!(summary.validators_updated, 2);
        // FULL reports never dispatch alerts
        assert_eq!(summary.alerts_dispatched, 0);

        let server = store.get_server(&node_id).unwrap();
        assert_eq!(server.last_heartbeat, Some(9_000));
        assert!(server.reachable);
        assert_eq!(server.status, ServerStatus::Online);
        assert_eq!(server.resources.cpu_percent, Some(21.5));
        assert_eq!(server.execution_version.as_deref(), Some("geth/1.14.0"));

        let v = store.find_validator_by_pubkey("0xaa").unwrap();
        assert_eq!(v.status, ValidatorStatus::ActiveOnline);
        assert_eq!(v.server_id.as_deref(), Some(node_id.as_str()));
        assert!(v.owner.is_none());
    }

    #[tokio::test]
    async fn test_absent_fields_clear_nothing() {
        let (store, _, ingestor, node_id) = setup();
        ingestor
            .ingest(&node_id, full_report(vec![reported("0xaa", "active_online")]), 1_000)
            .await;

        // second FULL report with no validators and no versions
        let followup = AgentReport {
            kind: ReportKind::Full,
            system: Some(SystemMetrics {
                cpu_percent: Some(90.0),
                ram_percent: None,
                disk_percent: None,
            }),
            ..AgentReport::default()
        };
        let summary = ingestor.ingest(&node_id, followup, 2_000).await;
        assert!(summary.success);
        assert_eq!(summary.validators_updated, 0);

        // validator batch untouched
        let v = store.find_validator_by_pubkey("0xaa").unwrap();
        assert_eq!(v.status, ValidatorStatus::ActiveOnline);
        assert!((v.balance - 32.1).abs() < 1e-9);
        assert_eq!(v.updated_at, 1_000);

        // versions survive, snapshot replaced wholesale
        let server = store.get_server(&node_id).unwrap();
        assert_eq!(server.execution_version.as_deref(), Some("geth/1.14.0"));
        assert_eq!(server.resources.cpu_percent, Some(90.0));
        assert_eq!(server.resources.ram_percent, None);
        assert_eq!(server.last_heartbeat, Some(2_000));
    }

    #[tokio::test]
    async fn test_service_down_marks_server_offline() {
        let (store, _, ingestor, node_id) = setup();
        let report = AgentReport {
            kind: ReportKind::Status,
            services: Some(ServiceStatus {
                execution_running: Some(true),
                consensus_running: Some(false),
            }),
            ..AgentReport::default()
        };
        ingestor.ingest(&node_id, report, 1_000).await;
        assert_eq!(store.get_server(&node_id).unwrap().status, ServerStatus::Offline);
    }

    #[tokio::test]
    async fn test_alert_report_runs_alert_engine() {
        let (store, mock, ingestor, node_id) = setup();
        // pre-register an owned validator so the alert resolves
        let mut v = Validator::new("val-a", Network::Mainnet, ServiceType::Monitoring, 1);
        v.public_key = Some("0xaa".to_string());
        v.owner = Some("alice".to_string());
        store.insert_validator(v);
        store.set_chat_id("alice", 42);

        let report = AgentReport {
            kind: ReportKind::Alert,
            validators: Some(vec![reported("0xaa", "active_offline")]),
            ..AgentReport::default()
        };
        let summary = ingestor.ingest(&node_id, report, 5_000).await;
        assert!(summary.success);
        assert_eq!(summary.alerts_dispatched, 1);
        assert_eq!(mock.sent_count(), 1);

        let v = store.find_validator_by_pubkey("0xaa").unwrap();
        assert_eq!(v.alert_count, 1);
        assert_eq!(v.last_alert_sent, Some(5_000));
    }

    #[tokio::test]
    async fn test_recovery_resets_counter_and_notifies_even_in_cooldown() {
        let (store, mock, ingestor, node_id) = setup();
        let mut v = Validator::new("val-a", Network::Mainnet, ServiceType::Monitoring, 1);
        v.public_key = Some("0xaa".to_string());
        v.owner = Some("alice".to_string());
        v.status = ValidatorStatus::ActiveOffline;
        v.alert_count = 3;
        v.total_alert_count = 9;
        v.last_alert_sent = Some(4_000); // recent send, cooldown active
        store.insert_validator(v);
        store.set_chat_id("alice", 42);

        let report = AgentReport {
            kind: ReportKind::Status,
            validators: Some(vec![reported("0xaa", "active_online")]),
            ..AgentReport::default()
        };
        ingestor.ingest(&node_id, report, 5_000).await;

        let v = store.find_validator_by_pubkey("0xaa").unwrap();
        assert_eq!(v.alert_count, 0);
        assert!(!v.needs_attention);
        // lifetime counter is never reset
        assert_eq!(v.total_alert_count, 9);
        assert_eq!(v.status, ValidatorStatus::ActiveOnline);
        assert_eq!(v.last_known_status, Some(ValidatorStatus::ActiveOffline));

        assert_eq!(mock.sent_count(), 1);
        assert!(mock.sent()[0].1.contains("back online"));
    }

    #[tokio::test]
    async fn test_match_by_index_when_pubkey_absent() {
        let (store, _, ingestor, node_id) = setup();
        let mut v = Validator::new("val-a", Network::Mainnet, ServiceType::Monitoring, 1);
        v.public_key = Some("0xaa".to_string());
        v.index = Some(77);
        store.insert_validator(v);

        let report = AgentReport {
            kind: ReportKind::Status,
            validators: Some(vec![ReportedValidator {
                validator_index: Some(77),
                balance: Some(31.5),
                ..ReportedValidator::default()
            }]),
            ..AgentReport::default()
        };
        let summary = ingestor.ingest(&node_id, report, 2_000).await;
        assert_eq!(summary.validators_updated, 1);
        let v = store.find_validator_by_pubkey("0xaa").unwrap();
        assert!((v.balance - 31.5).abs() < 1e-9);
        assert_eq!(store.validator_count(), 1);
    }

    #[tokio::test]
    async fn test_unidentifiable_entry_is_skipped_not_fatal() {
        let (_, _, ingestor, node_id) = setup();
        let report = AgentReport {
            kind: ReportKind::Full,
            validators: Some(vec![
                ReportedValidator::default(),
                reported("0xaa", "active_online"),
            ]),
            ..AgentReport::default()
        };
        let summary = ingestor.ingest(&node_id, report, 1_000).await;
        assert!(summary.success);
        assert_eq!(summary.validators_updated, 1);
    }
}
