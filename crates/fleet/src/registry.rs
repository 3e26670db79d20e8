//! Validator registry.
//!
//! The registry owns validator lifecycle bookkeeping on top of
//! [`FleetStore`]: idempotent upserts keyed by public key, owner-scoped
//! queries, removal and cancellation rules, and the dashboard aggregates.
//! Status values are mirrored from the chain as-is. The chain is the
//! authority on lifecycle; the registry records, it does not referee.

use thiserror::Error;
use tracing::{info, warn};

use stakewatch_common::explorer::{ChainExplorer, ExplorerError};
use stakewatch_common::network::Network;

use crate::model::{EffectivenessScale, ServiceType, Validator, ValidatorStatus};
use crate::store::FleetStore;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validator not found")]
    NotFound,
    #[error("not permitted: {0}")]
    PermissionDenied(String),
    #[error("operation requires a {expected:?} validator")]
    WrongServiceType { expected: ServiceType },
    #[error("chain lookup failed: {0}")]
    Explorer(#[from] ExplorerError),
}

// ════════════════════════════════════════════════════════════════════════════
// SERVER ASSIGNMENT
// ════════════════════════════════════════════════════════════════════════════

/// How newly added validators are pinned to a node server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentStrategy {
    /// Leave the validator unassigned; a later provisioning step picks.
    None,
    /// Server currently tracking the fewest validators. Ties break on
    /// server name so repeated runs place identically.
    #[default]
    LeastLoaded,
}

impl AssignmentStrategy {
    /// Pick a server id for a new validator, or `None` when the strategy
    /// (or an empty fleet) declines to assign.
    pub fn pick(&self, store: &FleetStore) -> Option<String> {
        match self {
            AssignmentStrategy::None => None,
            AssignmentStrategy::LeastLoaded => {
                let mut servers = store.all_servers();
                if servers.is_empty() {
                    return None;
                }
                servers.sort_by(|a, b| a.name.cmp(&b.name));
                servers
                    .into_iter()
                    .min_by_key(|s| {
                        store
                            .validators_where(|v| v.server_id.as_deref() == Some(s.id.as_str()))
                            .len()
                    })
                    .map(|s| s.id)
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// EFFECTIVENESS NORMALIZATION
// ════════════════════════════════════════════════════════════════════════════

/// Bring a reported effectiveness value onto the 0.0..=1.0 scale.
///
/// A declared scale is honored directly. Without one, magnitude decides:
/// values above 100 are read as basis points, values above 1 as percent.
/// Results outside 0..=1 after conversion are clamped and logged.
pub fn normalize_effectiveness(value: f64, scale: Option<EffectivenessScale>) -> f64 {
    let normalized = match scale {
        Some(EffectivenessScale::Fraction) => value,
        Some(EffectivenessScale::Percent) => value / 100.0,
        Some(EffectivenessScale::BasisPoints) => value / 10_000.0,
        None => {
            if value > 100.0 {
                value / 10_000.0
            } else if value > 1.0 {
                value / 100.0
            } else {
                value
            }
        }
    };
    if !(0.0..=1.0).contains(&normalized) {
        warn!(value, ?scale, normalized, "effectiveness out of range, clamping");
        return normalized.clamp(0.0, 1.0);
    }
    normalized
}

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ════════════════════════════════════════════════════════════════════════════

/// Defaults applied when an upsert has to create the record.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub network: Network,
    pub service_type: ServiceType,
    pub owner: Option<String>,
    pub server_id: Option<String>,
}

impl CreateSpec {
    pub fn monitoring(name: impl Into<String>, network: Network) -> CreateSpec {
        CreateSpec {
            name: name.into(),
            network,
            service_type: ServiceType::Monitoring,
            owner: None,
            server_id: None,
        }
    }
}

/// Aggregates for the operator dashboard, computed on read.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DashboardSummary {
    pub total_validators: usize,
    pub healthy: usize,
    pub needs_attention: usize,
    pub total_staked: f64,
    pub total_rewards: f64,
    /// Mean normalized effectiveness across validators that reported one.
    pub average_effectiveness: Option<f64>,
}

#[derive(Clone)]
pub struct ValidatorRegistry {
    store: FleetStore,
}

impl ValidatorRegistry {
    pub fn new(store: FleetStore) -> ValidatorRegistry {
        ValidatorRegistry { store }
    }

    /// Create-or-update keyed by public key.
    ///
    /// At most one validator per pubkey ever exists: if one is already
    /// registered, `apply` mutates it in place and `create` is ignored.
    /// Otherwise a record is built from `create`, then `apply` runs on it.
    /// Lookup and insert happen under one write lock.
    pub fn upsert_by_pubkey<F>(
        &self,
        pubkey: &str,
        create: CreateSpec,
        now_ms: u64,
        apply: F,
    ) -> Validator
    where
        F: FnOnce(&mut Validator),
    {
        self.store.with_validators_mut(|validators| {
            let existing_id = validators
                .values()
                .find(|v| v.public_key.as_deref() == Some(pubkey))
                .map(|v| v.id.clone());
            match existing_id {
                Some(id) => {
                    let v = validators.get_mut(&id).expect("id just looked up");
                    apply(v);
                    v.updated_at = now_ms;
                    v.clone()
                }
                None => {
                    let mut v =
                        Validator::new(create.name, create.network, create.service_type, now_ms);
                    v.public_key = Some(pubkey.to_string());
                    v.owner = create.owner;
                    v.server_id = create.server_id;
                    apply(&mut v);
                    v.updated_at = now_ms;
                    info!(pubkey, id = %v.id, "registered validator");
                    validators.insert(v.id.clone(), v.clone());
                    v
                }
            }
        })
    }

    /// Add a monitoring validator after confirming it on chain.
    ///
    /// `ident` is a pubkey (0x-prefixed) or a numeric index. The chain
    /// observation seeds status and balances; the assignment strategy
    /// picks a server.
    pub async fn add_from_chain(
        &self,
        owner: &str,
        ident: &str,
        explorer: &dyn ChainExplorer,
        strategy: AssignmentStrategy,
        now_ms: u64,
    ) -> Result<Validator, RegistryError> {
        let obs = if let Ok(index) = ident.parse::<u64>() {
            explorer.lookup_by_index(index).await?
        } else {
            explorer.lookup_by_pubkey(ident).await?
        };

        let server_id = strategy.pick(&self.store);
        let name = format!(
            "validator-{}",
            obs.index
                .map(|i| i.to_string())
                .unwrap_or_else(|| short_key(&obs.public_key))
        );
        let create = CreateSpec {
            name,
            network: explorer.network(),
            service_type: ServiceType::Monitoring,
            owner: Some(owner.to_string()),
            server_id,
        };
        let pubkey = obs.public_key.clone();
        Ok(self.upsert_by_pubkey(&pubkey, create, now_ms, |v| {
            if v.owner.is_none() {
                v.owner = Some(owner.to_string());
            }
            v.index = obs.index;
            v.status = ValidatorStatus::parse(&obs.status);
            v.balance = obs.balance;
            v.effective_balance = obs.effective_balance;
            v.activation_epoch = obs.activation_epoch;
            v.exit_epoch = obs.exit_epoch;
            v.slashed = obs.slashed;
        }))
    }

    pub fn find_by_owner(&self, owner: &str) -> Vec<Validator> {
        let mut found = self
            .store
            .validators_where(|v| v.owner.as_deref() == Some(owner));
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn find_by_server(&self, server_id: &str) -> Vec<Validator> {
        self.store
            .validators_where(|v| v.server_id.as_deref() == Some(server_id))
    }

    /// Delete a monitoring validator owned by `requester`.
    ///
    /// Managed validators are never deleted directly; they go through
    /// [`ValidatorRegistry::request_cancellation`].
    pub fn remove(&self, id: &str, requester: &str) -> Result<Validator, RegistryError> {
        let v = self.store.get_validator(id).ok_or(RegistryError::NotFound)?;
        if v.owner.as_deref() != Some(requester) {
            return Err(RegistryError::PermissionDenied(
                "validator belongs to another user".to_string(),
            ));
        }
        if v.service_type != ServiceType::Monitoring {
            return Err(RegistryError::WrongServiceType {
                expected: ServiceType::Monitoring,
            });
        }
        let removed = self
            .store
            .remove_validator(id)
            .ok_or(RegistryError::NotFound)?;
        info!(id, owner = requester, "removed monitoring validator");
        Ok(removed)
    }

    /// Flag a managed validator for operator-driven teardown.
    ///
    /// The exit itself happens on chain out of band, so the lifecycle
    /// status is left untouched here. The reason is copied onto the
    /// originating order when one is linked.
    pub fn request_cancellation(
        &self,
        id: &str,
        requester: &str,
        reason: &str,
        now_ms: u64,
    ) -> Result<Validator, RegistryError> {
        let v = self.store.get_validator(id).ok_or(RegistryError::NotFound)?;
        if v.owner.as_deref() != Some(requester) {
            return Err(RegistryError::PermissionDenied(
                "validator belongs to another user".to_string(),
            ));
        }
        if v.service_type != ServiceType::Managed {
            return Err(RegistryError::WrongServiceType {
                expected: ServiceType::Managed,
            });
        }
        let updated = self
            .store
            .update_validator(id, |v| {
                v.cancel_requested = true;
                v.cancel_reason = Some(reason.to_string());
                v.cancel_requested_at = Some(now_ms);
                v.updated_at = now_ms;
            })
            .ok_or(RegistryError::NotFound)?;
        if let Some(order_id) = updated.order_id.as_deref() {
            self.store.update_order(order_id, |o| {
                o.cancel_reason = Some(reason.to_string());
                o.updated_at = now_ms;
            });
        }
        info!(id, owner = requester, reason, "cancellation requested");
        Ok(updated)
    }

    /// Aggregate one user's validators for the dashboard.
    pub fn dashboard(&self, owner: &str) -> DashboardSummary {
        let validators = self.find_by_owner(owner);
        let total_validators = validators.len();
        let healthy = validators.iter().filter(|v| v.status.is_healthy()).count();
        let needs_attention = validators.iter().filter(|v| v.needs_attention).count();
        let total_staked = validators.iter().map(|v| v.balance).sum();
        let total_rewards = validators.iter().map(|v| v.rewards).sum();

        let reported: Vec<f64> = validators
            .iter()
            .filter_map(|v| {
                v.performance
                    .effectiveness
                    .map(|e| normalize_effectiveness(e, v.performance.effectiveness_scale))
            })
            .collect();
        let average_effectiveness = if reported.is_empty() {
            None
        } else {
            Some(reported.iter().sum::<f64>() / reported.len() as f64)
        };

        DashboardSummary {
            total_validators,
            healthy,
            needs_attention,
            total_staked,
            total_rewards,
            average_effectiveness,
        }
    }
}

fn short_key(pubkey: &str) -> String {
    pubkey.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeServer, Performance, ServerRole};
    use stakewatch_common::explorer::{ChainObservation, MockExplorer};

    fn registry() -> (ValidatorRegistry, FleetStore) {
        let store = FleetStore::new();
        (ValidatorRegistry::new(store.clone()), store)
    }

    fn seeded_validator(
        store: &FleetStore,
        pubkey: &str,
        owner: &str,
        service_type: ServiceType,
    ) -> String {
        let mut v = Validator::new("v", Network::Mainnet, service_type, 1);
        v.public_key = Some(pubkey.to_string());
        v.owner = Some(owner.to_string());
        let id = v.id.clone();
        store.insert_validator(v);
        id
    }

    #[test]
    fn test_upsert_is_idempotent_per_pubkey() {
        let (registry, store) = registry();
        let create = CreateSpec::monitoring("v-a", Network::Mainnet);

        let first = registry.upsert_by_pubkey("0xaa", create.clone(), 10, |v| {
            v.balance = 32.0;
        });
        let second = registry.upsert_by_pubkey("0xaa", create, 20, |v| {
            v.balance = 32.5;
        });

        assert_eq!(first.id, second.id);
        assert_eq!(store.validator_count(), 1);
        let stored = store.get_validator(&first.id).expect("exists");
        assert!((stored.balance - 32.5).abs() < 1e-9);
        assert_eq!(stored.updated_at, 20);
        assert_eq!(stored.created_at, 10);
    }

    #[test]
    fn test_upsert_distinct_pubkeys_create_distinct_records() {
        let (registry, store) = registry();
        registry.upsert_by_pubkey("0xaa", CreateSpec::monitoring("a", Network::Mainnet), 1, |_| {});
        registry.upsert_by_pubkey("0xbb", CreateSpec::monitoring("b", Network::Mainnet), 1, |_| {});
        assert_eq!(store.validator_count(), 2);
    }

    #[test]
    fn test_least_loaded_assignment_with_name_tiebreak() {
        let (registry, store) = registry();
        let beta = NodeServer::new("beta", ServerRole::Combined, 1);
        let alpha = NodeServer::new("alpha", ServerRole::Combined, 1);
        let beta_id = beta.id.clone();
        let alpha_id = alpha.id.clone();
        store.insert_server(beta);
        store.insert_server(alpha);

        // empty fleet: tie, alphabetical order wins
        assert_eq!(
            AssignmentStrategy::LeastLoaded.pick(&store),
            Some(alpha_id.clone())
        );

        // load alpha, beta becomes least loaded
        let mut v = Validator::new("v", Network::Mainnet, ServiceType::Monitoring, 1);
        v.server_id = Some(alpha_id);
        store.insert_validator(v);
        assert_eq!(AssignmentStrategy::LeastLoaded.pick(&store), Some(beta_id));

        assert_eq!(AssignmentStrategy::None.pick(&store), None);
        let _ = registry;
    }

    #[test]
    fn test_assignment_none_when_no_servers() {
        let (_, store) = registry();
        assert_eq!(AssignmentStrategy::LeastLoaded.pick(&store), None);
    }

    #[test]
    fn test_normalize_effectiveness_declared_scales() {
        assert!((normalize_effectiveness(0.97, Some(EffectivenessScale::Fraction)) - 0.97).abs() < 1e-9);
        assert!((normalize_effectiveness(97.0, Some(EffectivenessScale::Percent)) - 0.97).abs() < 1e-9);
        assert!(
            (normalize_effectiveness(9700.0, Some(EffectivenessScale::BasisPoints)) - 0.97).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_normalize_effectiveness_heuristic_and_clamp() {
        // heuristic: magnitude decides
        assert!((normalize_effectiveness(0.5, None) - 0.5).abs() < 1e-9);
        assert!((normalize_effectiveness(50.0, None) - 0.5).abs() < 1e-9);
        assert!((normalize_effectiveness(5000.0, None) - 0.5).abs() < 1e-9);
        // boundary values stay on the smaller scale
        assert!((normalize_effectiveness(1.0, None) - 1.0).abs() < 1e-9);
        assert!((normalize_effectiveness(100.0, None) - 1.0).abs() < 1e-9);
        // declared scale that still overflows is clamped
        assert!((normalize_effectiveness(250.0, Some(EffectivenessScale::Percent)) - 1.0).abs() < 1e-9);
        assert!((normalize_effectiveness(-5.0, Some(EffectivenessScale::Fraction))).abs() < 1e-9);
    }

    #[test]
    fn test_remove_is_owner_and_type_checked() {
        let (registry, store) = registry();
        let monitoring = seeded_validator(&store, "0xaa", "alice", ServiceType::Monitoring);
        let managed = seeded_validator(&store, "0xbb", "alice", ServiceType::Managed);

        assert!(matches!(
            registry.remove(&monitoring, "bob"),
            Err(RegistryError::PermissionDenied(_))
        ));
        assert!(matches!(
            registry.remove(&managed, "alice"),
            Err(RegistryError::WrongServiceType { .. })
        ));
        assert!(matches!(
            registry.remove("missing", "alice"),
            Err(RegistryError::NotFound)
        ));

        registry.remove(&monitoring, "alice").expect("removed");
        assert!(store.get_validator(&monitoring).is_none());
        // managed one untouched
        assert!(store.get_validator(&managed).is_some());
    }

    #[test]
    fn test_request_cancellation_sets_fields_and_propagates_reason() {
        let (registry, store) = registry();
        let order = crate::model::NodeOrder::new("alice", Network::Mainnet, 1, 1);
        let order_id = order.id.clone();
        store.insert_order(order);

        let id = seeded_validator(&store, "0xaa", "alice", ServiceType::Managed);
        store.update_validator(&id, |v| {
            v.order_id = Some(order_id.clone());
            v.status = ValidatorStatus::ActiveOnline;
        });

        let updated = registry
            .request_cancellation(&id, "alice", "migrating away", 500)
            .expect("cancelled");
        assert!(updated.cancel_requested);
        assert_eq!(updated.cancel_reason.as_deref(), Some("migrating away"));
        assert_eq!(updated.cancel_requested_at, Some(500));
        // status stays whatever the chain last said
        assert_eq!(updated.status, ValidatorStatus::ActiveOnline);

        let order = store.get_order(&order_id).expect("order");
        assert_eq!(order.cancel_reason.as_deref(), Some("migrating away"));

        // monitoring validators cannot be cancelled
        let mon = seeded_validator(&store, "0xbb", "alice", ServiceType::Monitoring);
        assert!(matches!(
            registry.request_cancellation(&mon, "alice", "r", 1),
            Err(RegistryError::WrongServiceType { .. })
        ));
    }

    #[test]
    fn test_dashboard_aggregates() {
        let (registry, store) = registry();
        for (pubkey, balance, rewards, eff, scale, status) in [
            ("0xaa", 32.1, 0.1, Some(0.98), Some(EffectivenessScale::Fraction), ValidatorStatus::ActiveOnline),
            ("0xbb", 31.9, 0.2, Some(96.0), None, ValidatorStatus::ActiveOffline),
            ("0xcc", 32.0, 0.0, None, None, ValidatorStatus::ActiveOnline),
        ] {
            let id = seeded_validator(&store, pubkey, "alice", ServiceType::Monitoring);
            store.update_validator(&id, |v| {
                v.balance = balance;
                v.rewards = rewards;
                v.status = status;
                v.performance = Performance {
                    effectiveness: eff,
                    effectiveness_scale: scale,
                    missed_proposals: 0,
                };
            });
        }
        // another user's validator must not leak in
        seeded_validator(&store, "0xdd", "bob", ServiceType::Monitoring);

        let summary = registry.dashboard("alice");
        assert_eq!(summary.total_validators, 3);
        assert_eq!(summary.healthy, 2);
        assert!((summary.total_staked - 96.0).abs() < 1e-9);
        assert!((summary.total_rewards - 0.3).abs() < 1e-9);
        // mean of 0.98 and 0.96; the validator with no report is excluded
        assert!((summary.average_effectiveness.unwrap() - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_dashboard_empty_owner() {
        let (registry, _) = registry();
        let summary = registry.dashboard("nobody");
        assert_eq!(summary.total_validators, 0);
        assert_eq!(summary.average_effectiveness, None);
    }

    #[tokio::test]
    async fn test_add_from_chain_by_pubkey_and_index() {
        let (registry, store) = registry();
        let server = NodeServer::new("alpha", ServerRole::Combined, 1);
        let server_id = server.id.clone();
        store.insert_server(server);

        let explorer = MockExplorer::new(Network::Mainnet).with_observation(ChainObservation {
            public_key: "0xaa".to_string(),
            index: Some(42),
            status: "active_online".to_string(),
            balance: 32.2,
            effective_balance: 32.0,
            activation_epoch: Some(100),
            exit_epoch: None,
            slashed: false,
        });

        let v = registry
            .add_from_chain("alice", "0xaa", &explorer, AssignmentStrategy::LeastLoaded, 10)
            .await
            .expect("added");
        assert_eq!(v.owner.as_deref(), Some("alice"));
        assert_eq!(v.index, Some(42));
        assert_eq!(v.status, ValidatorStatus::ActiveOnline);
        assert_eq!(v.server_id, Some(server_id));
        assert_eq!(v.name, "validator-42");

        // same validator by index resolves to the same record
        let again = registry
            .add_from_chain("alice", "42", &explorer, AssignmentStrategy::LeastLoaded, 20)
            .await
            .expect("upserted");
        assert_eq!(again.id, v.id);
        assert_eq!(store.validator_count(), 1);
    }

    #[tokio::test]
    async fn test_add_from_chain_unknown_is_not_found() {
        let (registry, _) = registry();
        let explorer = MockExplorer::new(Network::Mainnet);
        let err = registry
            .add_from_chain("alice", "0xzz", &explorer, AssignmentStrategy::None, 1)
            .await;
        assert!(matches!(
            err,
            Err(RegistryError::Explorer(ExplorerError::NotFound))
        ));
    }
}
