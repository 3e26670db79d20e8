//! Alert dedup and escalation.
//!
//! Runs after an ALERT report has been reconciled into the store. For
//! each reported validator the engine decides whether an operator should
//! hear about it now, applying a per-validator 24 hour cooldown and a
//! per-user batch dedup so one bad host produces one message, not fifty.
//! Counters only move when a send actually happens; suppressed alerts
//! leave the record untouched.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::model::Validator;
use crate::notify::{Notifier, SharedNotifier};
use crate::store::FleetStore;

/// Minimum gap between alert notifications for one validator.
pub const ALERT_COOLDOWN_MS: u64 = 24 * 60 * 60 * 1_000;

/// Consecutive-alert count at which a validator is escalated. Fires on
/// this exact value only, so a flapping validator escalates once per
/// outage, not on every report after the seventh.
pub const ESCALATION_THRESHOLD: u32 = 7;

/// Per-observation decision, in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Counters advanced; the owner was (or will be, within this batch's
    /// single per-user message) notified.
    Sent,
    /// Counters advanced and the consecutive count hit the escalation
    /// threshold exactly.
    Escalated,
    /// Status is not alert-worthy.
    SkippedHealthy,
    /// Pubkey unknown to the registry, or the validator has no owner.
    SkippedUnresolvable,
    /// Last alert was under the cooldown ago. No state change.
    SkippedCooldown,
}

pub struct AlertEngine {
    store: FleetStore,
    notifier: SharedNotifier,
}

impl AlertEngine {
    pub fn new(store: FleetStore, notifier: SharedNotifier) -> AlertEngine {
        AlertEngine { store, notifier }
    }

    /// Process one ALERT batch. `pubkeys` are the validators the agent
    /// flagged, already reconciled into the store.
    ///
    /// Returns one outcome per input pubkey. At most one notification is
    /// dispatched per owning user per call, regardless of how many of
    /// their validators are unhealthy.
    pub async fn process_batch(&self, pubkeys: &[String], now_ms: u64) -> Vec<AlertOutcome> {
        let mut outcomes = Vec::with_capacity(pubkeys.len());
        // owner -> validators to mention in their one message
        let mut per_user: Vec<(String, Vec<Validator>)> = Vec::new();
        let mut notified_users: HashSet<String> = HashSet::new();

        for pubkey in pubkeys {
            let validator = match self.store.find_validator_by_pubkey(pubkey) {
                Some(v) => v,
                None => {
                    warn!(pubkey, "alert for unregistered validator, skipping");
                    outcomes.push(AlertOutcome::SkippedUnresolvable);
                    continue;
                }
            };
            let owner = match validator.owner.clone() {
                Some(o) => o,
                None => {
                    warn!(pubkey, id = %validator.id, "alert for unowned validator, skipping");
                    outcomes.push(AlertOutcome::SkippedUnresolvable);
                    continue;
                }
            };
            if !validator.status.is_alertable() {
                outcomes.push(AlertOutcome::SkippedHealthy);
                continue;
            }
            // absent last_alert_sent counts as infinitely old
            let in_cooldown = validator
                .last_alert_sent
                .map(|t| now_ms.saturating_sub(t) < ALERT_COOLDOWN_MS)
                .unwrap_or(false);
            if in_cooldown {
                info!(pubkey, id = %validator.id, "alert suppressed by cooldown");
                outcomes.push(AlertOutcome::SkippedCooldown);
                continue;
            }

            let updated = self
                .store
                .update_validator(&validator.id, |v| {
                    v.alert_count += 1;
                    v.total_alert_count += 1;
                    v.last_alert_sent = Some(now_ms);
                    if v.alert_count == ESCALATION_THRESHOLD {
                        v.needs_attention = true;
                    }
                    v.updated_at = now_ms;
                })
                .expect("validator looked up above");

            if updated.alert_count == ESCALATION_THRESHOLD {
                warn!(
                    id = %updated.id,
                    name = %updated.name,
                    count = updated.alert_count,
                    "validator escalated, repeated alerts without recovery"
                );
                outcomes.push(AlertOutcome::Escalated);
            } else {
                outcomes.push(AlertOutcome::Sent);
            }

            if notified_users.insert(owner.clone()) {
                per_user.push((owner, vec![updated]));
            } else if let Some(entry) = per_user.iter_mut().find(|(u, _)| *u == owner) {
                entry.1.push(updated);
            }
        }

        for (user, validators) in per_user {
            self.dispatch(&user, &validators).await;
        }
        outcomes
    }

    /// Tell a validator's owner it came back. Called by the ingestor on
    /// an unhealthy-to-healthy transition; cooldown does not apply.
    pub async fn notify_recovery(&self, validator: &Validator) {
        let owner = match validator.owner.as_deref() {
            Some(o) => o,
            None => return,
        };
        let text = format!(
            "Validator {} is back online (status: {}).",
            validator.name, validator.status
        );
        self.send_to_user(owner, &text).await;
    }

    async fn dispatch(&self, user: &str, validators: &[Validator]) {
        let mut lines = vec![format!(
            "{} validator(s) need attention:",
            validators.len()
        )];
        for v in validators {
            lines.push(format!("  {} [{}] status {}", v.name, v.network, v.status));
        }
        let text = lines.join("\n");
        self.send_to_user(user, &text).await;
    }

    async fn send_to_user(&self, user: &str, text: &str) {
        match self.store.chat_id_for(user) {
            Some(chat_id) => {
                if let Err(e) = self.notifier.send_alert(chat_id, text).await {
                    error!(user, %e, "notification dispatch failed");
                }
            }
            None => {
                // no connected chat; the alert still counted, only the
                // delivery channel is missing
                warn!(user, text, "no telegram chat connected for user");
            }
        }
    }
}

/// Borrow-friendly constructor used by tests that keep the mock around.
pub fn engine_with(store: FleetStore, notifier: impl Notifier + 'static) -> AlertEngine {
    AlertEngine::new(store, std::sync::Arc::new(notifier))
}
