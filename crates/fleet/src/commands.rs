//! Pull-based command queue.
//!
//! Agents never receive pushed work. The server queues [`Command`]s per
//! node server; each agent polls its own queue, executes, and reports
//! status transitions back. Queue order is oldest-first by creation time.

use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Command, CommandStatus, CommandType};
use crate::store::FleetStore;

/// Pending commands older than this many agent poll intervals are
/// surfaced as stale to operators. No auto-expiry; an agent that comes
/// back late may still pick them up.
pub const STALE_POLL_INTERVALS: u64 = 5;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command not found")]
    NotFound,
    #[error("illegal status transition {from:?} -> {to:?}")]
    InvalidTransition { from: CommandStatus, to: CommandStatus },
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new command was queued.
    Created(Command),
    /// An equivalent command was already in flight; nothing was queued.
    Deduplicated(Command),
}

impl EnqueueOutcome {
    pub fn command(&self) -> &Command {
        match self {
            EnqueueOutcome::Created(c) | EnqueueOutcome::Deduplicated(c) => c,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

#[derive(Clone)]
pub struct CommandQueue {
    store: FleetStore,
}

impl CommandQueue {
    pub fn new(store: FleetStore) -> CommandQueue {
        CommandQueue { store }
    }

    /// Queue a command for one node server's agent.
    ///
    /// `REFRESH_DATA` is idempotent work, so a second refresh for an agent
    /// that already has one pending or running collapses into the existing
    /// command. Other command types always queue. Dedup check and insert
    /// run under one lock.
    pub fn enqueue(
        &self,
        command_type: CommandType,
        target_node: &str,
        created_by: &str,
        payload: serde_json::Value,
        now_ms: u64,
    ) -> EnqueueOutcome {
        let server_name = self.store.get_server(target_node).map(|s| s.name);
        self.store.with_commands_mut(|commands| {
            if command_type == CommandType::RefreshData {
                let in_flight = commands
                    .values()
                    .find(|c| {
                        c.command_type == CommandType::RefreshData
                            && c.target_node == target_node
                            && !c.status.is_terminal()
                    })
                    .cloned();
                if let Some(existing) = in_flight {
                    info!(
                        target_node,
                        existing = %existing.id,
                        "refresh already in flight, not queueing another"
                    );
                    return EnqueueOutcome::Deduplicated(existing);
                }
            }
            let mut command = Command::new(command_type, target_node, created_by, now_ms)
                .with_payload(payload);
            command.target_server = server_name;
            info!(id = %command.id, ?command_type, target_node, "queued command");
            commands.insert(command.id.clone(), command.clone());
            EnqueueOutcome::Created(command)
        })
    }

    /// Queue a refresh for every server backing `owner`'s validators.
    /// Returns the ids of commands actually created (dedup hits excluded).
    pub fn enqueue_refresh_for_owner(&self, owner: &str, now_ms: u64) -> Vec<String> {
        let mut server_ids: Vec<String> = self
            .store
            .validators_where(|v| v.owner.as_deref() == Some(owner))
            .into_iter()
            .filter_map(|v| v.server_id)
            .collect();
        server_ids.sort();
        server_ids.dedup();

        let mut created = Vec::new();
        for server_id in server_ids {
            let outcome = self.enqueue(
                CommandType::RefreshData,
                &server_id,
                owner,
                serde_json::Value::Null,
                now_ms,
            );
            if outcome.is_created() {
                created.push(outcome.command().id.clone());
            }
        }
        created
    }

    /// Snapshot of pending commands for one agent, oldest first.
    ///
    /// Polling does not claim anything: the command stays pending until
    /// the agent reports it running.
    pub fn poll_pending(&self, target_node: &str) -> Vec<Command> {
        let mut pending = self.store.commands_where(|c| {
            c.target_node == target_node && c.status == CommandStatus::Pending
        });
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending
    }

    /// Advance a command's status on behalf of its agent.
    ///
    /// Only the legal pending -> running -> completed/failed steps are
    /// accepted; anything else is rejected with a typed error and a log
    /// line, leaving the record untouched.
    pub fn update_status(
        &self,
        id: &str,
        next: CommandStatus,
        log_line: Option<String>,
        now_ms: u64,
    ) -> Result<Command, CommandError> {
        let current = self.store.get_command(id).ok_or(CommandError::NotFound)?;
        if !current.status.can_transition_to(next) {
            warn!(
                id,
                from = ?current.status,
                to = ?next,
                "rejected illegal command transition"
            );
            return Err(CommandError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }
        self.store
            .update_command(id, |c| {
                c.status = next;
                c.updated_at = now_ms;
                match next {
                    CommandStatus::Running => c.started_at = Some(now_ms),
                    CommandStatus::Completed | CommandStatus::Failed => {
                        c.finished_at = Some(now_ms)
                    }
                    CommandStatus::Pending => {}
                }
                if let Some(line) = log_line {
                    c.logs.push(line);
                }
            })
            .ok_or(CommandError::NotFound)
    }

    /// Pending commands that have waited longer than
    /// [`STALE_POLL_INTERVALS`] poll intervals, oldest first.
    pub fn stale_pending(&self, poll_interval_secs: u64, now_ms: u64) -> Vec<Command> {
        let threshold_ms = poll_interval_secs * 1_000 * STALE_POLL_INTERVALS;
        let mut stale = self.store.commands_where(|c| {
            c.status == CommandStatus::Pending
                && now_ms.saturating_sub(c.created_at) > threshold_ms
        });
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for c in &stale {
            warn!(id = %c.id, target_node = %c.target_node, age_ms = now_ms.saturating_sub(c.created_at), "stale pending command");
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceType, Validator};
    use stakewatch_common::network::Network;

    fn queue() -> (CommandQueue, FleetStore) {
        let store = FleetStore::new();
        (CommandQueue::new(store.clone()), store)
    }

    #[test]
    fn test_refresh_dedup_while_in_flight() {
        let (queue, _) = queue();
        let first = queue.enqueue(
            CommandType::RefreshData,
            "node-1",
            "alice",
            serde_json::Value::Null,
            100,
        );
        assert!(first.is_created());
        let first_id = first.command().id.clone();

        // pending: dedup
        let second = queue.enqueue(
            CommandType::RefreshData,
            "node-1",
            "alice",
            serde_json::Value::Null,
            200,
        );
        assert!(!second.is_created());
        assert_eq!(second.command().id, first_id);

        // running: still dedup
        queue
            .update_status(&first_id, CommandStatus::Running, None, 300)
            .expect("running");
        let third = queue.enqueue(
            CommandType::RefreshData,
            "node-1",
            "alice",
            serde_json::Value::Null,
            400,
        );
        assert!(!third.is_created());

        // completed: a new refresh may queue again
        queue
            .update_status(&first_id, CommandStatus::Completed, None, 500)
            .expect("completed");
        let fourth = queue.enqueue(
            CommandType::RefreshData,
            "node-1",
            "alice",
            serde_json::Value::Null,
            600,
        );
        assert!(fourth.is_created());
        assert_ne!(fourth.command().id, first_id);
    }

    #[test]
    fn test_enqueue_echoes_server_name() {
        let (queue, store) = queue();
        let server = crate::model::NodeServer::new("helsinki-1", crate::model::ServerRole::Combined, 1);
        let id = server.id.clone();
        store.insert_server(server);

        let outcome = queue.enqueue(CommandType::CheckVersion, &id, "admin", serde_json::Value::Null, 5);
        assert_eq!(outcome.command().target_server.as_deref(), Some("helsinki-1"));

        // unknown target: no name to echo
        let loose = queue.enqueue(CommandType::CheckVersion, "ghost", "admin", serde_json::Value::Null, 5);
        assert_eq!(loose.command().target_server, None);
    }

    #[test]
    fn test_refresh_dedup_is_per_agent() {
        let (queue, _) = queue();
        assert!(queue
            .enqueue(CommandType::RefreshData, "node-1", "a", serde_json::Value::Null, 1)
            .is_created());
        assert!(queue
            .enqueue(CommandType::RefreshData, "node-2", "a", serde_json::Value::Null, 1)
            .is_created());
    }

    #[test]
    fn test_non_refresh_commands_never_dedup() {
        let (queue, _) = queue();
        assert!(queue
            .enqueue(CommandType::CheckVersion, "node-1", "a", serde_json::Value::Null, 1)
            .is_created());
        assert!(queue
            .enqueue(CommandType::CheckVersion, "node-1", "a", serde_json::Value::Null, 2)
            .is_created());
    }

    #[test]
    fn test_poll_pending_is_oldest_first_and_scoped() {
        let (queue, _) = queue();
        let newer = queue.enqueue(
            CommandType::CheckVersion,
            "node-1",
            "a",
            serde_json::Value::Null,
            200,
        );
        let older = queue.enqueue(
            CommandType::FetchMetrics,
            "node-1",
            "a",
            serde_json::Value::Null,
            100,
        );
        queue.enqueue(
            CommandType::CheckVersion,
            "node-2",
            "a",
            serde_json::Value::Null,
            50,
        );

        let pending = queue.poll_pending("node-1");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older.command().id);
        assert_eq!(pending[1].id, newer.command().id);

        // polling does not claim
        assert_eq!(queue.poll_pending("node-1").len(), 2);
    }

    #[test]
    fn test_update_status_legal_path_stamps_times_and_logs() {
        let (queue, _) = queue();
        let id = queue
            .enqueue(CommandType::UpdateSoftware, "node-1", "admin", serde_json::Value::Null, 10)
            .command()
            .id
            .clone();

        let running = queue
            .update_status(&id, CommandStatus::Running, Some("starting".into()), 20)
            .expect("running");
        assert_eq!(running.started_at, Some(20));

        let done = queue
            .update_status(&id, CommandStatus::Completed, Some("ok".into()), 30)
            .expect("completed");
        assert_eq!(done.finished_at, Some(30));
        assert_eq!(done.logs, vec!["starting".to_string(), "ok".to_string()]);
    }

    #[test]
    fn test_update_status_rejects_illegal_transitions() {
        let (queue, store) = queue();
        let id = queue
            .enqueue(CommandType::CheckVersion, "node-1", "admin", serde_json::Value::Null, 10)
            .command()
            .id
            .clone();

        // pending cannot jump straight to completed
        assert!(matches!(
            queue.update_status(&id, CommandStatus::Completed, None, 20),
            Err(CommandError::InvalidTransition {
                from: CommandStatus::Pending,
                to: CommandStatus::Completed,
            })
        ));
        // record untouched
        assert_eq!(store.get_command(&id).unwrap().status, CommandStatus::Pending);

        queue.update_status(&id, CommandStatus::Running, None, 30).expect("running");
        queue.update_status(&id, CommandStatus::Failed, None, 40).expect("failed");
        assert!(matches!(
            queue.update_status(&id, CommandStatus::Running, None, 50),
            Err(CommandError::InvalidTransition { .. })
        ));

        assert!(matches!(
            queue.update_status("missing", CommandStatus::Running, None, 1),
            Err(CommandError::NotFound)
        ));
    }

    #[test]
    fn test_stale_pending_threshold() {
        let (queue, _) = queue();
        let poll = 60u64; // seconds; stale after 300s
        let old = queue.enqueue(
            CommandType::CheckVersion,
            "node-1",
            "a",
            serde_json::Value::Null,
            0,
        );
        queue.enqueue(
            CommandType::CheckVersion,
            "node-1",
            "a",
            serde_json::Value::Null,
            200_000,
        );

        // at 300s exactly, nothing is stale yet
        assert!(queue.stale_pending(poll, 300_000).is_empty());
        // past the threshold only the old one qualifies
        let stale = queue.stale_pending(poll, 301_000);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.command().id);

        // running commands are not stale
        queue
            .update_status(&old.command().id, CommandStatus::Running, None, 310_000)
            .expect("running");
        assert!(queue.stale_pending(poll, 400_000).is_empty());
    }

    #[test]
    fn test_enqueue_refresh_for_owner_covers_backing_servers() {
        let (queue, store) = queue();
        for (pubkey, server) in [("0xaa", "srv-1"), ("0xbb", "srv-1"), ("0xcc", "srv-2")] {
            let mut v = Validator::new("v", Network::Mainnet, ServiceType::Monitoring, 1);
            v.public_key = Some(pubkey.to_string());
            v.owner = Some("alice".to_string());
            v.server_id = Some(server.to_string());
            store.insert_validator(v);
        }
        // unassigned validator contributes nothing
        let mut loose = Validator::new("v", Network::Mainnet, ServiceType::Monitoring, 1);
        loose.owner = Some("alice".to_string());
        store.insert_validator(loose);

        let created = queue.enqueue_refresh_for_owner("alice", 100);
        // one refresh per distinct server
        assert_eq!(created.len(), 2);

        // a second sweep dedups against the in-flight refreshes
        assert!(queue.enqueue_refresh_for_owner("alice", 200).is_empty());
    }
}
