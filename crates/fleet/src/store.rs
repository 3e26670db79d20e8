//! Shared in-memory fleet state.
//!
//! [`FleetStore`] is the single source of truth for validators, servers,
//! commands, and orders. It is cheap to clone and safe to share across
//! handlers and background tasks. Locks are held only for the duration of
//! a closure; nothing async runs under a lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{Command, NodeOrder, NodeServer, Validator};

/// Clonable handle to the fleet's mutable state.
#[derive(Clone, Default)]
pub struct FleetStore {
    validators: Arc<RwLock<HashMap<String, Validator>>>,
    servers: Arc<RwLock<HashMap<String, NodeServer>>>,
    commands: Arc<RwLock<HashMap<String, Command>>>,
    orders: Arc<RwLock<HashMap<String, NodeOrder>>>,
    /// user id -> telegram chat id.
    chat_ids: Arc<RwLock<HashMap<String, i64>>>,
}

impl FleetStore {
    pub fn new() -> FleetStore {
        FleetStore::default()
    }

    // ── validators ──────────────────────────────────────────────────────

    pub fn insert_validator(&self, v: Validator) {
        self.validators.write().insert(v.id.clone(), v);
    }

    pub fn get_validator(&self, id: &str) -> Option<Validator> {
        self.validators.read().get(id).cloned()
    }

    pub fn remove_validator(&self, id: &str) -> Option<Validator> {
        self.validators.write().remove(id)
    }

    /// Mutate one validator in place. Returns the updated copy, or `None`
    /// if the id is unknown.
    pub fn update_validator<F>(&self, id: &str, f: F) -> Option<Validator>
    where
        F: FnOnce(&mut Validator),
    {
        let mut guard = self.validators.write();
        let v = guard.get_mut(id)?;
        f(v);
        Some(v.clone())
    }

    /// Snapshot of all validators matching `pred`.
    pub fn validators_where<F>(&self, pred: F) -> Vec<Validator>
    where
        F: Fn(&Validator) -> bool,
    {
        self.validators.read().values().filter(|v| pred(v)).cloned().collect()
    }

    pub fn all_validators(&self) -> Vec<Validator> {
        self.validators.read().values().cloned().collect()
    }

    pub fn find_validator_by_pubkey(&self, pubkey: &str) -> Option<Validator> {
        self.validators
            .read()
            .values()
            .find(|v| v.public_key.as_deref() == Some(pubkey))
            .cloned()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.read().len()
    }

    /// Run `f` with write access to the whole validator map. Used where a
    /// lookup-by-pubkey and insert must be one atomic step.
    pub fn with_validators_mut<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<String, Validator>) -> R,
    {
        f(&mut self.validators.write())
    }

    // ── servers ─────────────────────────────────────────────────────────

    pub fn insert_server(&self, s: NodeServer) {
        self.servers.write().insert(s.id.clone(), s);
    }

    pub fn get_server(&self, id: &str) -> Option<NodeServer> {
        self.servers.read().get(id).cloned()
    }

    pub fn find_server_by_name(&self, name: &str) -> Option<NodeServer> {
        self.servers.read().values().find(|s| s.name == name).cloned()
    }

    pub fn update_server<F>(&self, id: &str, f: F) -> Option<NodeServer>
    where
        F: FnOnce(&mut NodeServer),
    {
        let mut guard = self.servers.write();
        let s = guard.get_mut(id)?;
        f(s);
        Some(s.clone())
    }

    pub fn all_servers(&self) -> Vec<NodeServer> {
        self.servers.read().values().cloned().collect()
    }

    // ── commands ────────────────────────────────────────────────────────

    pub fn insert_command(&self, c: Command) {
        self.commands.write().insert(c.id.clone(), c);
    }

    pub fn get_command(&self, id: &str) -> Option<Command> {
        self.commands.read().get(id).cloned()
    }

    pub fn update_command<F>(&self, id: &str, f: F) -> Option<Command>
    where
        F: FnOnce(&mut Command),
    {
        let mut guard = self.commands.write();
        let c = guard.get_mut(id)?;
        f(c);
        Some(c.clone())
    }

    pub fn commands_where<F>(&self, pred: F) -> Vec<Command>
    where
        F: Fn(&Command) -> bool,
    {
        self.commands.read().values().filter(|c| pred(c)).cloned().collect()
    }

    /// Run `f` with write access to the whole command map. Used where a
    /// read-check and insert must be one atomic step.
    pub fn with_commands_mut<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<String, Command>) -> R,
    {
        f(&mut self.commands.write())
    }

    // ── orders ──────────────────────────────────────────────────────────

    pub fn insert_order(&self, o: NodeOrder) {
        self.orders.write().insert(o.id.clone(), o);
    }

    pub fn get_order(&self, id: &str) -> Option<NodeOrder> {
        self.orders.read().get(id).cloned()
    }

    pub fn update_order<F>(&self, id: &str, f: F) -> Option<NodeOrder>
    where
        F: FnOnce(&mut NodeOrder),
    {
        let mut guard = self.orders.write();
        let o = guard.get_mut(id)?;
        f(o);
        Some(o.clone())
    }

    pub fn all_orders(&self) -> Vec<NodeOrder> {
        self.orders.read().values().cloned().collect()
    }

    // ── telegram chat registry ──────────────────────────────────────────

    pub fn set_chat_id(&self, user_id: impl Into<String>, chat_id: i64) {
        self.chat_ids.write().insert(user_id.into(), chat_id);
    }

    pub fn chat_id_for(&self, user_id: &str) -> Option<i64> {
        self.chat_ids.read().get(user_id).copied()
    }
}
