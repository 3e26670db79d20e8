//! HTTP surface of the fleet server.
//!
//! ## Endpoints
//!
//! | Endpoint | Method | Caller | Description |
//! |----------|--------|--------|-------------|
//! | `/health` | GET | anyone | Liveness probe |
//! | `/nodes/{id}/report` | POST | agent | Ingest a report (always 200) |
//! | `/nodes/{id}/config` | GET | agent | Tracked pubkeys + poll interval |
//! | `/nodes/{id}/commands/pending` | GET | agent | Pending command queue |
//! | `/commands/{id}` | PUT | agent | Advance command status |
//! | `/commands/stale` | GET | admin | Pending commands past the staleness window |
//! | `/servers` | POST | admin | Register a node server |
//! | `/servers/{id}/version` | PUT | agent | Update software versions |
//! | `/servers/{id}/metrics` | PUT | agent | Update resource snapshot |
//! | `/nodes/dashboard` | GET | user | Aggregates + validator list |
//! | `/nodes/validators` | POST | user | Add a validator via chain lookup |
//! | `/nodes/validators/{id}` | DELETE | user | Remove a monitoring validator |
//! | `/nodes/validators/{id}/cancel` | POST | user | Request managed teardown |
//! | `/nodes/refresh` | POST | user | Queue refreshes for backing servers |
//! | `/nodes/update` | POST | admin | Queue software updates |
//! | `/nodes/version` | POST | admin | Queue version checks |
//! | `/nodes/metrics` | POST | admin | Queue metric fetches |
//! | `/nodes/telegram/connect` | POST | user | Link a telegram chat |
//! | `/nodes/telegram/test` | POST | user | Send a test notification |
//! | `/orders` | POST | user | Submit a provisioning order |
//! | `/orders/{id}/keystores` | POST | user | Seal a keystore onto an order |
//! | `/orders/{id}/password` | POST | user | Seal the batch password |
//! | `/orders/{id}/confirm` | POST | admin | Confirm payment and provision |
//! | `/orders/{id}/keystores` | GET | admin | Decrypt stored keystores |
//! | `/orders/{id}/password` | GET | admin | Decrypt the batch password |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use stakewatch_common::config::FleetConfig;
use stakewatch_common::explorer::{ChainExplorer, ExplorerError, HttpExplorer};
use stakewatch_common::network::Network;

use crate::alerts::AlertEngine;
use crate::auth::{self, AuthKeeper};
use crate::commands::{CommandError, CommandQueue};
use crate::ingest::{AgentReport, IngestSummary, ReportIngestor, SoftwareVersions, SystemMetrics};
use crate::model::{CommandStatus, CommandType, NodeServer, ServerRole};
use crate::notify::{LogNotifier, SharedNotifier, TelegramNotifier};
use crate::registry::{AssignmentStrategy, RegistryError, ValidatorRegistry};
use crate::store::FleetStore;
use crate::vault::{CredentialVault, VaultError};

/// Milliseconds since the Unix epoch. The only wall-clock read in the
/// server; everything below the handlers takes explicit timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

pub struct AppState {
    pub store: FleetStore,
    pub registry: ValidatorRegistry,
    pub queue: CommandQueue,
    pub ingestor: ReportIngestor,
    pub vault: CredentialVault,
    pub auth: AuthKeeper,
    pub notifier: SharedNotifier,
    pub explorers: HashMap<Network, Arc<dyn ChainExplorer>>,
    pub default_network: Network,
    pub assignment: AssignmentStrategy,
    pub agent_poll_interval_secs: u64,
}

impl AppState {
    /// Wire the whole server from config.
    pub fn build(cfg: &FleetConfig) -> Arc<AppState> {
        let store = FleetStore::new();
        let registry = ValidatorRegistry::new(store.clone());
        let queue = CommandQueue::new(store.clone());

        let notifier: SharedNotifier = match &cfg.telegram_bot_token {
            Some(token) => {
                let mut telegram = TelegramNotifier::new(token.clone());
                if let Some(base) = &cfg.telegram_api_base {
                    telegram = telegram.with_api_base(base.clone());
                }
                Arc::new(telegram)
            }
            None => {
                warn!("no telegram bot token configured, notifications are log-only");
                Arc::new(LogNotifier)
            }
        };

        let default_network = cfg
            .default_network
            .as_deref()
            .and_then(Network::parse)
            .unwrap_or(Network::Mainnet);

        let mut explorers: HashMap<Network, Arc<dyn ChainExplorer>> = HashMap::new();
        for network in Network::ALL {
            let mut explorer = HttpExplorer::for_network(network);
            if let Some(overrides) = &cfg.explorer_base_urls {
                if let Some(base) = overrides.get(network.id()) {
                    explorer = explorer.with_base_url(base.clone());
                }
            }
            explorers.insert(network, Arc::new(explorer));
        }

        let passphrase = match &cfg.vault_passphrase {
            Some(p) => p.clone(),
            None => {
                warn!("vault passphrase not configured, falling back to dev key");
                "dev-only-passphrase".to_string()
            }
        };
        let vault = CredentialVault::new(store.clone(), &passphrase);

        let alerts = AlertEngine::new(store.clone(), notifier.clone());
        let ingestor = ReportIngestor::new(
            store.clone(),
            registry.clone(),
            alerts,
            default_network,
        );

        Arc::new(AppState {
            store,
            registry,
            queue,
            ingestor,
            vault,
            auth: AuthKeeper::from_config(cfg),
            notifier,
            explorers,
            default_network,
            assignment: AssignmentStrategy::LeastLoaded,
            agent_poll_interval_secs: cfg.agent_poll_interval_secs.unwrap_or(60),
        })
    }

    fn explorer_for(&self, network: Network) -> Arc<dyn ChainExplorer> {
        self.explorers
            .get(&network)
            .cloned()
            .expect("explorers built for every known network")
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // agent-facing
        .route("/nodes/:id/report", post(report_handler))
        .route("/nodes/:id/config", get(node_config_handler))
        .route("/nodes/:id/commands/pending", get(pending_commands_handler))
        .route("/commands/:id", put(update_command_handler))
        .route("/servers/:id/version", put(server_version_handler))
        .route("/servers/:id/metrics", put(server_metrics_handler))
        // user-facing
        .route("/nodes/dashboard", get(dashboard_handler))
        .route("/nodes/validators", post(add_validator_handler))
        .route("/nodes/validators/:id", delete(remove_validator_handler))
        .route("/nodes/validators/:id/cancel", post(cancel_validator_handler))
        .route("/nodes/refresh", post(refresh_handler))
        .route("/nodes/telegram/connect", post(telegram_connect_handler))
        .route("/nodes/telegram/test", post(telegram_test_handler))
        .route("/orders", post(create_order_handler))
        .route("/orders/:id/keystores", post(upload_keystore_handler).get(decrypt_keystores_handler))
        .route("/orders/:id/password", post(set_order_password_handler).get(decrypt_password_handler))
        // admin-facing
        .route("/servers", post(create_server_handler))
        .route("/orders/:id/confirm", post(confirm_order_handler))
        .route("/commands/stale", get(stale_commands_handler))
        .route("/nodes/update", post(fleet_update_handler))
        .route("/nodes/version", post(fleet_version_handler))
        .route("/nodes/metrics", post(fleet_metrics_handler))
        .with_state(state)
}

// ════════════════════════════════════════════════════════════════════════════
// AUTH HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn forbidden(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::FORBIDDEN, Json(json!({"error": msg})))
}

fn not_found(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": msg})))
}

fn bad_request(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg})))
}

/// Resolve the user identity or fail with 403.
fn require_user(headers: &HeaderMap) -> Result<String, (StatusCode, Json<Value>)> {
    auth::user_id(headers)
        .map(str::to_string)
        .ok_or_else(|| forbidden("missing user identity"))
}

/// Check admin credentials or fail with 403.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    if state.auth.is_admin(auth::admin_token(headers)) {
        Ok(())
    } else {
        Err(forbidden("admin token required"))
    }
}

/// Check the agent token against the server the request names.
fn require_agent_for(
    state: &AppState,
    headers: &HeaderMap,
    server: &NodeServer,
) -> Result<(), (StatusCode, Json<Value>)> {
    if state.auth.agent_allowed(auth::agent_key(headers), &server.name) {
        Ok(())
    } else {
        Err(forbidden("agent token not valid for this server"))
    }
}

fn registry_error(err: RegistryError) -> (StatusCode, Json<Value>) {
    match err {
        RegistryError::NotFound => not_found("validator not found"),
        RegistryError::PermissionDenied(msg) => forbidden(&msg),
        RegistryError::WrongServiceType { .. } => bad_request(&err.to_string()),
        RegistryError::Explorer(e) => explorer_error(e),
    }
}

fn explorer_error(err: ExplorerError) -> (StatusCode, Json<Value>) {
    match err {
        ExplorerError::NotFound => not_found("validator not found on chain"),
        ExplorerError::UnsupportedNetwork(n) => bad_request(&format!("unsupported network: {}", n)),
        ExplorerError::Http(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("chain explorer unreachable: {}", e)})),
        ),
        ExplorerError::Decode(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("chain explorer returned garbage: {}", e)})),
        ),
    }
}

fn vault_error(err: VaultError) -> (StatusCode, Json<Value>) {
    match err {
        VaultError::OrderNotFound => not_found("order not found"),
        VaultError::NoPassword => not_found("order has no stored password"),
        VaultError::WrongOrderState { .. } => bad_request(&err.to_string()),
        VaultError::Crypto(_) | VaultError::NotUtf8 => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "vault decrypt failed"})),
        ),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// AGENT HANDLERS
// ════════════════════════════════════════════════════════════════════════════

pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// POST /nodes/{id}/report
///
/// The agent contract: once authenticated, this returns 200 no matter
/// what the report contains. Processing problems surface as
/// `success: false` in the body.
pub async fn report_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(report): Json<AgentReport>,
) -> Result<(StatusCode, Json<IngestSummary>), (StatusCode, Json<Value>)> {
    if let Some(server) = state.store.get_server(&id) {
        require_agent_for(&state, &headers, &server)?;
    } else if auth::agent_key(&headers).is_none() {
        return Err(forbidden("agent token required"));
    }
    let summary = state.ingestor.ingest(&id, report, now_ms()).await;
    Ok((StatusCode::OK, Json(summary)))
}

/// GET /nodes/{id}/config
pub async fn node_config_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let server = state.store.get_server(&id).ok_or_else(|| not_found("node server not found"))?;
    require_agent_for(&state, &headers, &server)?;
    let pubkeys: Vec<String> = state
        .registry
        .find_by_server(&id)
        .into_iter()
        .filter_map(|v| v.public_key)
        .collect();
    Ok(Json(json!({
        "server": {"id": server.id, "name": server.name, "role": server.role},
        "pubkeys": pubkeys,
        "pollIntervalSecs": state.agent_poll_interval_secs,
    })))
}

/// GET /nodes/{id}/commands/pending
pub async fn pending_commands_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let server = state.store.get_server(&id).ok_or_else(|| not_found("node server not found"))?;
    require_agent_for(&state, &headers, &server)?;
    let pending = state.queue.poll_pending(&id);
    Ok(Json(json!({"commands": pending})))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommandReq {
    pub status: CommandStatus,
    #[serde(default)]
    pub log: Option<String>,
}

/// PUT /commands/{id}
pub async fn update_command_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCommandReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let command = state.store.get_command(&id).ok_or_else(|| not_found("command not found"))?;
    let server = state
        .store
        .get_server(&command.target_node)
        .ok_or_else(|| not_found("command target server not found"))?;
    require_agent_for(&state, &headers, &server)?;

    match state.queue.update_status(&id, payload.status, payload.log, now_ms()) {
        Ok(updated) => Ok(Json(json!({"ok": true, "command": updated}))),
        Err(CommandError::NotFound) => Err(not_found("command not found")),
        Err(e @ CommandError::InvalidTransition { .. }) => Err(bad_request(&e.to_string())),
    }
}

/// PUT /servers/{id}/version
pub async fn server_version_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(versions): Json<SoftwareVersions>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let server = state.store.get_server(&id).ok_or_else(|| not_found("node server not found"))?;
    require_agent_for(&state, &headers, &server)?;
    let now = now_ms();
    state.store.update_server(&id, |s| {
        if let Some(v) = &versions.execution {
            s.execution_version = Some(v.clone());
        }
        if let Some(v) = &versions.consensus {
            s.consensus_version = Some(v.clone());
        }
        s.updated_at = now;
    });
    Ok(Json(json!({"ok": true})))
}

/// PUT /servers/{id}/metrics
pub async fn server_metrics_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(metrics): Json<SystemMetrics>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let server = state.store.get_server(&id).ok_or_else(|| not_found("node server not found"))?;
    require_agent_for(&state, &headers, &server)?;
    let now = now_ms();
    state.store.update_server(&id, |s| {
        s.resources = crate::model::ResourceSnapshot {
            cpu_percent: metrics.cpu_percent,
            ram_percent: metrics.ram_percent,
            disk_percent: metrics.disk_percent,
        };
        s.updated_at = now;
    });
    Ok(Json(json!({"ok": true})))
}

// ════════════════════════════════════════════════════════════════════════════
// USER HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// GET /nodes/dashboard
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let summary = state.registry.dashboard(&user);
    let validators = state.registry.find_by_owner(&user);
    Ok(Json(json!({"summary": summary, "validators": validators})))
}

#[derive(Debug, Deserialize)]
pub struct AddValidatorReq {
    /// Pubkey (0x-prefixed) or numeric chain index.
    pub ident: String,
    #[serde(default)]
    pub network: Option<String>,
}

/// POST /nodes/validators
pub async fn add_validator_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AddValidatorReq>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let network = match &payload.network {
        Some(name) => Network::parse(name)
            .ok_or_else(|| bad_request(&format!("unsupported network: {}", name)))?,
        None => state.default_network,
    };
    let explorer = state.explorer_for(network);
    let validator = state
        .registry
        .add_from_chain(&user, &payload.ident, explorer.as_ref(), state.assignment, now_ms())
        .await
        .map_err(registry_error)?;
    Ok((StatusCode::CREATED, Json(json!({"validator": validator}))))
}

/// DELETE /nodes/validators/{id}
pub async fn remove_validator_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let removed = state.registry.remove(&id, &user).map_err(registry_error)?;
    Ok(Json(json!({"ok": true, "removed": removed.id})))
}

#[derive(Debug, Deserialize)]
pub struct CancelValidatorReq {
    pub reason: String,
}

/// POST /nodes/validators/{id}/cancel
pub async fn cancel_validator_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CancelValidatorReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let updated = state
        .registry
        .request_cancellation(&id, &user, &payload.reason, now_ms())
        .map_err(registry_error)?;
    Ok(Json(json!({"ok": true, "validator": updated})))
}

/// POST /nodes/refresh
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let created = state.queue.enqueue_refresh_for_owner(&user, now_ms());
    Ok(Json(json!({"ok": true, "queued": created})))
}

#[derive(Debug, Deserialize)]
pub struct TelegramConnectReq {
    pub chat_id: i64,
}

/// POST /nodes/telegram/connect
pub async fn telegram_connect_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TelegramConnectReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    state.store.set_chat_id(&user, payload.chat_id);
    Ok(Json(json!({"ok": true})))
}

/// POST /nodes/telegram/test
pub async fn telegram_test_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    let chat_id = state
        .store
        .chat_id_for(&user)
        .ok_or_else(|| not_found("no telegram chat connected"))?;
    match state
        .notifier
        .send_alert(chat_id, "Test notification from your validator fleet.")
        .await
    {
        Ok(()) => Ok(Json(json!({"ok": true}))),
        Err(e) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("telegram send failed: {}", e)})),
        )),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ORDER HANDLERS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateOrderReq {
    #[serde(default)]
    pub network: Option<String>,
    pub quantity: u32,
}

/// POST /orders
pub async fn create_order_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderReq>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let user = require_user(&headers)?;
    if payload.quantity == 0 {
        return Err(bad_request("quantity must be positive"));
    }
    let network = match &payload.network {
        Some(name) => Network::parse(name)
            .ok_or_else(|| bad_request(&format!("unsupported network: {}", name)))?,
        None => state.default_network,
    };
    let order = crate::model::NodeOrder::new(user, network, payload.quantity, now_ms());
    let id = order.id.clone();
    state.store.insert_order(order);
    Ok((StatusCode::CREATED, Json(json!({"order_id": id}))))
}

#[derive(Debug, Deserialize)]
pub struct UploadKeystoreReq {
    pub filename: String,
    /// Raw keystore JSON, sealed before it is stored.
    pub keystore: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub index: Option<u64>,
}

/// Orders are user-scoped: only the submitting user touches them.
fn require_order_owner(
    state: &AppState,
    headers: &HeaderMap,
    order_id: &str,
) -> Result<(), (StatusCode, Json<Value>)> {
    let user = require_user(headers)?;
    let order = state
        .store
        .get_order(order_id)
        .ok_or_else(|| not_found("order not found"))?;
    if order.user_id != user {
        return Err(forbidden("order belongs to another user"));
    }
    Ok(())
}

/// POST /orders/{id}/keystores
pub async fn upload_keystore_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<UploadKeystoreReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_order_owner(&state, &headers, &id)?;
    state
        .vault
        .store_keystore(
            &id,
            &payload.filename,
            &payload.keystore,
            payload.pubkey,
            payload.index,
            now_ms(),
        )
        .map_err(vault_error)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordReq {
    pub password: String,
}

/// POST /orders/{id}/password
pub async fn set_order_password_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SetPasswordReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_order_owner(&state, &headers, &id)?;
    state
        .vault
        .set_password(&id, &payload.password, now_ms())
        .map_err(vault_error)?;
    Ok(Json(json!({"ok": true})))
}

/// POST /orders/{id}/confirm
///
/// Payment confirmation comes from the billing side, so this is admin
/// territory. Marks the order paid and immediately provisions managed
/// validators from its deposited keys.
pub async fn confirm_order_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_admin(&state, &headers)?;
    let now = now_ms();
    let order = state.store.get_order(&id).ok_or_else(|| not_found("order not found"))?;
    if order.status != crate::model::OrderStatus::Submitted {
        return Err(bad_request(&format!(
            "order is {:?}, expected Submitted",
            order.status
        )));
    }
    state.store.update_order(&id, |o| {
        o.status = crate::model::OrderStatus::Paid;
        o.updated_at = now;
    });
    let provisioned = state
        .vault
        .provision_from_order(&state.registry, &id, state.assignment, now)
        .map_err(vault_error)?;
    Ok(Json(json!({
        "ok": true,
        "provisioned": provisioned.iter().map(|v| v.id.clone()).collect::<Vec<_>>(),
    })))
}

/// GET /orders/{id}/keystores
pub async fn decrypt_keystores_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_admin(&state, &headers)?;
    let keystores = state.vault.decrypt_keystores(&id).map_err(vault_error)?;
    let entries: Vec<Value> = keystores
        .into_iter()
        .map(|(filename, json_text)| json!({"filename": filename, "keystore": json_text}))
        .collect();
    Ok(Json(json!({"keystores": entries})))
}

/// GET /orders/{id}/password
pub async fn decrypt_password_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_admin(&state, &headers)?;
    let password = state.vault.decrypt_password(&id).map_err(vault_error)?;
    Ok(Json(json!({"password": password})))
}

// ════════════════════════════════════════════════════════════════════════════
// ADMIN HANDLERS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateServerReq {
    pub name: String,
    pub role: ServerRole,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ssh_user: Option<String>,
}

/// POST /servers
pub async fn create_server_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateServerReq>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    require_admin(&state, &headers)?;
    if state.store.find_server_by_name(&payload.name).is_some() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "server name already registered"})),
        ));
    }
    let mut server = NodeServer::new(payload.name, payload.role, now_ms());
    server.address = payload.address;
    server.ssh_user = payload.ssh_user;
    let id = server.id.clone();
    state.store.insert_server(server);
    Ok((StatusCode::CREATED, Json(json!({"server_id": id}))))
}

#[derive(Debug, Deserialize, Default)]
pub struct FleetCommandReq {
    /// Restrict to one node server; absent means the whole fleet.
    #[serde(default)]
    pub node_id: Option<String>,
}

async fn enqueue_fleet_command(
    state: &AppState,
    headers: &HeaderMap,
    payload: FleetCommandReq,
    command_type: CommandType,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_admin(state, headers)?;
    let now = now_ms();
    let targets: Vec<String> = match payload.node_id {
        Some(id) => {
            state.store.get_server(&id).ok_or_else(|| not_found("node server not found"))?;
            vec![id]
        }
        None => {
            let mut servers = state.store.all_servers();
            servers.sort_by(|a, b| a.name.cmp(&b.name));
            servers.into_iter().map(|s| s.id).collect()
        }
    };
    let mut queued = Vec::new();
    for target in targets {
        let outcome = state.queue.enqueue(command_type, &target, "admin", Value::Null, now);
        if outcome.is_created() {
            queued.push(outcome.command().id.clone());
        }
    }
    Ok(Json(json!({"ok": true, "queued": queued})))
}

/// POST /nodes/update
pub async fn fleet_update_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<FleetCommandReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    enqueue_fleet_command(&state, &headers, payload, CommandType::UpdateSoftware).await
}

/// POST /nodes/version
pub async fn fleet_version_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<FleetCommandReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    enqueue_fleet_command(&state, &headers, payload, CommandType::CheckVersion).await
}

/// POST /nodes/metrics
pub async fn fleet_metrics_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<FleetCommandReq>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    enqueue_fleet_command(&state, &headers, payload, CommandType::FetchMetrics).await
}

/// GET /commands/stale
pub async fn stale_commands_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    require_admin(&state, &headers)?;
    let stale = state
        .queue
        .stale_pending(state.agent_poll_interval_secs, now_ms());
    Ok(Json(json!({"commands": stale})))
}
