//! # Stakewatch Fleet Server
//!
//! Central server for validator fleet monitoring and command
//! orchestration. Host agents push reports and pull commands; operators
//! read dashboards and queue work; alerts go out through Telegram.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         FLEET SERVER                             │
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │ ReportIngest │──▶│  Validator   │──▶│   AlertEngine    │     │
//! │  │ (agent push) │   │   Registry   │   │ (dedup/escalate) │     │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘     │
//! │         │                  │                    │               │
//! │         ▼                  ▼                    ▼               │
//! │  ┌──────────────────────────────────┐   ┌──────────────────┐    │
//! │  │           FleetStore             │   │    Notifier      │    │
//! │  │ validators/servers/commands/     │   │   (Telegram)     │    │
//! │  │ orders, shared via Arc<RwLock>   │   └──────────────────┘    │
//! │  └──────────────────────────────────┘                           │
//! │         ▲                  ▲                                    │
//! │  ┌──────┴───────┐   ┌──────┴───────┐   ┌──────────────────┐     │
//! │  │ CommandQueue │   │ Credential   │   │   ChainExplorer  │     │
//! │  │ (agent pull) │   │    Vault     │   │  (per network)   │     │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘     │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Agents authenticate with capability tokens scoped to node server
//! names; admin routes require the configured admin token; user routes
//! trust the identity header set by the fronting platform.

pub mod alerts;
pub mod auth;
pub mod commands;
pub mod handlers;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod registry;
pub mod store;
pub mod vault;

pub use alerts::{AlertEngine, AlertOutcome, ALERT_COOLDOWN_MS, ESCALATION_THRESHOLD};
pub use commands::{CommandQueue, EnqueueOutcome, STALE_POLL_INTERVALS};
pub use handlers::{router, AppState};
pub use ingest::{AgentReport, IngestSummary, ReportIngestor, ReportKind};
pub use model::{
    Command, CommandStatus, CommandType, NodeOrder, NodeServer, OrderStatus, ServerRole,
    ServerStatus, ServiceType, Validator, ValidatorStatus,
};
pub use registry::{AssignmentStrategy, ValidatorRegistry};
pub use store::FleetStore;
pub use vault::CredentialVault;
