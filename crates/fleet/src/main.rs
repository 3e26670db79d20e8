use std::net::SocketAddr;

use stakewatch_common::config::FleetConfig;
use stakewatch_fleet::handlers::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STAKEWATCH_CONFIG").ok());
    let cfg = match config_path {
        Some(path) => FleetConfig::load_from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", path, e))?,
        None => {
            tracing::warn!("no config file given, running with defaults");
            FleetConfig::default()
        }
    }
    .apply_env();

    let bind_addr: SocketAddr = cfg
        .bind_addr
        .as_deref()
        .unwrap_or("127.0.0.1:8080")
        .parse()?;

    let state = AppState::build(&cfg);
    let app = router(state);

    tracing::info!("fleet server listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
