//! peer_hub - Signaling and rendezvous hub
//!
//! Usage: peer_hub [--env dev] [--port 54321] [--master-password secret]
//!
//! Environment fallbacks: PH_PORT, PH_MASTER_PASSWORD.

use peer_hub::config::AppConfig;
use peer_hub::{gateway, logging};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

/// Port override from --port, then PH_PORT
fn get_port_override() -> anyhow::Result<Option<u16>> {
    let raw = get_arg(&["--port"]).or_else(|| std::env::var("PH_PORT").ok());
    raw.map(|p| {
        p.parse::<u16>()
            .map_err(|e| anyhow::anyhow!("invalid port {:?}: {}", p, e))
    })
    .transpose()
}

/// Secret override from --master-password, then PH_MASTER_PASSWORD
fn get_password_override() -> Option<String> {
    get_arg(&["--master-password"]).or_else(|| std::env::var("PH_MASTER_PASSWORD").ok())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load_or_default(&env)?;
    app_config.apply_overrides(get_port_override()?, get_password_override());

    let _log_guard = logging::init_logging(&app_config)?;

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting peer_hub"
    );

    let listener = gateway::bind(&app_config.hub).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}:{}: {}",
            app_config.hub.host,
            app_config.hub.port,
            e
        )
    })?;

    gateway::run_server(listener, &app_config.hub, shutdown_signal()).await?;

    tracing::info!("peer_hub stopped");
    Ok(())
}
