//! Smart City Assistant shell
//!
//! Reads one JSON-RPC request per line on stdin and writes one response per
//! line on stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::BufReader;

use smart_city::commands::{self, ShellSession};
use smart_city::config::AssistantConfig;
use smart_city::globals;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("smart_city=info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AssistantConfig::load(config_path.as_deref())?;
    log::info!(
        "Smart City Assistant starting (provider: {}, model: {})",
        config.provider,
        config.model_id
    );

    let mut shell = ShellSession::new(config);
    let mut stdout = tokio::io::stdout();
    let served = commands::serve(&mut shell, BufReader::new(tokio::io::stdin()), &mut stdout).await;

    match &served {
        Ok(()) => log::info!("stdin closed, shutting down"),
        Err(e) => log::error!("Shell I/O failed: {}", e),
    }
    globals::shutdown_shared_gateway().await;
    Ok(served?)
}
