use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod config;
mod db;
mod directory;
mod permissions;
mod server;
mod telemetry;

use crate::config::Settings;
use crate::db::{Database, MigrationRunner};
use crate::directory::{GroupDirectory, LibSqlGroupDirectory, StaticGroupDirectory};

/// Gatekeeper permission service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init()?;

    info!("Gatekeeper starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    let db = Database::open("permissions", &settings.db)
        .await
        .context("failed to open the permissions database")?;
    let applied = MigrationRunner::permissions()
        .run(&db)
        .await
        .context("failed to migrate the permissions database")?;
    info!("Applied {} migrations", applied.len());

    let directory: Arc<dyn GroupDirectory> = match &settings.grouper.path {
        Some(path) => {
            let grouper = Database::open_local("grouper", path)
                .await
                .context("failed to open the Grouper database")?;
            info!(
                "Using Grouper directory at {} (prefix {})",
                path, settings.grouper.folder_name_prefix
            );
            Arc::new(LibSqlGroupDirectory::new(
                grouper,
                settings.grouper.folder_name_prefix.clone(),
            ))
        }
        None => {
            info!("No Grouper database configured; group lookups find no groups");
            Arc::new(StaticGroupDirectory::new())
        }
    };

    server::start(server::AppState::new(db, directory), settings.listen_addr).await?;

    Ok(())
}
