//! kAIron action server binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Open the SQLite database and the key vault
//! 3. Build the action executor with every handler registered
//! 4. Start the schedule runner in the background
//! 5. Serve the webhook API until Ctrl-C

mod cli;
mod seed;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use kairon_action::{ActionExecutor, Scheduler, Services};
use kairon_api::{create_router, AppState};
use kairon_core::{KaironConfig, KaironError};
use kairon_storage::{vault, Database, KeyVault};

use cli::{CliArgs, Command};

const SCHEDULER_POLL_SECS: u64 = 30;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if let Some(rest) = data_dir.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(data_dir)
    }
}

/// KAIRON_VAULT_KEY env var > `vault.master_key`. `None` disables the vault.
fn open_vault(db: &Arc<Database>, config: &KaironConfig) -> Result<Option<KeyVault>, KaironError> {
    let key = std::env::var("KAIRON_VAULT_KEY")
        .ok()
        .or_else(|| config.vault.master_key.clone());
    match key {
        Some(key) => Ok(Some(KeyVault::from_hex(Arc::clone(db), &key)?)),
        None => {
            tracing::warn!("No vault master key configured; key_vault parameters will fail");
            Ok(None)
        }
    }
}

fn open_services(config: KaironConfig) -> Result<Services, KaironError> {
    let data_dir = resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join(&config.storage.database_file);
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let vault = open_vault(&db, &config)?;
    Services::new(config, db, vault)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn serve(args: &CliArgs, services: Services) -> Result<(), Box<dyn std::error::Error>> {
    let host = services.config.server.host.clone();
    let port = args.resolve_port(services.config.server.port);

    let executor = Arc::new(ActionExecutor::with_defaults(Arc::new(services)));
    tracing::info!(handlers = executor.registry().types().len(), "Action executor ready");

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&executor),
        Duration::from_secs(SCHEDULER_POLL_SECS),
    ));
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    let router = create_router(AppState::new(executor));
    let addr = format!("{}:{}", host, port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind - is another instance running?");
            tracing::error!("Try: kairon --port {}", port.wrapping_add(1));
            return Err(e.into());
        }
    };
    tracing::info!(addr = %addr, "Action server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    let _ = scheduler_task.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing starts so its log level can apply.
    let config_file = args.resolve_config_path();
    let loaded = KaironConfig::load(&config_file);
    let level = args
        .resolve_log_level()
        .or_else(|| loaded.as_ref().ok().map(|c| c.general.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting kAIron action server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(config) => {
            tracing::info!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Using default configuration");
            KaironConfig::default()
        }
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    match args.command() {
        Command::GenerateKey => {
            let key = vault::generate_key()?;
            println!("{}", key.iter().map(|b| format!("{b:02x}")).collect::<String>());
            Ok(())
        }
        Command::Load { file } => {
            let services = open_services(config)?;
            let summary = seed::load_file(&file, &services)?;
            println!(
                "Imported {} actions, {} bot settings, {} secrets",
                summary.actions, summary.settings, summary.secrets
            );
            Ok(())
        }
        Command::Serve => {
            let services = open_services(config)?;
            serve(&args, services).await
        }
    }
}
