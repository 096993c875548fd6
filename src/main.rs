use std::sync::Arc;

use tracing::{error, info, warn};

use stowage::{Config, Database, FileService};

#[tokio::main]
async fn main() {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    // Initialize logging
    if let Err(e) = stowage::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        stowage::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> stowage::Result<()> {
    config.validate()?;

    info!("Stowage - personal cloud-storage engine");
    info!("Storage root: {}", config.storage.root);

    tokio::fs::create_dir_all(&config.storage.root).await?;
    let db = Arc::new(Database::open(&config.database.path).await?);
    let service = FileService::from_config(db, &config);

    for owner_id in service.owners_with_pending_moves().await? {
        let report = service.reconcile(owner_id).await?;
        if !report.is_clean() {
            warn!(
                "Owner {} has {} unresolved moves: {:?}",
                owner_id,
                report.unresolved.len(),
                report.unresolved
            );
        }
    }

    let accounts = service.db().pool();
    let count = stowage::AccountRepository::new(accounts).list_all().await?.len();
    info!("Storage engine ready ({} accounts)", count);
    Ok(())
}
