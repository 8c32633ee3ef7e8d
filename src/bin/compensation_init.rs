//! compensation-init: prepare a ledger database
//!
//! Creates the SQLite schema and seeds the administrator settings row from
//! configuration when none has been saved yet.
//!
//! ## Usage
//! ```text
//! compensation-init [CONFIG_PATH] [--reseed]
//! ```
//!
//! ## Configuration
//! - COMPENSATION_CONFIG: Path to a YAML config file (optional)
//! - COMPENSATION__STORAGE__SQLITE__PATH etc.: Overrides for single keys
//! - COMPENSATION_LOG: Log filter (default: info)
//!
//! `--reseed` replaces an existing settings row with the configured values.

use tracing::info;

use compensation_engine::config::Config;
use compensation_engine::storage::init_storage;
use compensation_engine::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let reseed = args.iter().any(|a| a == "--reseed");
    let path = args.iter().find(|a| !a.starts_with("--")).map(String::as_str);

    let config = Config::load(path)?;
    let stores = init_storage(&config.storage).await?;

    match stores.settings.load_settings().await? {
        Some(_) if !reseed => {
            info!("Settings row already present, leaving it untouched");
        }
        existing => {
            stores.settings.save_settings(&config.compensation).await?;
            info!(
                replaced = existing.is_some(),
                pairing_base = %config.compensation.pairing_base,
                pairing_max_level = config.compensation.pairing_max_level,
                unilevel_max_level = config.compensation.unilevel_max_level,
                maintenance_minimum = %config.compensation.maintenance_minimum,
                "Settings row written"
            );
        }
    }

    info!(storage = ?config.storage.storage_type, "compensation-init finished");
    Ok(())
}
