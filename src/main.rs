//! GEMSMITH: Steam booster pack crafting arbitrage agent
//!
//! Entry point. Loads configuration, initialises the three log channels,
//! reports all-time statistics and settings, then runs the
//! evaluate→craft→sell loop until Ctrl+C.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use gemsmith::config::{self, AppConfig};
use gemsmith::engine::agent::{Agent, Collaborators};
use gemsmith::platforms::steam::SteamClient;
use gemsmith::storage::stats::{log_stats, StatsStore};
use gemsmith::storage::JsonFileStore;
use gemsmith::SALES_TARGET;

const BANNER: &str = r#"
  ____ _____ __  __ ____  __  __ ___ _____ _   _
 / ___| ____|  \/  / ___||  \/  |_ _|_   _| | | |
| |  _|  _| | |\/| \___ \| |\/| || |  | | | |_| |
| |_| | |___| |  | |___) | |  | || |  | | |  _  |
 \____|_____|_|  |_|____/|_|  |_|___| |_| |_| |_|

  Booster pack crafting arbitrage
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("GEMSMITH_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg.logging)?;

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_sleep_mins = cfg.agent.cycle_sleep_mins,
        storage = %cfg.storage.dir.display(),
        "GEMSMITH starting up"
    );

    // -- Stores ------------------------------------------------------------

    let stats = Arc::new(StatsStore::new(Arc::new(JsonFileStore::open(
        cfg.storage.statistics_path(),
    )?)));
    let profitability = Arc::new(JsonFileStore::open(cfg.storage.profitability_path())?);

    log_stats(stats.as_ref())?;
    log_settings(&cfg);

    // -- Steam session -------------------------------------------------------

    let cookies = SecretString::new(AppConfig::resolve_env(&cfg.steam.cookies_env)?);
    let steam = Arc::new(SteamClient::new(&cfg.steam, cookies)?);

    let mut agent = Agent::new(
        &cfg,
        Collaborators {
            oracle: steam.clone(),
            catalog: steam.clone(),
            actions: steam,
            store: profitability,
            stats,
        },
    );

    // -- Main loop -----------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");
    tokio::select! {
        result = agent.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received."),
    }

    info!("GEMSMITH shut down cleanly.");
    Ok(())
}

/// Log the active settings block.
fn log_settings(cfg: &config::AppConfig) {
    info!("Settings {}", "+".repeat(30));
    info!(
        min_margin = %Decimal::new(cfg.market.min_margin, 2),
        max_craft_cost = cfg.market.max_craft_cost,
        fee_rate = %cfg.market.fee_rate,
        unprofitable_ttl_hours = cfg.market.unprofitable_ttl_hours,
        reconfirm_before_craft = cfg.evaluation.reconfirm_before_craft,
        "Looking for bundles with a minimal margin per pouch"
    );
    info!("{}", "+".repeat(40));
}

/// Initialise the `tracing` subscriber: stdout, errors file, sales file.
fn init_logging(cfg: &config::LoggingConfig) -> Result<()> {
    use tracing::Level;
    use tracing_subscriber::{filter, fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gemsmith=info,{SALES_TARGET}=info")));

    let json_logging = std::env::var("GEMSMITH_LOG_JSON").is_ok();

    let stdout = if json_logging {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let errors = fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(append(&cfg.errors_file)?))
        .with_filter(filter::LevelFilter::ERROR);

    let sales = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Arc::new(append(&cfg.sales_file)?))
        .with_filter(filter::Targets::new().with_target(SALES_TARGET, Level::INFO));

    tracing_subscriber::registry()
        .with(stdout.with_filter(env_filter))
        .with(errors)
        .with(sales)
        .init();
    Ok(())
}

fn append(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}
