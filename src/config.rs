//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The Steam session cookie is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub steam: SteamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Sleep between two successful cycles.
    pub cycle_sleep_mins: u64,
    /// Penalty sleep after a cycle fails.
    pub penalty_sleep_secs: u64,
    /// Drop the profitable class before the first cycle.
    pub clear_on_start: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "GEMSMITH-001".to_string(),
            cycle_sleep_mins: 45,
            penalty_sleep_secs: 300,
            clear_on_start: true,
        }
    }
}

impl AgentConfig {
    pub fn cycle_sleep(&self) -> Duration {
        Duration::from_secs(self.cycle_sleep_mins * 60)
    }

    pub fn penalty_sleep(&self) -> Duration {
        Duration::from_secs(self.penalty_sleep_secs)
    }
}

/// Marketplace economics. All prices are in minor currency units.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    /// A bundle is profitable only when its margin per pouch is strictly
    /// above this value.
    pub min_margin: i64,
    /// Marketplace take on every sale (0.13 = 13%).
    pub fee_rate: Decimal,
    /// Bundles costing this many gems or more are never tracked.
    pub max_craft_cost: u32,
    /// How long an unprofitable verdict is trusted.
    pub unprofitable_ttl_hours: i64,
    /// Margin recorded for bundles nobody is selling.
    pub no_listing_margin: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            min_margin: 300,
            fee_rate: dec!(0.13),
            max_craft_cost: 700,
            unprofitable_ttl_hours: 48,
            no_listing_margin: -1000,
        }
    }
}

impl MarketConfig {
    pub fn unprofitable_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.unprofitable_ttl_hours)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Fixed delay before the single retry of a failed quote lookup.
    pub retry_delay_ms: u64,
    /// Re-run the evaluation against the pouch ask right before crafting.
    pub reconfirm_before_craft: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1500,
            reconfirm_before_craft: true,
        }
    }
}

impl EvaluationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SteamConfig {
    /// Name of the env var holding the raw `Cookie` header value.
    pub cookies_env: String,
    pub country: String,
    pub language: String,
    /// Steam wallet currency code (5 = RUB).
    pub currency: u32,
    /// `item_nameid` of the "Sack of Gems" market listing.
    pub pouch_item_nameid: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            cookies_env: "STEAM_COOKIES".to_string(),
            country: "RU".to_string(),
            language: "russian".to_string(),
            currency: 5,
            pouch_item_nameid: 26463978,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("db") }
    }
}

impl StorageConfig {
    pub fn profitability_path(&self) -> PathBuf {
        self.dir.join("profitability.json")
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.dir.join("statistics.json")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub errors_file: PathBuf,
    pub sales_file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            errors_file: PathBuf::from("errors_log.txt"),
            sales_file: PathBuf::from("successful_sells.txt"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.steam.min_delay_ms > config.steam.max_delay_ms {
            anyhow::bail!(
                "steam.min_delay_ms ({}) exceeds steam.max_delay_ms ({})",
                config.steam.min_delay_ms,
                config.steam.max_delay_ms
            );
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
