//! Shared types for the GEMSMITH agent.
//!
//! Prices are integers in minor currency units throughout; `Decimal` only
//! appears where a value is rounded or shown in major units.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gems in one pouch ("Sack of Gems").
pub const POUCH_SIZE: i64 = 1000;

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

/// A craftable booster pack as listed by the booster creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Game name; unique within a catalog snapshot.
    pub name: String,
    pub app_id: u32,
    /// Craft cost in gems.
    pub cost: u32,
    /// False while the booster is on cooldown for this account.
    pub craftable: bool,
    pub series: Option<u32>,
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (app {} | {} gems{})",
            self.name,
            self.app_id,
            self.cost,
            if self.craftable { "" } else { " | unavailable" },
        )
    }
}

/// Strip the marketplace suffix from an inventory or listing name so it can
/// be matched against catalog names.
pub fn normalize_bundle_name(name: &str) -> String {
    name.replace("Booster Pack", "").trim().to_string()
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// Order-book top for one item, in minor currency units.
///
/// Each side is independently optional: no sellers and no buyers are two
/// distinct, meaningful states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Lowest current sell order.
    pub sell: Option<i64>,
    /// Highest current buy order.
    pub buy: Option<i64>,
}

impl PriceQuote {
    pub fn new(sell: Option<i64>, buy: Option<i64>) -> Self {
        Self { sell, buy }
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |p| p.to_string());
        write!(f, "ask={} bid={}", side(self.sell), side(self.buy))
    }
}

// ---------------------------------------------------------------------------
// Profitability
// ---------------------------------------------------------------------------

/// Cache partition a verdict is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeClass {
    Profitable,
    Unprofitable,
}

impl OutcomeClass {
    pub const ALL: &'static [OutcomeClass] = &[OutcomeClass::Profitable, OutcomeClass::Unprofitable];

    /// Primary key in the persistent store.
    pub fn store_key(&self) -> &'static str {
        match self {
            OutcomeClass::Profitable => "GOOD_BUNDLE",
            OutcomeClass::Unprofitable => "BAD_BUNDLE",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            OutcomeClass::Profitable => OutcomeClass::Unprofitable,
            OutcomeClass::Unprofitable => OutcomeClass::Profitable,
        }
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeClass::Profitable => write!(f, "profitable"),
            OutcomeClass::Unprofitable => write!(f, "unprofitable"),
        }
    }
}

/// Last known verdict for one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityRecord {
    /// Margin per pouch in minor units. Negative sentinel for "no listings".
    pub margin: i64,
    /// Margin in major units, for reporting.
    pub profit: Decimal,
    /// Craft cost in gems at evaluation time.
    pub gems_price: u32,
    pub updated: DateTime<Utc>,
}

impl ProfitabilityRecord {
    pub fn new(margin: i64, gems_price: u32, updated: DateTime<Utc>) -> Self {
        Self {
            margin,
            profit: Decimal::new(margin, 2),
            gems_price,
            updated,
        }
    }

    /// Whether the verdict is still trusted at `now` given a TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now < self.updated + ttl
    }

    /// Per-bundle share of the pouch margin, rounded half-to-even.
    pub fn earned_per_bundle(&self) -> i64 {
        if self.gems_price == 0 {
            return 0;
        }
        let units = Decimal::from(POUCH_SIZE) / Decimal::from(self.gems_price);
        round_units(Decimal::from(self.margin) / units)
    }
}

impl fmt::Display for ProfitabilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "margin={} ({:.2}) cost={} updated={}",
            self.margin,
            self.profit,
            self.gems_price,
            self.updated.to_rfc3339(),
        )
    }
}

/// Outcome of evaluating one bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Margin above the threshold; stored in the profitable class.
    Profitable { margin: i64 },
    /// Margin at or below the threshold; stored in the unprofitable class.
    Unprofitable { margin: i64 },
    /// Nobody is selling the item; stored as unprofitable with the sentinel.
    NoListings { margin: i64 },
    /// Nobody is buying; nothing stored.
    NoBuyers,
    /// Quote lookup failed twice; nothing stored.
    LookupFailed,
}

impl Verdict {
    pub fn is_profitable(&self) -> bool {
        matches!(self, Verdict::Profitable { .. })
    }
}

/// Round to whole minor units the way the marketplace books do: half to even.
pub fn round_units(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Account & inventory
// ---------------------------------------------------------------------------

/// Snapshot of what the account can craft right now.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountState {
    /// Gem balance.
    pub balance: i64,
    /// Tracked bundles in catalog order.
    pub bundles: Vec<Bundle>,
}

impl AccountState {
    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.name == name)
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let craftable = self.bundles.iter().filter(|b| b.craftable).count();
        write!(
            f,
            "gems={} bundles={} craftable={}",
            self.balance,
            self.bundles.len(),
            craftable,
        )
    }
}

/// Location of an item in the community inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub app_id: u32,
    pub context_id: String,
    pub asset_id: String,
}

/// A marketable booster pack sitting in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Display name, e.g. "Portal 2 Booster Pack".
    pub name: String,
    pub asset: AssetRef,
}

impl InventoryItem {
    pub fn bundle_name(&self) -> String {
        normalize_bundle_name(&self.name)
    }
}

/// Result of a sell-listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingOutcome {
    pub success: bool,
    /// Raw platform response, for the error log.
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// All-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatCounter {
    /// Revenue in minor currency units.
    Earned,
    Crafted,
    Sold,
    GemsSpent,
}

impl StatCounter {
    pub const ALL: &'static [StatCounter] = &[
        StatCounter::Earned,
        StatCounter::Crafted,
        StatCounter::Sold,
        StatCounter::GemsSpent,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            StatCounter::Earned => "earned",
            StatCounter::Crafted => "crafted",
            StatCounter::Sold => "sold_bundles",
            StatCounter::GemsSpent => "gems_spend",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatCounter::Earned => "Money earned",
            StatCounter::Crafted => "Bundles crafted",
            StatCounter::Sold => "Bundles sold",
            StatCounter::GemsSpent => "Gems spent",
        }
    }
}

impl fmt::Display for StatCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for GEMSMITH.
#[derive(Debug, thiserror::Error)]
pub enum GemsmithError {
    #[error("Session expired: booster creator page has no catalog, a fresh cookie is required")]
    SessionExpired,

    #[error("No quote for the gem pouch")]
    NoPouchQuote,

    #[error("Platform error ({operation}): {message}")]
    Platform { operation: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
