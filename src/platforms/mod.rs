//! Platform integrations.
//!
//! Defines the collaborator traits the engine talks to and provides the
//! Steam Community implementation:
//! - `PriceOracle`: order-book quotes for bundles and the gem pouch
//! - `CatalogSource`: booster creator catalog, gem balance, inventory
//! - `MarketActions`: crafting and sell listings
//!
//! Implementations own their own rate limiting; callers never sleep between
//! calls.

pub mod steam;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AssetRef, Bundle, InventoryItem, ListingOutcome, PriceQuote};

/// Source of live marketplace prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Quote for a bundle's booster pack. An item nobody lists or bids on
    /// returns an empty quote, not an error; errors mean the lookup itself
    /// failed.
    async fn quote(&self, bundle_name: &str) -> Result<PriceQuote>;

    /// Quote for a pouch of gems.
    async fn pouch_price(&self) -> Result<PriceQuote>;
}

/// Read-side view of the account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every bundle the booster creator offers, in page order.
    async fn craftable_bundles(&self) -> Result<Vec<Bundle>>;

    /// Current gem balance.
    async fn account_balance(&self) -> Result<i64>;

    /// Marketable booster packs in the inventory.
    async fn inventory(&self) -> Result<Vec<InventoryItem>>;
}

/// Write-side actions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketActions: Send + Sync {
    /// Craft one booster pack. `Ok(false)` means the platform refused.
    async fn craft(&self, bundle: &Bundle) -> Result<bool>;

    /// List an inventory item for sale at `price` (what the seller receives).
    async fn list(&self, asset: &AssetRef, price: i64) -> Result<ListingOutcome>;
}
