//! Mock Steam account for integration testing.
//!
//! Implements all three platform traits over one in-memory account:
//! crafting spends gems and drops a booster pack into the inventory,
//! listing takes it out again. Quotes, balance and failures are fully
//! controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gemsmith::platforms::{CatalogSource, MarketActions, PriceOracle};
use gemsmith::types::*;

#[derive(Default)]
struct State {
    bundles: Vec<Bundle>,
    balance: i64,
    pouch: PriceQuote,
    quotes: HashMap<String, PriceQuote>,
    inventory: Vec<InventoryItem>,
    next_asset: u64,
    crafted: Vec<String>,
    listings: Vec<(String, i64)>,
    quote_calls: HashMap<String, usize>,
    /// Remaining forced failures per bundle quote.
    failing_quotes: HashMap<String, usize>,
    session_expired: bool,
    reject_listings: bool,
}

/// A deterministic Steam account.
pub struct MockSteam {
    state: Arc<Mutex<State>>,
    /// If set, balance lookups fail with this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockSteam {
    pub fn new(balance: i64, pouch: PriceQuote) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                balance,
                pouch,
                next_asset: 1000,
                ..State::default()
            })),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Offer a bundle in the booster creator, quoted at `quote`.
    pub fn with_bundle(self, name: &str, cost: u32, quote: PriceQuote) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            let app_id = 1000 + s.bundles.len() as u32;
            s.bundles.push(Bundle {
                name: name.to_string(),
                app_id,
                cost,
                craftable: true,
                series: Some(1),
            });
            s.quotes.insert(name.to_string(), quote);
        }
        self
    }

    /// Put a booster pack in the inventory without crafting it.
    pub fn with_pack(self, name: &str) -> Self {
        self.add_pack(name);
        self
    }

    pub fn set_quote(&self, name: &str, quote: PriceQuote) {
        self.state.lock().unwrap().quotes.insert(name.to_string(), quote);
    }

    pub fn set_unavailable(&self, name: &str) {
        let mut s = self.state.lock().unwrap();
        if let Some(b) = s.bundles.iter_mut().find(|b| b.name == name) {
            b.craftable = false;
        }
    }

    /// Fail the next `times` quote lookups for `name`.
    pub fn fail_quotes(&self, name: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_quotes
            .insert(name.to_string(), times);
    }

    pub fn expire_session(&self) {
        self.state.lock().unwrap().session_expired = true;
    }

    pub fn reject_listings(&self) {
        self.state.lock().unwrap().reject_listings = true;
    }

    /// Force balance lookups to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn balance(&self) -> i64 {
        self.state.lock().unwrap().balance
    }

    pub fn crafted(&self) -> Vec<String> {
        self.state.lock().unwrap().crafted.clone()
    }

    /// Listed item names with their listing price.
    pub fn listings(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().listings.clone()
    }

    pub fn quote_calls(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .quote_calls
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn inventory_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .inventory
            .iter()
            .map(|i| i.name.clone())
            .collect()
    }

    fn add_pack(&self, name: &str) {
        let mut s = self.state.lock().unwrap();
        s.next_asset += 1;
        let asset_id = s.next_asset.to_string();
        s.inventory.push(InventoryItem {
            name: format!("{name} Booster Pack"),
            asset: AssetRef {
                app_id: 753,
                context_id: "6".to_string(),
                asset_id,
            },
        });
    }
}

#[async_trait]
impl PriceOracle for MockSteam {
    async fn quote(&self, bundle_name: &str) -> Result<PriceQuote> {
        let mut s = self.state.lock().unwrap();
        *s.quote_calls.entry(bundle_name.to_string()).or_default() += 1;
        if let Some(left) = s.failing_quotes.get_mut(bundle_name) {
            if *left > 0 {
                *left -= 1;
                return Err(anyhow!("connection reset by peer"));
            }
        }
        Ok(s.quotes.get(bundle_name).copied().unwrap_or_default())
    }

    async fn pouch_price(&self) -> Result<PriceQuote> {
        Ok(self.state.lock().unwrap().pouch)
    }
}

#[async_trait]
impl CatalogSource for MockSteam {
    async fn craftable_bundles(&self) -> Result<Vec<Bundle>> {
        let s = self.state.lock().unwrap();
        if s.session_expired {
            return Err(GemsmithError::SessionExpired.into());
        }
        Ok(s.bundles.clone())
    }

    async fn account_balance(&self) -> Result<i64> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        let s = self.state.lock().unwrap();
        // Catalog and balance come from the same page.
        if s.session_expired {
            return Err(GemsmithError::SessionExpired.into());
        }
        Ok(s.balance)
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>> {
        Ok(self.state.lock().unwrap().inventory.clone())
    }
}

#[async_trait]
impl MarketActions for MockSteam {
    async fn craft(&self, bundle: &Bundle) -> Result<bool> {
        {
            let mut s = self.state.lock().unwrap();
            let cost = i64::from(bundle.cost);
            if s.session_expired || cost > s.balance {
                return Ok(false);
            }
            s.balance -= cost;
            s.crafted.push(bundle.name.clone());
        }
        self.add_pack(&bundle.name);
        Ok(true)
    }

    async fn list(&self, asset: &AssetRef, price: i64) -> Result<ListingOutcome> {
        let mut s = self.state.lock().unwrap();
        if s.reject_listings {
            return Ok(ListingOutcome {
                success: false,
                detail: r#"{"success":false,"message":"The item specified is no longer in your inventory"}"#
                    .to_string(),
            });
        }
        let Some(pos) = s.inventory.iter().position(|i| i.asset.asset_id == asset.asset_id) else {
            return Err(anyhow!("unknown asset {}", asset.asset_id));
        };
        let item = s.inventory.remove(pos);
        s.listings.push((item.name, price));
        Ok(ListingOutcome {
            success: true,
            detail: r#"{"success":true}"#.to_string(),
        })
    }
}
