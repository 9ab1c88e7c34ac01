//! Availability tracker.
//!
//! Holds the account snapshot the rest of the cycle works from: which
//! bundles are cheap enough to track, which of them can be crafted right
//! now, and the gem balance. Catalog failures never propagate; the previous
//! snapshot is kept and the error logged, so an expired session degrades to
//! a cycle that does nothing instead of a crash.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::platforms::CatalogSource;
use crate::types::{AccountState, Bundle, GemsmithError};

pub struct AvailabilityTracker {
    catalog: Arc<dyn CatalogSource>,
    max_craft_cost: u32,
    state: AccountState,
}

impl AvailabilityTracker {
    pub fn new(catalog: Arc<dyn CatalogSource>, max_craft_cost: u32) -> Self {
        Self {
            catalog,
            max_craft_cost,
            state: AccountState::default(),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> &AccountState {
        &self.state
    }

    /// Re-derive the bundle snapshot and the balance from the platform.
    ///
    /// Catalog problems are logged and leave the bundle list unchanged. An
    /// expired session keeps the previous balance as well; any other balance
    /// failure fails the call.
    pub async fn refresh(&mut self) -> Result<&AccountState> {
        self.refresh_bundles().await;
        if let Err(e) = self.refresh_balance().await {
            if !matches!(e.downcast_ref::<GemsmithError>(), Some(GemsmithError::SessionExpired)) {
                return Err(e);
            }
            error!(
                error = %e,
                balance = self.state.balance,
                "Session seems expired, keeping previous balance"
            );
        }
        Ok(&self.state)
    }

    /// Re-fetch the bundle catalog, keeping only bundles under the cost
    /// ceiling.
    pub async fn refresh_bundles(&mut self) {
        match self.catalog.craftable_bundles().await {
            Ok(all) => {
                let total = all.len();
                self.state.bundles = self.within_ceiling(all);
                debug!(
                    total,
                    tracked = self.state.bundles.len(),
                    ceiling = self.max_craft_cost,
                    "Catalog refreshed"
                );
            }
            Err(e) => match e.downcast_ref::<GemsmithError>() {
                Some(GemsmithError::SessionExpired) => {
                    error!(error = %e, "Session seems expired, a new cookie is needed")
                }
                _ => error!(error = %format!("{e:#}"), "Catalog refresh failed, keeping previous snapshot"),
            },
        }
    }

    /// Authoritative balance refresh.
    pub async fn refresh_balance(&mut self) -> Result<i64> {
        let balance = self.catalog.account_balance().await?;
        self.state.balance = balance;
        info!(gems = balance, "Gems available");
        Ok(balance)
    }

    fn within_ceiling(&self, bundles: Vec<Bundle>) -> Vec<Bundle> {
        bundles
            .into_iter()
            .filter(|b| b.cost > 0 && b.cost < self.max_craft_cost)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
