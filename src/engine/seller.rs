//! Selling orchestrator.
//!
//! Lists booster packs from the inventory, but only those whose bundle is in
//! this cycle's profitable set. The listing price comes from a fresh bid,
//! while revenue is booked from the cached margin.

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::platforms::{MarketActions, PriceOracle};
use crate::storage::stats::StatsSink;
use crate::types::{round_units, InventoryItem, ProfitabilityRecord, StatCounter};
use crate::SALES_TARGET;

#[derive(Debug, Clone, Default)]
pub struct SellReport {
    /// Item name and the price it was listed at.
    pub listed: Vec<(String, i64)>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Revenue booked this pass, minor units.
    pub earned: i64,
}

/// Listing price that nets `bid` after the marketplace fee.
pub fn listing_price(bid: i64, fee_rate: Decimal) -> i64 {
    let bid = Decimal::from(bid);
    round_units(bid - bid * fee_rate)
}

pub struct SellingOrchestrator {
    oracle: Arc<dyn PriceOracle>,
    actions: Arc<dyn MarketActions>,
    stats: Arc<dyn StatsSink>,
    fee_rate: Decimal,
}

impl SellingOrchestrator {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        actions: Arc<dyn MarketActions>,
        stats: Arc<dyn StatsSink>,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            oracle,
            actions,
            stats,
            fee_rate,
        }
    }

    /// List every inventory item that belongs to the profitable set.
    ///
    /// Nothing is retried within a pass; unsold items are picked up again
    /// next cycle.
    pub async fn sell_inventory(
        &self,
        inventory: &[InventoryItem],
        profitable: &[(String, ProfitabilityRecord)],
    ) -> Result<SellReport> {
        let mut report = SellReport::default();

        if profitable.is_empty() {
            info!("No profitable bundles, nothing to sell");
            return Ok(report);
        }

        let records: HashMap<&str, &ProfitabilityRecord> =
            profitable.iter().map(|(n, r)| (n.as_str(), r)).collect();

        for item in inventory {
            let name = item.bundle_name();
            let Some(record) = records.get(name.as_str()) else {
                info!(item = %item.name, "Not in the profitable set, skipping");
                report.skipped.push(item.name.clone());
                continue;
            };

            let bid = match self.oracle.quote(&name).await {
                Ok(quote) => quote.buy,
                Err(e) => {
                    warn!(item = %item.name, error = %format!("{e:#}"), "Quote lookup failed before listing");
                    None
                }
            };
            let Some(bid) = bid else {
                warn!(item = %item.name, "No fresh bid, leaving in inventory");
                report.skipped.push(item.name.clone());
                continue;
            };

            let price = listing_price(bid, self.fee_rate);
            let outcome = match self.actions.list(&item.asset, price).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(item = %item.name, price, error = %format!("{e:#}"), "Listing request failed");
                    report.failed.push(item.name.clone());
                    continue;
                }
            };

            if outcome.success {
                let earned = record.earned_per_bundle();
                info!(
                    target: SALES_TARGET,
                    item = %item.name,
                    price = %Decimal::new(bid, 2),
                    "Listed bundle"
                );
                self.stats.increment(StatCounter::Earned, earned)?;
                self.stats.increment(StatCounter::Sold, 1)?;
                report.earned += earned;
                report.listed.push((item.name.clone(), price));
            } else {
                error!(item = %item.name, price, detail = %outcome.detail, "Listing rejected");
                report.failed.push(item.name.clone());
            }
        }

        info!(
            listed = report.listed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            earned = %Decimal::new(report.earned, 2),
            "Selling pass complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
