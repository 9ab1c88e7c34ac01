//! Profitability engine.
//!
//! Turns a live quote into a verdict: how much a pouch of gems is worth when
//! converted into this bundle and sold into the best bid, compared to what
//! the pouch itself costs. Each fully evaluated bundle produces exactly one
//! cache write; skipped or failed lookups produce none.

use anyhow::{bail, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::ProfitabilityCache;
use crate::config::{EvaluationConfig, MarketConfig};
use crate::platforms::PriceOracle;
use crate::types::{round_units, Bundle, OutcomeClass, PriceQuote, ProfitabilityRecord, Verdict, POUCH_SIZE};

/// Retries after the first failed quote lookup.
const MAX_RETRIES: usize = 1;

/// Margin of one pouch of gems spent on `cost`-gem bundles sold at
/// `buy_price`, against a pouch bought at `pouch_price`.
///
/// `None` for a zero cost.
pub fn margin_per_pouch(cost: u32, buy_price: i64, pouch_price: i64) -> Option<i64> {
    let units_per_pouch = Decimal::from(POUCH_SIZE).checked_div(Decimal::from(cost))?;
    let income_per_pouch = round_units(units_per_pouch * Decimal::from(buy_price));
    Some(income_per_pouch - pouch_price)
}

pub struct ProfitabilityEngine {
    oracle: Arc<dyn PriceOracle>,
    cache: Arc<ProfitabilityCache>,
    min_margin: i64,
    no_listing_margin: i64,
    retry_delay: Duration,
}

impl ProfitabilityEngine {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        cache: Arc<ProfitabilityCache>,
        market: &MarketConfig,
        evaluation: &EvaluationConfig,
    ) -> Self {
        Self {
            oracle,
            cache,
            min_margin: market.min_margin,
            no_listing_margin: market.no_listing_margin,
            retry_delay: evaluation.retry_delay(),
        }
    }

    /// Evaluate one bundle against a pouch price and cache the verdict.
    ///
    /// Lookup failures are absorbed (one retry, then `LookupFailed`); only
    /// cache write failures are returned as errors.
    pub async fn evaluate(&self, bundle: &Bundle, pouch_price: i64) -> Result<Verdict> {
        if bundle.cost == 0 {
            bail!("Bundle {} has a zero craft cost", bundle.name);
        }

        let Some(quote) = self.fetch_quote(bundle).await else {
            return Ok(Verdict::LookupFailed);
        };

        if quote.sell.is_none() {
            debug!(bundle = %bundle.name, "Nobody is selling, marking unprofitable");
            self.persist(bundle, self.no_listing_margin, OutcomeClass::Unprofitable)?;
            return Ok(Verdict::NoListings {
                margin: self.no_listing_margin,
            });
        }

        let Some(bid) = quote.buy else {
            debug!(bundle = %bundle.name, "No buy orders, leaving unevaluated");
            return Ok(Verdict::NoBuyers);
        };

        let Some(margin) = margin_per_pouch(bundle.cost, bid, pouch_price) else {
            bail!("Bundle {} has a zero craft cost", bundle.name);
        };

        if margin > self.min_margin {
            info!(
                bundle = %bundle.name,
                margin,
                profit = %Decimal::new(margin, 2),
                "GOOD BUNDLE"
            );
            self.persist(bundle, margin, OutcomeClass::Profitable)?;
            Ok(Verdict::Profitable { margin })
        } else {
            debug!(bundle = %bundle.name, margin, "Below minimal margin");
            self.persist(bundle, margin, OutcomeClass::Unprofitable)?;
            Ok(Verdict::Unprofitable { margin })
        }
    }

    /// Quote lookup with a bounded retry. `None` once every attempt failed.
    async fn fetch_quote(&self, bundle: &Bundle) -> Option<PriceQuote> {
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
                info!(bundle = %bundle.name, attempt, "Retrying quote lookup");
            }
            match self.oracle.quote(&bundle.name).await {
                Ok(quote) => return Some(quote),
                Err(e) => warn!(
                    bundle = %bundle.name,
                    attempt,
                    error = %format!("{e:#}"),
                    "Quote lookup failed"
                ),
            }
        }
        warn!(bundle = %bundle.name, "Giving up on bundle for this cycle");
        None
    }

    fn persist(&self, bundle: &Bundle, margin: i64, class: OutcomeClass) -> Result<()> {
        let record = ProfitabilityRecord::new(margin, bundle.cost, Utc::now());
        self.cache.put(&bundle.name, &record, class)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
