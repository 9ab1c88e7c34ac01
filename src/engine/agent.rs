//! Agent control loop.
//!
//! One cycle: refresh availability → evaluate every tracked bundle → craft →
//! sell → drop the profitable class. The profitable class is derived from
//! scratch every cycle; the unprofitable class persists as a negative-result
//! cache. Any error escaping a cycle is logged with the phase it came from
//! and answered with a penalty sleep, never a crash.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::availability::AvailabilityTracker;
use super::cache::ProfitabilityCache;
use super::crafter::CraftingOrchestrator;
use super::evaluator::ProfitabilityEngine;
use super::seller::SellingOrchestrator;
use crate::config::AppConfig;
use crate::platforms::{CatalogSource, MarketActions, PriceOracle};
use crate::storage::stats::StatsSink;
use crate::storage::KeyValueStore;
use crate::types::{GemsmithError, OutcomeClass};

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything the agent talks to.
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub catalog: Arc<dyn CatalogSource>,
    pub actions: Arc<dyn MarketActions>,
    /// Backing store of the profitability cache.
    pub store: Arc<dyn KeyValueStore>,
    pub stats: Arc<dyn StatsSink>,
}

/// Cycle phase, attached to errors escaping a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RefreshAvailability,
    EvaluateAll,
    Craft,
    Sell,
    ClearTransientCache,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::RefreshAvailability => "refresh availability",
            Phase::EvaluateAll => "evaluate all",
            Phase::Craft => "craft",
            Phase::Sell => "sell",
            Phase::ClearTransientCache => "clear transient cache",
        };
        write!(f, "{name}")
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tracked: usize,
    pub evaluated: usize,
    pub skipped_fresh: usize,
    pub profitable: usize,
    pub crafted: usize,
    pub craft_failures: usize,
    pub listed: usize,
    pub listing_failures: usize,
    /// Revenue booked this cycle, minor units.
    pub earned: i64,
    pub balance: i64,
}

impl CycleReport {
    pub fn log(&self, cycle: &Uuid) {
        info!(
            cycle = %cycle,
            tracked = self.tracked,
            evaluated = self.evaluated,
            skipped_fresh = self.skipped_fresh,
            profitable = self.profitable,
            crafted = self.crafted,
            craft_failures = self.craft_failures,
            listed = self.listed,
            listing_failures = self.listing_failures,
            earned = %Decimal::new(self.earned, 2),
            gems = self.balance,
            "Cycle complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    oracle: Arc<dyn PriceOracle>,
    catalog: Arc<dyn CatalogSource>,
    cache: Arc<ProfitabilityCache>,
    engine: Arc<ProfitabilityEngine>,
    tracker: AvailabilityTracker,
    crafter: CraftingOrchestrator,
    seller: SellingOrchestrator,
    cycle_sleep: Duration,
    penalty_sleep: Duration,
    clear_on_start: bool,
    reconfirm_before_craft: bool,
}

impl Agent {
    pub fn new(cfg: &AppConfig, parts: Collaborators) -> Self {
        let cache = Arc::new(ProfitabilityCache::new(
            parts.store,
            cfg.market.unprofitable_ttl(),
        ));
        let engine = Arc::new(ProfitabilityEngine::new(
            parts.oracle.clone(),
            cache.clone(),
            &cfg.market,
            &cfg.evaluation,
        ));
        let tracker = AvailabilityTracker::new(parts.catalog.clone(), cfg.market.max_craft_cost);
        let crafter =
            CraftingOrchestrator::new(parts.actions.clone(), engine.clone(), parts.stats.clone());
        let seller = SellingOrchestrator::new(
            parts.oracle.clone(),
            parts.actions,
            parts.stats,
            cfg.market.fee_rate,
        );

        Self {
            oracle: parts.oracle,
            catalog: parts.catalog,
            cache,
            engine,
            tracker,
            crafter,
            seller,
            cycle_sleep: cfg.agent.cycle_sleep(),
            penalty_sleep: cfg.agent.penalty_sleep(),
            clear_on_start: cfg.agent.clear_on_start,
            reconfirm_before_craft: cfg.evaluation.reconfirm_before_craft,
        }
    }

    pub fn cache(&self) -> &ProfitabilityCache {
        &self.cache
    }

    /// Run cycles forever. Only a failure to prepare the first cycle is
    /// returned.
    pub async fn run(&mut self) -> Result<()> {
        if self.clear_on_start {
            info!("Clearing profitable bundles, some may no longer be");
            self.cache.clear(OutcomeClass::Profitable)?;
        }
        loop {
            let pause = self.step().await;
            info!(minutes = pause.as_secs() / 60, "Sleeping");
            tokio::time::sleep(pause).await;
        }
    }

    /// One fault-isolated cycle. Returns how long to sleep before the next.
    pub async fn step(&mut self) -> Duration {
        let cycle = Uuid::new_v4();
        info!(cycle = %cycle, "Starting cycle");
        match self.run_cycle().await {
            Ok(report) => {
                report.log(&cycle);
                self.cycle_sleep
            }
            Err(e) => {
                error!(
                    cycle = %cycle,
                    error = %format!("{e:#}"),
                    penalty_secs = self.penalty_sleep.as_secs(),
                    "Cycle failed, penalty sleep"
                );
                self.penalty_sleep
            }
        }
    }

    /// A full cycle, without fault isolation.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.tracker
            .refresh()
            .await
            .context(Phase::RefreshAvailability)?;
        report.tracked = self.tracker.state().bundles.len();

        self.evaluate_all(&mut report)
            .await
            .context(Phase::EvaluateAll)?;

        self.craft(&mut report).await.context(Phase::Craft)?;
        self.sell(&mut report).await.context(Phase::Sell)?;

        info!("Clearing profitable bundles");
        self.cache
            .clear(OutcomeClass::Profitable)
            .context(Phase::ClearTransientCache)?;

        report.balance = self.tracker.state().balance;
        Ok(report)
    }

    /// Sweep every tracked bundle against the pouch bid, skipping fresh
    /// unprofitable verdicts.
    async fn evaluate_all(&mut self, report: &mut CycleReport) -> Result<()> {
        self.cache.clear(OutcomeClass::Profitable)?;

        let pouch = self.oracle.pouch_price().await?;
        let pouch_bid = pouch.buy.ok_or(GemsmithError::NoPouchQuote)?;
        let fresh = self.cache.fresh_unprofitable(Utc::now())?;

        let bundles = &self.tracker.state().bundles;
        let total = bundles.len();
        info!(total, pouch_bid, "Evaluating bundles");

        for (num, bundle) in bundles.iter().enumerate() {
            if fresh.contains(&bundle.name) {
                debug!(bundle = %bundle.name, "Unprofitable verdict still fresh");
                report.skipped_fresh += 1;
                continue;
            }
            debug!(bundle = %bundle.name, progress = %format!("{}/{}", num + 1, total), "Evaluating");
            let verdict = self.engine.evaluate(bundle, pouch_bid).await?;
            report.evaluated += 1;
            if verdict.is_profitable() {
                report.profitable += 1;
            }
        }
        Ok(())
    }

    async fn craft(&mut self, report: &mut CycleReport) -> Result<()> {
        // Availability may have moved during a long sweep.
        self.tracker.refresh_bundles().await;

        let reconfirm_at = if self.reconfirm_before_craft {
            let pouch = self.oracle.pouch_price().await?;
            Some(pouch.sell.ok_or(GemsmithError::NoPouchQuote)?)
        } else {
            None
        };

        let candidates = self.cache.profitable_by_margin()?;
        let crafts = self
            .crafter
            .craft_profitable(&mut self.tracker, &candidates, reconfirm_at)
            .await?;
        report.crafted = crafts.crafted.len();
        report.craft_failures = crafts.failed.len();
        Ok(())
    }

    async fn sell(&mut self, report: &mut CycleReport) -> Result<()> {
        let profitable = self.cache.profitable_by_margin()?;
        if profitable.is_empty() {
            info!("No profitable bundles found for selling");
            return Ok(());
        }
        let inventory = self.catalog.inventory().await?;
        let sales = self.seller.sell_inventory(&inventory, &profitable).await?;
        report.listed = sales.listed.len();
        report.listing_failures = sales.failed.len();
        report.earned = sales.earned;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
