//! Crafting orchestrator.
//!
//! Walks the profitable set best margin first and crafts whatever the
//! account can afford right now. Crafts are strictly sequential and the
//! balance is re-read from the platform after every attempt.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::availability::AvailabilityTracker;
use super::evaluator::ProfitabilityEngine;
use crate::platforms::MarketActions;
use crate::storage::stats::StatsSink;
use crate::types::{ProfitabilityRecord, StatCounter};
use crate::SALES_TARGET;

// ---------------------------------------------------------------------------
// Craft report
// ---------------------------------------------------------------------------

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not in the current catalog snapshot.
    NotTracked,
    /// On cooldown.
    Unavailable,
    /// Costs more gems than the account holds.
    InsufficientGems { cost: u32, balance: i64 },
    /// No longer profitable against the pouch ask.
    NoLongerProfitable,
}

#[derive(Debug, Clone, Default)]
pub struct CraftReport {
    pub crafted: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub gems_spent: i64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct CraftingOrchestrator {
    actions: Arc<dyn MarketActions>,
    engine: Arc<ProfitabilityEngine>,
    stats: Arc<dyn StatsSink>,
}

impl CraftingOrchestrator {
    pub fn new(
        actions: Arc<dyn MarketActions>,
        engine: Arc<ProfitabilityEngine>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            actions,
            engine,
            stats,
        }
    }

    /// Craft the profitable candidates the account can afford.
    ///
    /// `candidates` must already be sorted best margin first. When
    /// `reconfirm_at` holds a pouch price, each candidate is re-evaluated
    /// against it right before crafting.
    pub async fn craft_profitable(
        &self,
        tracker: &mut AvailabilityTracker,
        candidates: &[(String, ProfitabilityRecord)],
        reconfirm_at: Option<i64>,
    ) -> Result<CraftReport> {
        let mut report = CraftReport::default();

        if candidates.is_empty() {
            info!("No profitable bundles to craft");
            return Ok(report);
        }

        for (name, record) in candidates {
            let Some(bundle) = tracker.state().bundle(name).cloned() else {
                debug!(bundle = %name, "Not in the catalog snapshot");
                report.skipped.push((name.clone(), SkipReason::NotTracked));
                continue;
            };

            if !bundle.craftable {
                info!(bundle = %name, "Not available for crafting yet");
                report.skipped.push((name.clone(), SkipReason::Unavailable));
                continue;
            }

            let balance = tracker.state().balance;
            if i64::from(bundle.cost) > balance {
                info!(bundle = %name, cost = bundle.cost, gems = balance, "Not enough gems");
                report.skipped.push((
                    name.clone(),
                    SkipReason::InsufficientGems {
                        cost: bundle.cost,
                        balance,
                    },
                ));
                continue;
            }

            if let Some(pouch_ask) = reconfirm_at {
                let verdict = self.engine.evaluate(&bundle, pouch_ask).await?;
                if !verdict.is_profitable() {
                    info!(bundle = %name, ?verdict, "No longer profitable, skipping");
                    report
                        .skipped
                        .push((name.clone(), SkipReason::NoLongerProfitable));
                    continue;
                }
            }

            let crafted = match self.actions.craft(&bundle).await {
                Ok(ok) => ok,
                Err(e) => {
                    error!(bundle = %name, error = %format!("{e:#}"), "Craft request failed");
                    false
                }
            };

            tracker.refresh_balance().await?;

            if crafted {
                info!(
                    target: SALES_TARGET,
                    bundle = %name,
                    cost = bundle.cost,
                    profit = %record.profit,
                    "Crafted bundle, profit per 1000 gems"
                );
                self.stats.increment(StatCounter::Crafted, 1)?;
                self.stats
                    .increment(StatCounter::GemsSpent, i64::from(bundle.cost))?;
                report.gems_spent += i64::from(bundle.cost);
                report.crafted.push(name.clone());
            } else {
                warn!(bundle = %name, profit = %record.profit, "Craft failed");
                report.failed.push(name.clone());
            }
        }

        info!(
            crafted = report.crafted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            gems_spent = report.gems_spent,
            "Crafting pass complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
