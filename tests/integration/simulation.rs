//! Multi-cycle simulation harness.
//!
//! Drives the full agent against a mock Steam account and in-memory (or
//! temp-file) stores, checking what the account, the cache and the
//! statistics look like after each cycle.

use chrono::{Duration, Utc};
use std::sync::Arc;

use gemsmith::config::AppConfig;
use gemsmith::engine::agent::{Agent, Collaborators};
use gemsmith::engine::cache::ProfitabilityCache;
use gemsmith::storage::stats::{StatsSink, StatsStore};
use gemsmith::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use gemsmith::types::*;

use crate::mock_platform::MockSteam;

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.evaluation.retry_delay_ms = 0;
    cfg
}

struct Harness {
    steam: Arc<MockSteam>,
    store: Arc<dyn KeyValueStore>,
    stats: Arc<StatsStore>,
    agent: Agent,
}

impl Harness {
    fn new(steam: MockSteam) -> Self {
        Self::with_store(steam, Arc::new(MemoryStore::new()))
    }

    fn with_store(steam: MockSteam, store: Arc<dyn KeyValueStore>) -> Self {
        let steam = Arc::new(steam);
        let stats = Arc::new(StatsStore::new(Arc::new(MemoryStore::new())));
        let agent = Agent::new(
            &config(),
            Collaborators {
                oracle: steam.clone(),
                catalog: steam.clone(),
                actions: steam.clone(),
                store: store.clone(),
                stats: stats.clone(),
            },
        );
        Self {
            steam,
            store,
            stats,
            agent,
        }
    }

    fn cache(&self) -> ProfitabilityCache {
        ProfitabilityCache::new(self.store.clone(), Duration::hours(48))
    }

    fn stat(&self, counter: StatCounter) -> i64 {
        self.stats.snapshot().unwrap()[&counter]
    }
}

fn pouch() -> PriceQuote {
    PriceQuote::new(Some(1200), Some(1200))
}

#[tokio::test]
async fn test_profitable_bundle_is_crafted_and_sold() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch()).with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900))),
    );

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 1);
    assert_eq!(report.crafted, 1);
    assert_eq!(report.listed, 1);
    assert_eq!(h.steam.crafted(), vec!["Portal 2"]);
    // 900 bid less the 13% fee
    assert_eq!(
        h.steam.listings(),
        vec![("Portal 2 Booster Pack".to_string(), 783)]
    );
    assert_eq!(report.balance, 500);

    assert_eq!(h.stat(StatCounter::Crafted), 1);
    assert_eq!(h.stat(StatCounter::GemsSpent), 500);
    assert_eq!(h.stat(StatCounter::Sold), 1);
    assert_eq!(h.stat(StatCounter::Earned), 300);

    assert!(h.cache().get(OutcomeClass::Profitable).unwrap().is_empty());
}

#[tokio::test]
async fn test_crafts_best_margin_first_until_gems_run_out() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch())
            // 2 * 900 - 1200 = 600
            .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)))
            // 2.5 * 700 - 1200 = 550
            .with_bundle("Dota 2", 400, PriceQuote::new(Some(750), Some(700)))
            // 2 * 1000 - 1200 = 800
            .with_bundle("Half-Life", 500, PriceQuote::new(Some(1100), Some(1000))),
    );

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 3);
    assert_eq!(h.steam.crafted(), vec!["Half-Life", "Portal 2"]);
    assert_eq!(h.steam.balance(), 0);
    assert_eq!(h.stat(StatCounter::GemsSpent), 1000);
}

#[tokio::test]
async fn test_insufficient_gems_crafts_nothing() {
    let mut h = Harness::new(
        MockSteam::new(400, pouch()).with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900))),
    );

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 1);
    assert_eq!(report.crafted, 0);
    assert_eq!(h.steam.balance(), 400);
    assert_eq!(h.stat(StatCounter::Crafted), 0);
    assert_eq!(h.stat(StatCounter::GemsSpent), 0);
}

#[tokio::test]
async fn test_unavailable_bundle_is_evaluated_but_not_crafted() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.set_unavailable("Portal 2");
    let mut h = Harness::new(steam);

    let report = h.agent.run_cycle().await.unwrap();
    assert_eq!(report.profitable, 1);
    assert!(h.steam.crafted().is_empty());
}

#[tokio::test]
async fn test_packs_outside_profitable_set_stay_in_inventory() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch())
            .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)))
            .with_bundle("Dota 2", 500, PriceQuote::new(Some(500), Some(400)))
            .with_pack("Dota 2")
            .with_pack("Left 4 Dead"),
    );

    h.agent.run_cycle().await.unwrap();

    let listed: Vec<_> = h.steam.listings().into_iter().map(|(n, _)| n).collect();
    assert_eq!(listed, vec!["Portal 2 Booster Pack"]);
    let mut left = h.steam.inventory_names();
    left.sort();
    assert_eq!(left, vec!["Dota 2 Booster Pack", "Left 4 Dead Booster Pack"]);
}

#[tokio::test]
async fn test_nothing_listed_without_profitable_bundles() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch())
            .with_bundle("Dota 2", 500, PriceQuote::new(Some(500), Some(400)))
            .with_pack("Portal 2"),
    );

    let report = h.agent.run_cycle().await.unwrap();
    assert_eq!(report.listed, 0);
    assert!(h.steam.listings().is_empty());
}

#[tokio::test]
async fn test_no_listings_gets_sentinel_and_is_skipped_next_cycle() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch()).with_bundle("Rare", 500, PriceQuote::new(None, Some(5000))),
    );

    h.agent.run_cycle().await.unwrap();
    let rec = h
        .cache()
        .lookup("Rare", OutcomeClass::Unprofitable)
        .unwrap()
        .unwrap();
    assert_eq!(rec.margin, -1000);
    assert!(h.steam.crafted().is_empty());

    let second = h.agent.run_cycle().await.unwrap();
    assert_eq!(second.skipped_fresh, 1);
    assert_eq!(h.steam.quote_calls("Rare"), 1);
}

#[tokio::test]
async fn test_no_buyers_is_reevaluated_every_cycle() {
    let mut h = Harness::new(
        MockSteam::new(1000, pouch()).with_bundle("Quiet", 500, PriceQuote::new(Some(950), None)),
    );

    h.agent.run_cycle().await.unwrap();
    h.agent.run_cycle().await.unwrap();

    assert_eq!(h.steam.quote_calls("Quiet"), 2);
    assert!(h.cache().get(OutcomeClass::Unprofitable).unwrap().is_empty());
}

#[tokio::test]
async fn test_staleness_window_on_resweep() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Recent", 500, PriceQuote::new(Some(500), Some(400)))
        .with_bundle("Stale", 500, PriceQuote::new(Some(500), Some(400)));
    let mut h = Harness::new(steam);

    let now = Utc::now();
    let cache = h.cache();
    cache
        .put(
            "Recent",
            &ProfitabilityRecord::new(-400, 500, now - Duration::hours(47)),
            OutcomeClass::Unprofitable,
        )
        .unwrap();
    cache
        .put(
            "Stale",
            &ProfitabilityRecord::new(-400, 500, now - Duration::hours(49)),
            OutcomeClass::Unprofitable,
        )
        .unwrap();

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.skipped_fresh, 1);
    assert_eq!(report.evaluated, 1);
    assert_eq!(h.steam.quote_calls("Recent"), 0);
    assert_eq!(h.steam.quote_calls("Stale"), 1);
    let refreshed = cache.lookup("Stale", OutcomeClass::Unprofitable).unwrap().unwrap();
    assert!(refreshed.is_fresh(Utc::now(), Duration::hours(48)));
}

#[tokio::test]
async fn test_recovered_bundle_leaves_unprofitable_class() {
    let steam = MockSteam::new(0, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    let mut h = Harness::new(steam);
    h.cache()
        .put(
            "Portal 2",
            &ProfitabilityRecord::new(-400, 500, Utc::now() - Duration::hours(49)),
            OutcomeClass::Unprofitable,
        )
        .unwrap();

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 1);
    assert!(h
        .cache()
        .lookup("Portal 2", OutcomeClass::Unprofitable)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_single_lookup_failure_is_retried() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.fail_quotes("Portal 2", 1);
    let mut h = Harness::new(steam);

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 1);
    assert_eq!(h.steam.crafted(), vec!["Portal 2"]);
}

#[tokio::test]
async fn test_double_lookup_failure_abandons_bundle() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.fail_quotes("Portal 2", 2);
    let mut h = Harness::new(steam);

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.evaluated, 1);
    assert_eq!(report.profitable, 0);
    assert!(h.steam.crafted().is_empty());
    let cache = h.cache();
    assert!(cache.get(OutcomeClass::Profitable).unwrap().is_empty());
    assert!(cache.get(OutcomeClass::Unprofitable).unwrap().is_empty());
}

#[tokio::test]
async fn test_price_drop_before_craft_cancels_it() {
    // Sweep against the 1200 bid says yes; the 1700 ask says no.
    let mut h = Harness::new(
        MockSteam::new(1000, PriceQuote::new(Some(1700), Some(1200)))
            .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900))),
    );

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 1);
    assert_eq!(report.crafted, 0);
    assert!(h.steam.crafted().is_empty());
    assert_eq!(
        h.cache()
            .lookup("Portal 2", OutcomeClass::Unprofitable)
            .unwrap()
            .map(|r| r.margin),
        Some(100)
    );
}

#[tokio::test]
async fn test_expired_session_is_not_fatal() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.expire_session();
    let mut h = Harness::new(steam);

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.tracked, 0);
    assert_eq!(report.evaluated, 0);
    assert!(h.steam.crafted().is_empty());
}

#[tokio::test]
async fn test_session_expiry_on_balance_keeps_cycle_alive() {
    let steam = MockSteam::new(700, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    let mut h = Harness::new(steam);
    h.agent.run_cycle().await.unwrap();
    assert_eq!(h.steam.crafted(), vec!["Portal 2"]);

    h.steam.expire_session();
    let report = h.agent.run_cycle().await.unwrap();

    // Both lookups fail; the previous snapshot carries the cycle.
    assert_eq!(report.tracked, 1);
    assert_eq!(report.balance, 200);
    assert_eq!(h.steam.crafted(), vec!["Portal 2"]);
}

#[tokio::test]
async fn test_leftover_profitable_records_are_never_acted_on() {
    // "Ghost" is no longer offered but a failed cycle left it marked good,
    // with a pack in the inventory and a bid on the market.
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Dota 2", 500, PriceQuote::new(Some(500), Some(400)))
        .with_pack("Ghost");
    steam.set_quote("Ghost", PriceQuote::new(Some(950), Some(900)));
    let mut h = Harness::new(steam);
    h.cache()
        .put(
            "Ghost",
            &ProfitabilityRecord::new(900, 500, Utc::now() - Duration::hours(1)),
            OutcomeClass::Profitable,
        )
        .unwrap();

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.profitable, 0);
    assert_eq!(report.listed, 0);
    assert!(h.steam.crafted().is_empty());
    assert!(h.steam.listings().is_empty());
    assert_eq!(h.steam.inventory_names(), vec!["Ghost Booster Pack"]);
    assert!(h
        .cache()
        .lookup("Ghost", OutcomeClass::Profitable)
        .unwrap()
        .is_none());
    assert_eq!(h.stat(StatCounter::Sold), 0);
}

#[tokio::test]
async fn test_failed_cycle_sleeps_penalty_then_recovers() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.set_error("503 Service Unavailable");
    let mut h = Harness::new(steam);

    assert_eq!(h.agent.step().await, std::time::Duration::from_secs(300));
    assert!(h.steam.crafted().is_empty());

    h.steam.clear_error();
    assert_eq!(h.agent.step().await, std::time::Duration::from_secs(45 * 60));
    assert_eq!(h.steam.crafted(), vec!["Portal 2"]);
}

#[tokio::test]
async fn test_rejected_listing_books_nothing() {
    let steam = MockSteam::new(1000, pouch())
        .with_bundle("Portal 2", 500, PriceQuote::new(Some(950), Some(900)));
    steam.reject_listings();
    let mut h = Harness::new(steam);

    let report = h.agent.run_cycle().await.unwrap();

    assert_eq!(report.crafted, 1);
    assert_eq!(report.listing_failures, 1);
    assert_eq!(h.stat(StatCounter::Sold), 0);
    assert_eq!(h.stat(StatCounter::Earned), 0);
    assert_eq!(h.steam.inventory_names(), vec!["Portal 2 Booster Pack"]);
}

#[tokio::test]
async fn test_negative_cache_survives_restart() {
    let dir = std::env::temp_dir().join(format!("gemsmith_sim_{}", uuid::Uuid::new_v4()));
    let path = dir.join("profitability.json");

    let build = || {
        MockSteam::new(1000, pouch()).with_bundle("Dota 2", 500, PriceQuote::new(Some(500), Some(400)))
    };

    let mut first = Harness::with_store(build(), Arc::new(JsonFileStore::open(&path).unwrap()));
    first.agent.run_cycle().await.unwrap();
    assert_eq!(first.steam.quote_calls("Dota 2"), 1);

    let mut second = Harness::with_store(build(), Arc::new(JsonFileStore::open(&path).unwrap()));
    let report = second.agent.run_cycle().await.unwrap();
    assert_eq!(report.skipped_fresh, 1);
    assert_eq!(second.steam.quote_calls("Dota 2"), 0);

    let _ = std::fs::remove_dir_all(&dir);
}
