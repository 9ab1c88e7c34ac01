//! All-time statistics.
//!
//! Counters only ever grow. Each counter lives under its own primary key as
//! `{ "value": n }` so the statistics file stays readable by hand.

use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{KeyValueStore, Sector};
use crate::types::StatCounter;

/// Sink for craft/sell events.
#[cfg_attr(test, mockall::automock)]
pub trait StatsSink: Send + Sync {
    /// Add `amount` to `counter`. Negative amounts are ignored.
    fn increment(&self, counter: StatCounter, amount: i64) -> Result<()>;

    /// Current value of every counter.
    fn snapshot(&self) -> Result<BTreeMap<StatCounter, i64>>;
}

/// `StatsSink` persisted in a `KeyValueStore`.
pub struct StatsStore {
    store: Arc<dyn KeyValueStore>,
}

impl StatsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn value(&self, counter: StatCounter) -> Result<i64> {
        let sector = self.store.read(counter.key())?;
        Ok(sector.get("value").and_then(Value::as_i64).unwrap_or(0))
    }
}

impl StatsSink for StatsStore {
    fn increment(&self, counter: StatCounter, amount: i64) -> Result<()> {
        if amount <= 0 {
            debug!(counter = %counter, amount, "Ignoring non-positive stats increment");
            return Ok(());
        }
        let next = self.value(counter)? + amount;
        let mut sector = Sector::new();
        sector.insert("value".to_string(), json!(next));
        self.store.write(counter.key(), sector)
    }

    fn snapshot(&self) -> Result<BTreeMap<StatCounter, i64>> {
        StatCounter::ALL
            .iter()
            .map(|c| Ok((*c, self.value(*c)?)))
            .collect()
    }
}

/// Log the all-time statistics block, revenue in major units.
pub fn log_stats(sink: &dyn StatsSink) -> Result<()> {
    let snapshot = sink.snapshot()?;
    info!("All-time statistics {}", "+".repeat(30));
    for (counter, value) in &snapshot {
        match counter {
            StatCounter::Earned => {
                info!("{}: {:.2}", counter.label(), Decimal::new(*value, 2))
            }
            _ => info!("{}: {}", counter.label(), value),
        }
    }
    info!("{}", "+".repeat(40));
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
