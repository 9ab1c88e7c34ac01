//! Profitability cache.
//!
//! Verdicts are kept in two classes of a `KeyValueStore`: the profitable
//! class is transient and rebuilt every cycle, the unprofitable class is a
//! negative-result cache trusted for a fixed window. A bundle lives in at
//! most one class: writing to one removes it from the other.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, Sector};
use crate::types::{OutcomeClass, ProfitabilityRecord};

pub struct ProfitabilityCache {
    store: Arc<dyn KeyValueStore>,
    unprofitable_ttl: chrono::Duration,
}

impl ProfitabilityCache {
    pub fn new(store: Arc<dyn KeyValueStore>, unprofitable_ttl: chrono::Duration) -> Self {
        Self {
            store,
            unprofitable_ttl,
        }
    }

    /// All records of a class, in store key order. Entries that fail to
    /// decode are logged and left out.
    pub fn get(&self, class: OutcomeClass) -> Result<Vec<(String, ProfitabilityRecord)>> {
        let sector = self.store.read(class.store_key())?;
        let records = sector
            .into_iter()
            .filter_map(|(name, value)| {
                match serde_json::from_value::<ProfitabilityRecord>(value) {
                    Ok(rec) => Some((name, rec)),
                    Err(e) => {
                        warn!(bundle = %name, class = %class, error = %e, "Dropping malformed cache record");
                        None
                    }
                }
            })
            .collect();
        Ok(records)
    }

    /// Record for one bundle within a class.
    pub fn lookup(&self, name: &str, class: OutcomeClass) -> Result<Option<ProfitabilityRecord>> {
        Ok(self
            .get(class)?
            .into_iter()
            .find_map(|(n, rec)| (n == name).then_some(rec)))
    }

    /// Store `record` under `class`, overwriting any previous record for the
    /// same name and removing the name from the opposite class.
    pub fn put(&self, name: &str, record: &ProfitabilityRecord, class: OutcomeClass) -> Result<()> {
        let value = serde_json::to_value(record).context("Failed to serialise profitability record")?;
        let mut partial = Sector::new();
        partial.insert(name.to_string(), value);
        self.store.write(class.store_key(), partial)?;
        self.store.remove(class.other().store_key(), name)?;
        debug!(bundle = name, class = %class, margin = record.margin, "Verdict cached");
        Ok(())
    }

    pub fn clear(&self, class: OutcomeClass) -> Result<()> {
        self.store.clear(class.store_key())
    }

    pub fn clear_all(&self) -> Result<()> {
        for class in OutcomeClass::ALL {
            self.clear(*class)?;
        }
        Ok(())
    }

    /// Names whose unprofitable verdict is still inside the staleness window
    /// at `now`. These are skipped by the evaluation sweep.
    pub fn fresh_unprofitable(&self, now: DateTime<Utc>) -> Result<HashSet<String>> {
        Ok(self
            .get(OutcomeClass::Unprofitable)?
            .into_iter()
            .filter(|(_, rec)| rec.is_fresh(now, self.unprofitable_ttl))
            .map(|(name, _)| name)
            .collect())
    }

    /// Profitable records sorted best margin first. Equal margins come out
    /// in name order, since store sectors are keyed maps.
    pub fn profitable_by_margin(&self) -> Result<Vec<(String, ProfitabilityRecord)>> {
        let mut records = self.get(OutcomeClass::Profitable)?;
        records.sort_by(|a, b| b.1.margin.cmp(&a.1.margin));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
