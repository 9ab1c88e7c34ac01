//! Persistence layer.
//!
//! A small key-value store: each primary key holds a JSON object whose
//! fields are merge-updated on write. Every operation is its own
//! transaction (open, operate, close); there is no cross-operation locking
//! because the agent is the only writer.

pub mod stats;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::types::GemsmithError;

/// One primary key's fields.
pub type Sector = Map<String, Value>;

/// Durable mapping of primary key → field map.
pub trait KeyValueStore: Send + Sync {
    /// All fields stored under `key` (empty if the key is unknown).
    fn read(&self, key: &str) -> Result<Sector>;

    /// Merge `partial` into the fields under `key`, overwriting same-named fields.
    fn write(&self, key: &str, partial: Sector) -> Result<()>;

    /// Remove one field from `key`. Missing fields are not an error.
    fn remove(&self, key: &str, field: &str) -> Result<()>;

    /// Empty the fields under `key`.
    fn clear(&self, key: &str) -> Result<()>;

    /// Drop every key.
    fn clear_all(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Store backed by a single pretty-printed JSON document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open (or lazily create) a store at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
            }
        }
        Ok(Self { path })
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store {}", self.path.display()))?;
        if json.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse store {}", self.path.display()))
    }

    fn save(&self, doc: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(doc).context("Failed to serialise store")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write store {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace store {}", self.path.display()))?;
        debug!(path = %self.path.display(), keys = doc.len(), "Store saved");
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut doc = self.load()?;
        f(&mut doc);
        self.save(&doc)
    }
}

impl KeyValueStore for JsonFileStore {
    fn read(&self, key: &str) -> Result<Sector> {
        let doc = self.load()?;
        match doc.get(key) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(Sector::new()),
        }
    }

    fn write(&self, key: &str, partial: Sector) -> Result<()> {
        self.update(|doc| {
            let mut sector = match doc.remove(key) {
                Some(Value::Object(map)) => map,
                _ => Sector::new(),
            };
            sector.extend(partial);
            doc.insert(key.to_string(), Value::Object(sector));
        })
    }

    fn remove(&self, key: &str, field: &str) -> Result<()> {
        let mut doc = self.load()?;
        let removed = match doc.get_mut(key) {
            Some(Value::Object(map)) => map.remove(field).is_some(),
            _ => false,
        };
        if removed {
            self.save(&doc)?;
        }
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.update(|doc| {
            doc.insert(key.to_string(), Value::Object(Map::new()));
        })
    }

    fn clear_all(&self) -> Result<()> {
        self.save(&Map::new())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Sector>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, Sector>) -> T) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| GemsmithError::Storage("memory store lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Sector> {
        self.with(|m| m.get(key).cloned().unwrap_or_default())
    }

    fn write(&self, key: &str, partial: Sector) -> Result<()> {
        self.with(|m| m.entry(key.to_string()).or_default().extend(partial))
    }

    fn remove(&self, key: &str, field: &str) -> Result<()> {
        self.with(|m| {
            if let Some(sector) = m.get_mut(key) {
                sector.remove(field);
            }
        })
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.with(|m| {
            m.insert(key.to_string(), Sector::new());
        })
    }

    fn clear_all(&self) -> Result<()> {
        self.with(|m| m.clear())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
