//! Manifest and baseline persistence contracts
//!
//! Stores are loaded once per pass into immutable snapshots and written back
//! one subsystem at a time. A section that fails to parse is kept in the
//! snapshot as an error so only that subsystem fails.

use crate::error::{Error, Result};
use crate::types::{ItemSet, SubsystemId, SubsystemTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Declared state as loaded at pass start
#[derive(Debug, Clone, Default)]
pub struct ManifestSnapshot {
    sections: BTreeMap<SubsystemId, std::result::Result<ItemSet, String>>,
}

impl ManifestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SubsystemId, items: ItemSet) {
        self.sections.insert(id, Ok(items));
    }

    /// Record a section that could not be parsed
    pub fn insert_corrupt(&mut self, id: SubsystemId, message: impl Into<String>) {
        self.sections.insert(id, Err(message.into()));
    }

    /// Declared items of a subsystem; an absent section is an empty set
    pub fn items(&self, id: &SubsystemId) -> Result<ItemSet> {
        match self.sections.get(id) {
            None => Ok(ItemSet::new()),
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(message)) => Err(Error::ManifestCorrupt {
                subsystem: Some(id.clone()),
                message: message.clone(),
            }),
        }
    }

    pub fn contains(&self, id: &SubsystemId) -> bool {
        self.sections.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &SubsystemId> {
        self.sections.keys()
    }
}

/// Last confirmed-reconciled state of one subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub subsystem: SubsystemId,
    pub tier: SubsystemTier,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub items: ItemSet,
}

impl BaselineRecord {
    pub fn new(subsystem: SubsystemId, tier: SubsystemTier, items: ItemSet) -> Self {
        Self {
            subsystem,
            tier,
            recorded_at: Utc::now(),
            items,
        }
    }
}

/// Baselines as loaded at pass start
#[derive(Debug, Clone, Default)]
pub struct BaselineSnapshot {
    records: BTreeMap<SubsystemId, std::result::Result<BaselineRecord, String>>,
}

impl BaselineSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: BaselineRecord) {
        self.records.insert(record.subsystem.clone(), Ok(record));
    }

    pub fn insert_corrupt(&mut self, id: SubsystemId, message: impl Into<String>) {
        self.records.insert(id, Err(message.into()));
    }

    /// Raw record, without the tier check
    pub fn record(&self, id: &SubsystemId) -> Option<&BaselineRecord> {
        self.records.get(id).and_then(|r| r.as_ref().ok())
    }

    /// Baselined items of a subsystem registered with `tier`.
    ///
    /// `None` when the subsystem was never baselined. A record written under
    /// another tier is corrupt: tier never changes after registration.
    pub fn items(&self, id: &SubsystemId, tier: SubsystemTier) -> Result<Option<ItemSet>> {
        match self.records.get(id) {
            None => Ok(None),
            Some(Err(message)) => Err(Error::BaselineCorrupt {
                subsystem: id.clone(),
                message: message.clone(),
            }),
            Some(Ok(record)) if record.tier != tier => Err(Error::BaselineCorrupt {
                subsystem: id.clone(),
                message: format!(
                    "recorded as {} but registered as {}",
                    record.tier, tier
                ),
            }),
            Some(Ok(record)) => Ok(Some(record.items.clone())),
        }
    }
}

/// Persistence for declared state
pub trait ManifestStore: Send + Sync {
    /// Read the whole manifest. Fails only when the document as a whole is
    /// unreadable; per-section problems land in the snapshot.
    fn load(&self) -> Result<ManifestSnapshot>;

    /// Replace one subsystem's section, atomically
    fn write_subsystem(&self, id: &SubsystemId, items: &ItemSet) -> Result<()>;
}

/// Persistence for baselines
pub trait BaselineStore: Send + Sync {
    fn load(&self) -> Result<BaselineSnapshot>;

    /// Replace one subsystem's record, atomically
    fn write_subsystem(&self, record: &BaselineRecord) -> Result<()>;
}

/// In-memory manifest store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    snapshot: Mutex<ManifestSnapshot>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(self, id: &str, items: ItemSet) -> Self {
        self.lock().insert(SubsystemId::from(id), items);
        self
    }

    pub fn with_corrupt_section(self, id: &str, message: &str) -> Self {
        self.lock().insert_corrupt(SubsystemId::from(id), message);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManifestSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self) -> Result<ManifestSnapshot> {
        Ok(self.lock().clone())
    }

    fn write_subsystem(&self, id: &SubsystemId, items: &ItemSet) -> Result<()> {
        self.lock().insert(id.clone(), items.clone());
        Ok(())
    }
}

/// In-memory baseline store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    snapshot: Mutex<BaselineSnapshot>,
    writes: Mutex<usize>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: BaselineRecord) -> Self {
        self.lock().insert(record);
        self
    }

    /// Number of records written since creation
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BaselineSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self) -> Result<BaselineSnapshot> {
        Ok(self.lock().clone())
    }

    fn write_subsystem(&self, record: &BaselineRecord) -> Result<()> {
        self.lock().insert(record.clone());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
