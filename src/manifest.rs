//! `manifest.toml`: the declared state
//!
//! ```toml
//! [flatpak]
//! items = [
//!     { id = "org.gnome.Maps", version = "45.1", source = { origin = "flathub" } },
//! ]
//! ```
//!
//! One table per subsystem. A section that fails to parse only fails its own
//! subsystem, and is carried over untouched when another section is written.

use reconcile::{Error, Item, ItemSet, ManifestSnapshot, ManifestStore, Result, SubsystemId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::atomic::write_atomic;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Section {
    #[serde(default)]
    items: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Entry {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    source: BTreeMap<String, String>,
}

impl From<Entry> for Item {
    fn from(entry: Entry) -> Self {
        Item {
            id: entry.id.into(),
            fingerprint: entry.version,
            source: entry.source,
        }
    }
}

impl From<&Item> for Entry {
    fn from(item: &Item) -> Self {
        Entry {
            id: item.id.to_string(),
            version: item.fingerprint.clone(),
            source: item.source.clone(),
        }
    }
}

fn parse_section(value: toml::Value) -> std::result::Result<ItemSet, String> {
    let section: Section = value.try_into().map_err(|e| e.to_string())?;
    if let Some(empty) = section.items.iter().find(|e| e.id.trim().is_empty()) {
        return Err(format!("item with empty id ({empty:?})"));
    }
    ItemSet::try_from_items(section.items.into_iter().map(Item::from).collect())
        .map_err(|dup| format!("duplicate item id: {dup}"))
}

/// File-backed manifest
#[derive(Debug)]
pub struct TomlManifestStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TomlManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| Error::ManifestCorrupt {
            subsystem: None,
            message: format!("{}: {e}", self.path.display()),
        })
    }
}

impl ManifestStore for TomlManifestStore {
    fn load(&self) -> Result<ManifestSnapshot> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.read_document()?;

        let mut snapshot = ManifestSnapshot::new();
        for (name, value) in document {
            let id = SubsystemId::from(name);
            match parse_section(value) {
                Ok(items) => snapshot.insert(id, items),
                Err(message) => {
                    log::warn!("manifest section [{id}] is unreadable: {message}");
                    snapshot.insert_corrupt(id, message);
                }
            }
        }
        log::debug!("Loaded manifest from {}", self.path.display());
        Ok(snapshot)
    }

    fn write_subsystem(&self, id: &SubsystemId, items: &ItemSet) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;

        let section = Section {
            items: items.iter().map(Entry::from).collect(),
        };
        let value = toml::Value::try_from(section).map_err(|e| Error::Other(e.to_string()))?;
        document.insert(id.to_string(), value);

        let content = toml::to_string(&document).map_err(|e| Error::Other(e.to_string()))?;
        write_atomic(&self.path, &content)
    }
}
