//! Core types for tier-aware reconciliation

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// How an ecosystem's state reaches the running system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemTier {
    /// Baked into the bootable image; changes need a rebuild and a reboot
    Atomic,
    /// Lives at runtime; changes apply immediately
    Convergent,
}

impl SubsystemTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::Convergent => "convergent",
        }
    }
}

impl fmt::Display for SubsystemTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Stable identifier of one ecosystem, unique within the registry
    SubsystemId
);

string_id!(
    /// Identifier of one unit (package, extension, key...) inside a subsystem
    ItemId
);

/// Whether two fingerprints describe the same state.
///
/// An unset fingerprint is unpinned and agrees with anything.
pub fn fingerprints_agree(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// One declared or observed unit within a subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Version or configuration fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "version")]
    pub fingerprint: Option<String>,
    /// Where the item comes from (remote, url, image, command...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source: BTreeMap<String, String>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            fingerprint: None,
            source: BTreeMap::new(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_source(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    pub fn source(&self, key: &str) -> Option<&str> {
        self.source.get(key).map(String::as_str)
    }

    /// Same id, and fingerprints agree
    pub fn matches(&self, other: &Item) -> bool {
        self.id == other.id
            && fingerprints_agree(self.fingerprint.as_deref(), other.fingerprint.as_deref())
    }
}

/// Ordered set of items with unique ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemSet {
    items: Vec<Item>,
}

impl ItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate ids
    pub fn try_from_items(items: Vec<Item>) -> Result<Self, ItemId> {
        let mut set = Self::new();
        for item in items {
            if set.contains(item.id.as_str()) {
                return Err(item.id);
            }
            set.items.push(item);
        }
        Ok(set)
    }

    /// Insert an item, replacing an existing one with the same id in place
    pub fn insert(&mut self, item: Item) -> Option<Item> {
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => Some(std::mem::replace(existing, item)),
            None => {
                self.items.push(item);
                None
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Item> {
        let index = self.items.iter().position(|i| i.id.as_str() == id)?;
        Some(self.items.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Id → fingerprint view used by the diff algorithms
    pub fn fingerprints(&self) -> BTreeMap<&str, Option<&str>> {
        self.items
            .iter()
            .map(|i| (i.id.as_str(), i.fingerprint.as_deref()))
            .collect()
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}

impl FromIterator<Item> for ItemSet {
    /// Later duplicates replace earlier ones
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ItemSet {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A reconciliation verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Remove,
    Sync,
    Capture,
    Staged,
    Drift,
    Baseline,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Self::Add,
        Self::Remove,
        Self::Sync,
        Self::Capture,
        Self::Staged,
        Self::Drift,
        Self::Baseline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Sync => "sync",
            Self::Capture => "capture",
            Self::Staged => "staged",
            Self::Drift => "drift",
            Self::Baseline => "baseline",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subsystems a pass applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every registered subsystem that supports the operation
    All,
    /// One subsystem; an unsupported tier is reported, not filtered
    One(SubsystemId),
}

impl Target {
    pub fn from_option(subsystem: Option<&str>) -> Self {
        match subsystem {
            Some(id) => Self::One(SubsystemId::from(id)),
            None => Self::All,
        }
    }
}
