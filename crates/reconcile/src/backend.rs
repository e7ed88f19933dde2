//! Backend abstraction for ecosystem adapters.
//!
//! The [`Backend`] trait is the capability contract every ecosystem
//! implements, allowing for different implementations (real CLI tools,
//! directory stores, mocks for testing).

use crate::error::{Error, Result};
use crate::types::{Item, ItemId, ItemSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Capability contract for one package ecosystem.
///
/// `install` and `remove` must be idempotent so the engine can retry them.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short name used in errors and logs (e.g. "flatpak")
    fn name(&self) -> &str;

    /// Check if the ecosystem's tool is usable on this host.
    fn is_available(&self) -> bool {
        true
    }

    /// List the items currently present (booted image or live runtime).
    fn list(&self) -> Result<ItemSet>;

    /// Rewrite a declared item into the form `list` reports it in, so
    /// equivalent spellings of a fingerprint compare equal.
    fn normalize(&self, item: Item) -> Item {
        item
    }

    /// List the items of the pending, not-yet-booted image layer.
    ///
    /// `None` when nothing is staged. Runtime ecosystems never stage.
    fn staged(&self) -> Result<Option<ItemSet>> {
        Ok(None)
    }

    /// Install an item, or reinstall it at the declared fingerprint.
    fn install(&self, item: &Item) -> Result<()> {
        Err(Error::unavailable(
            self.name(),
            format!("cannot install {} at runtime; rebuild the image", item.id),
        ))
    }

    /// Remove an item.
    fn remove(&self, id: &ItemId) -> Result<()> {
        Err(Error::unavailable(
            self.name(),
            format!("cannot remove {id} at runtime; rebuild the image"),
        ))
    }
}

#[derive(Debug, Default)]
struct MockState {
    installed: ItemSet,
    staged: Option<ItemSet>,
    calls: Vec<String>,
    fail_list: Option<String>,
    fail_install: Vec<String>,
    ignore_versions: bool,
    unavailable: bool,
    delay: Option<Duration>,
}

/// Scriptable in-memory backend for tests.
///
/// Clones share state, so a test can keep a handle while the registry owns
/// another.
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Start with these items installed
    pub fn with_items(self, items: ItemSet) -> Self {
        self.set_items(items);
        self
    }

    /// Pretend a pending image layer contains these items
    pub fn with_staged(self, items: ItemSet) -> Self {
        self.lock().staged = Some(items);
        self
    }

    /// Make every call sleep first (for timeout tests)
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Make `list` fail with this stderr
    pub fn failing_list(self, stderr: &str) -> Self {
        self.lock().fail_list = Some(stderr.to_string());
        self
    }

    /// Make `install` of this id fail
    pub fn failing_install(self, id: &str) -> Self {
        self.lock().fail_install.push(id.to_string());
        self
    }

    /// Keep the installed version on `install`, like a tool that can only
    /// update to the latest release
    pub fn ignoring_versions(self) -> Self {
        self.lock().ignore_versions = true;
        self
    }

    /// Report the tool as missing
    pub fn unavailable(self) -> Self {
        self.lock().unavailable = true;
        self
    }

    pub fn set_items(&self, items: ItemSet) {
        self.lock().installed = items;
    }

    pub fn items(&self) -> ItemSet {
        self.lock().installed.clone()
    }

    /// Calls made so far, e.g. `["list", "install:foo"]`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Mutating calls made so far
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("install:") || c.starts_with("remove:"))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, call: String) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            if state.unavailable {
                return Err(Error::unavailable(&self.name, "not installed"));
            }
            state.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        !self.lock().unavailable
    }

    fn list(&self) -> Result<ItemSet> {
        self.enter("list".to_string())?;
        let state = self.lock();
        if let Some(stderr) = &state.fail_list {
            return Err(Error::from_command_output(&self.name, stderr, None));
        }
        Ok(state.installed.clone())
    }

    fn staged(&self) -> Result<Option<ItemSet>> {
        self.enter("staged".to_string())?;
        Ok(self.lock().staged.clone())
    }

    fn install(&self, item: &Item) -> Result<()> {
        self.enter(format!("install:{}", item.id))?;
        let mut state = self.lock();
        if state.fail_install.iter().any(|id| id == item.id.as_str()) {
            return Err(Error::from_command_output(
                &self.name,
                "error: nothing matches",
                Some(item.id.as_str()),
            ));
        }
        let kept = state
            .installed
            .get(item.id.as_str())
            .filter(|_| state.ignore_versions)
            .cloned();
        state.installed.insert(kept.unwrap_or_else(|| item.clone()));
        Ok(())
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        self.enter(format!("remove:{id}"))?;
        self.lock().installed.remove(id.as_str());
        Ok(())
    }
}
