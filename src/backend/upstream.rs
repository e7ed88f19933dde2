//! Packages shipped by the image itself, read from a JSON manifest baked
//! into the image at build time.
//!
//! ```json
//! { "items": [ { "id": "firefox", "version": "131.0" } ] }
//! ```

use reconcile::{Backend, Error, ErrorCategory, Item, ItemSet, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::rpm_ostree::Status;

const NAME: &str = "upstream";

#[derive(Debug, Deserialize)]
struct ImageManifest {
    #[serde(default)]
    items: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    id: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    source: BTreeMap<String, String>,
}

/// Read an image manifest from `path`
pub fn read_manifest(path: &Path) -> Result<ItemSet> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::unavailable(NAME, format!("{} not found", path.display()))
        }
        _ => Error::Io(e),
    })?;
    let manifest: ImageManifest =
        serde_json::from_str(&content).map_err(|e| Error::AdapterFailed {
            backend: NAME.to_string(),
            message: format!("{}: {e}", path.display()),
            stderr: String::new(),
            category: ErrorCategory::Corrupt,
        })?;

    Ok(manifest
        .items
        .into_iter()
        .map(|e| Item {
            id: e.id.into(),
            fingerprint: e.version,
            source: e.source,
        })
        .collect())
}

/// `upstream`: what the image vendor ships
#[derive(Debug)]
pub struct UpstreamBackend {
    /// Absolute location of the manifest inside a deployment root
    manifest: PathBuf,
}

impl UpstreamBackend {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }

    /// Same manifest, under another deployment's root
    fn in_root(&self, root: &Path) -> PathBuf {
        root.join(self.manifest.strip_prefix("/").unwrap_or(&self.manifest))
    }
}

impl Backend for UpstreamBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.manifest.exists()
    }

    fn list(&self) -> Result<ItemSet> {
        read_manifest(&self.manifest)
    }

    fn staged(&self) -> Result<Option<ItemSet>> {
        let status = Status::query()?;
        match status.pending() {
            Some(pending) => read_manifest(&self.in_root(&pending.root())).map(Some),
            None => Ok(None),
        }
    }
}
