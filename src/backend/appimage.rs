//! AppImages kept in a single directory
//!
//! The item id is the file name without `.AppImage`; the fingerprint is the
//! blake3 hash of the file. Installing downloads `source.url`.

use reconcile::{Backend, Error, ErrorCategory, Item, ItemId, ItemSet, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::atomic::write_atomic;

const NAME: &str = "appimage";
const EXTENSION: &str = "AppImage";
const MAX_DOWNLOAD_SIZE: u64 = 2 * 1024 * 1024 * 1024;

pub fn hash_file(path: &Path) -> Result<String> {
    let content = fs::read(path)?;
    Ok(blake3::hash(&content).to_hex().to_string())
}

fn is_appimage(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(EXTENSION))
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.starts_with('.') {
        return Err(Error::invalid_item(format!("not a plain AppImage name: {id}")));
    }
    Ok(())
}

fn download(url: &str) -> Result<Vec<u8>> {
    let agent = ureq::Agent::new_with_defaults();
    let mut response = agent
        .get(url)
        .header("User-Agent", "strata")
        .call()
        .map_err(|e| download_error(url, e))?;

    response
        .body_mut()
        .with_config()
        .limit(MAX_DOWNLOAD_SIZE)
        .read_to_vec()
        .map_err(|e| download_error(url, e))
}

fn download_error(url: &str, err: ureq::Error) -> Error {
    let category = match &err {
        ureq::Error::StatusCode(404) => ErrorCategory::NotFound,
        ureq::Error::StatusCode(401 | 403) => ErrorCategory::Permission,
        ureq::Error::StatusCode(_) => ErrorCategory::Other,
        _ => ErrorCategory::Network,
    };
    Error::AdapterFailed {
        backend: NAME.to_string(),
        message: format!("download of {url} failed: {err}"),
        stderr: String::new(),
        category,
    }
}

#[derive(Debug)]
pub struct AppImageBackend {
    dir: PathBuf,
}

impl AppImageBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Write downloaded bytes into place after checking the pinned hash
    fn store(&self, item: &Item, content: &[u8]) -> Result<()> {
        let actual = blake3::hash(content).to_hex().to_string();
        if let Some(expected) = item.fingerprint.as_deref()
            && expected != actual
        {
            return Err(Error::AdapterFailed {
                backend: NAME.to_string(),
                message: format!("{}: expected blake3 {expected}, got {actual}", item.id),
                stderr: String::new(),
                category: ErrorCategory::Corrupt,
            });
        }

        let path = self.path_for(item.id.as_str());
        write_atomic(&path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}

impl Backend for AppImageBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn list(&self) -> Result<ItemSet> {
        if !self.dir.exists() {
            return Ok(ItemSet::new());
        }

        let mut items = ItemSet::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Other(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_appimage(path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            items.insert(Item::new(stem).with_fingerprint(hash_file(path)?));
        }
        Ok(items)
    }

    fn install(&self, item: &Item) -> Result<()> {
        validate_id(item.id.as_str())?;
        let path = self.path_for(item.id.as_str());
        if path.exists() {
            match item.fingerprint.as_deref() {
                None => return Ok(()),
                Some(expected) if hash_file(&path)? == expected => return Ok(()),
                Some(_) => {}
            }
        }

        let url = item
            .source("url")
            .ok_or_else(|| Error::invalid_item(format!("{}: no source.url to download", item.id)))?;
        log::info!("{NAME}: downloading {url}");
        let content = download(url)?;
        self.store(item, &content)
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        validate_id(id.as_str())?;
        let path = self.path_for(id.as_str());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_hashes_appimages_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Obsidian.AppImage"), b"obsidian").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(dir.path().join("Sub.AppImage")).unwrap();

        let items = AppImageBackend::new(dir.path()).list().unwrap();
        assert_eq!(items.len(), 1);
        let obsidian = items.get("Obsidian").unwrap();
        assert_eq!(
            obsidian.fingerprint.as_deref(),
            Some(blake3::hash(b"obsidian").to_hex().as_str())
        );
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = AppImageBackend::new(dir.path().join("nope"));
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn test_install_present_file_is_noop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Tool.AppImage"), b"v1").unwrap();
        let backend = AppImageBackend::new(dir.path());

        // No url needed when the pinned hash already matches
        let hash = hash_file(&dir.path().join("Tool.AppImage")).unwrap();
        let pinned = Item::new("Tool").with_fingerprint(hash);
        backend.install(&pinned).unwrap();
        backend.install(&Item::new("Tool")).unwrap();
    }

    #[test]
    fn test_install_without_url() {
        let dir = TempDir::new().unwrap();
        let err = AppImageBackend::new(dir.path())
            .install(&Item::new("Tool"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidItem { .. }));
    }

    #[test]
    fn test_store_checks_hash() {
        let dir = TempDir::new().unwrap();
        let backend = AppImageBackend::new(dir.path());

        let err = backend
            .store(&Item::new("Tool").with_fingerprint("deadbeef"), b"content")
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Corrupt);
        assert!(!dir.path().join("Tool.AppImage").exists());

        backend.store(&Item::new("Tool"), b"content").unwrap();
        assert!(backend.list().unwrap().contains("Tool"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Tool.AppImage"), b"v1").unwrap();
        let backend = AppImageBackend::new(dir.path());

        backend.remove(&ItemId::from("Tool")).unwrap();
        backend.remove(&ItemId::from("Tool")).unwrap();
        assert!(!dir.path().join("Tool.AppImage").exists());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let backend = AppImageBackend::new(dir.path());
        assert!(backend.remove(&ItemId::from("../etc/passwd")).is_err());
    }
}
