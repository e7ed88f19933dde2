//! Wrapper scripts that expose commands from containers or flatpaks on PATH.
//!
//! Only scripts carrying [`MARKER`] are managed; anything else in the
//! directory is left alone.

use reconcile::{Backend, Error, Item, ItemId, ItemSet, Result};
use std::fs;
use std::path::PathBuf;

use crate::atomic::write_atomic;

const NAME: &str = "shim";
pub const MARKER: &str = "# managed by strata";

/// Script body for a shim running `command`
pub fn render(command: &str) -> String {
    format!("#!/bin/sh\n{MARKER}\nexec {command} \"$@\"\n")
}

/// The wrapped command of a managed script, `None` for foreign files
pub fn parse(script: &str) -> Option<String> {
    if !script.lines().any(|l| l.trim() == MARKER) {
        return None;
    }
    script.lines().find_map(|line| {
        line.trim()
            .strip_prefix("exec ")
            .map(|rest| rest.trim_end().trim_end_matches("\"$@\"").trim_end().to_string())
    })
}

fn command_of(item: &Item) -> Result<&str> {
    item.fingerprint
        .as_deref()
        .or_else(|| item.source("command"))
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::invalid_item(format!("{}: a shim needs a command", item.id)))
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.starts_with('.') {
        return Err(Error::invalid_item(format!("not a plain command name: {id}")));
    }
    Ok(())
}

#[derive(Debug)]
pub struct ShimBackend {
    dir: PathBuf,
}

impl ShimBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Backend for ShimBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn list(&self) -> Result<ItemSet> {
        if !self.dir.exists() {
            return Ok(ItemSet::new());
        }

        let mut entries: Vec<_> = fs::read_dir(&self.dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut items = ItemSet::new();
        for entry in entries {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            // Binaries and unreadable files are not shims
            let Ok(script) = fs::read_to_string(&path) else {
                continue;
            };
            if let (Some(command), Some(name)) = (parse(&script), path.file_name()) {
                items.insert(Item::new(name.to_string_lossy().into_owned()).with_fingerprint(command));
            }
        }
        Ok(items)
    }

    fn install(&self, item: &Item) -> Result<()> {
        validate_id(item.id.as_str())?;
        let command = command_of(item)?;
        let path = self.dir.join(item.id.as_str());

        if path.exists() {
            match fs::read_to_string(&path).ok().and_then(|s| parse(&s)) {
                Some(current) if current == command => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(Error::AdapterFailed {
                        backend: NAME.to_string(),
                        message: format!("{} exists and is not managed", path.display()),
                        stderr: String::new(),
                        category: reconcile::ErrorCategory::Permission,
                    });
                }
            }
        }

        write_atomic(&path, render(command))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        validate_id(id.as_str())?;
        let path = self.dir.join(id.as_str());
        let managed = match fs::read_to_string(&path) {
            Ok(script) => parse(&script).is_some(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => false,
            Err(e) => return Err(Error::Io(e)),
        };
        if !managed {
            log::warn!("{NAME}: leaving unmanaged {}", path.display());
            return Ok(());
        }
        fs::remove_file(&path)?;
        Ok(())
    }
}
