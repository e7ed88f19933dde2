//! User dconf settings that differ from their schema defaults
//!
//! Each key is an item: the id is the full key path, the fingerprint the
//! GVariant text of its value.

use reconcile::{Backend, Error, Item, ItemId, ItemSet, Result};
use regex::Regex;

use crate::runner;

const NAME: &str = "dconf";

/// Parse `dconf dump /`
pub fn parse_dump(output: &str) -> Result<ItemSet> {
    let section_re = Regex::new(r"^\[(.*)\]$").map_err(|e| Error::Other(e.to_string()))?;
    let entry_re =
        Regex::new(r"^([A-Za-z0-9_-]+)=(.*)$").map_err(|e| Error::Other(e.to_string()))?;

    let mut items = ItemSet::new();
    let mut dir = String::from("/");
    for line in output.lines().map(str::trim_end) {
        if let Some(caps) = section_re.captures(line) {
            let section = caps[1].trim_matches('/');
            dir = if section.is_empty() {
                "/".to_string()
            } else {
                format!("/{section}/")
            };
        } else if let Some(caps) = entry_re.captures(line) {
            items.insert(Item::new(format!("{dir}{}", &caps[1])).with_fingerprint(&caps[2]));
        }
    }
    Ok(items)
}

fn validate_key(id: &str) -> Result<()> {
    if !id.starts_with('/') || id.ends_with('/') {
        return Err(Error::invalid_item(format!(
            "dconf key must be an absolute key path: {id}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct DconfBackend;

impl Backend for DconfBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        runner::command_exists("dconf")
    }

    fn list(&self) -> Result<ItemSet> {
        let out = runner::run_checked(NAME, "dconf", &["dump", "/"], None)?;
        parse_dump(&out)
    }

    fn install(&self, item: &Item) -> Result<()> {
        validate_key(item.id.as_str())?;
        let value = item.fingerprint.as_deref().ok_or_else(|| {
            Error::invalid_item(format!("{}: a dconf key needs a value", item.id))
        })?;
        runner::run_checked(
            NAME,
            "dconf",
            &["write", item.id.as_str(), value],
            Some(item.id.as_str()),
        )?;
        Ok(())
    }

    fn remove(&self, id: &ItemId) -> Result<()> {
        validate_key(id.as_str())?;
        runner::run_checked(NAME, "dconf", &["reset", id.as_str()], Some(id.as_str()))?;
        Ok(())
    }
}
